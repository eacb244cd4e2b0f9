// crates/sd_engine/src/error.rs

//! Engine errors
//!
//! # Taxonomy
//!
//! | variant                  | category                         | leaves the controller |
//! |--------------------------|----------------------------------|-----------------------|
//! | `Divergence`             | recoverable numerical divergence | never                 |
//! | `RetryBudgetExhausted`   | fatal run error                  | yes                   |
//! | `IntegratorFatal`        | fatal run error                  | yes                   |
//! | `UpdateWithoutState`     | fatal run error                  | yes                   |
//! | `Init`                   | initialization-source error      | yes, before step 1    |
//!
//! Missing forcing data is not an error at all; it is substituted with
//! zeros when the forcing sample is assembled.

use sd_config::ConfigError;
use sd_forcing::ForcingError;
use sd_foundation::{SdError, TimestepKey};
use sd_io::IoError;
use thiserror::Error;

/// Engine result
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine error
#[derive(Error, Debug)]
pub enum EngineError {
    /// Integrator diverged; handled by the escalation controller
    #[error("integration diverged at {key}: {message}")]
    Divergence {
        /// Timestep
        key: TimestepKey,
        /// Offending pixel, if reported
        pixel: Option<(usize, usize)>,
        /// Integrator message
        message: String,
    },

    /// Consecutive mass-threshold relaxations hit the bound
    #[error("integration at {key} still failing after {attempts} consecutive threshold relaxations")]
    RetryBudgetExhausted {
        /// Timestep
        key: TimestepKey,
        /// Relaxed attempts made
        attempts: u32,
    },

    /// Integrator failure outside the divergence set
    #[error("integrator failed at {key}: {message}")]
    IntegratorFatal {
        /// Timestep
        key: TimestepKey,
        /// Reason
        message: String,
    },

    /// An update is scheduled for a timestep without observation data
    #[error("state update scheduled at {key} has no observation data")]
    UpdateWithoutState {
        /// Timestep
        key: TimestepKey,
    },

    /// Init source missing or invalid
    #[error("initialization failed: {0}")]
    Init(String),

    /// Timestep ladder does not satisfy its invariants
    #[error("invalid timestep ladder: {0}")]
    Ladder(String),

    /// A state grid does not have the domain shape
    #[error("state field '{field}' has shape {actual:?}, domain is {expected:?}")]
    Shape {
        /// Field key
        field: String,
        /// Domain `(ny, nx)`
        expected: (usize, usize),
        /// Actual `(ny, nx)`
        actual: (usize, usize),
    },

    /// Static fields are fixed at initialization
    #[error("static field '{0}' cannot be replaced")]
    StaticField(String),

    /// Worker thread failure
    #[error("worker '{name}' failed: {message}")]
    Worker {
        /// Thread name
        name: String,
        /// Reason
        message: String,
    },

    /// Forcing stream error
    #[error(transparent)]
    Forcing(#[from] ForcingError),

    /// Output / init file error
    #[error(transparent)]
    Io(#[from] IoError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Foundation error (time range, grid construction)
    #[error(transparent)]
    Foundation(#[from] SdError),
}

impl EngineError {
    /// Init error
    pub fn init(message: impl Into<String>) -> Self {
        Self::Init(message.into())
    }

    /// Whether the error ends the run
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Divergence { .. })
    }

    /// Broker shut down underneath the consumer
    pub fn is_broker_closed(&self) -> bool {
        matches!(self, Self::Forcing(e) if e.is_closed())
    }
}

impl From<EngineError> for SdError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Forcing(e) => e.into(),
            EngineError::Io(e) => e.into(),
            EngineError::Config(e) => e.into(),
            EngineError::Foundation(e) => e,
            EngineError::Worker { name, message } => SdError::worker(name, message),
            other => SdError::Simulation(other.to_string()),
        }
    }
}
