// crates/sd_engine/src/lib.rs

//! SnowDrive Engine Layer (Layer 3)
//!
//! Drives an external snowpack integrator over a forcing stream.
//!
//! # Modules
//!
//! - [`state`]: the mutable state record
//! - [`init`]: initial condition sources and the initializer
//! - [`ladder`]: the four-level timestep ladder
//! - [`integrator`]: the integrator seam
//! - [`escalation`]: failure escalation around one integrator call
//! - [`updater`]: out-of-band depth updates
//! - [`driver`]: the step loop and output cadence
//! - [`pipeline`]: pull and concurrent execution modes
//! - [`error`]: engine error type
//!
//! # Run flow
//!
//! ```text
//! RunConfig ──> Initializer ──> StateRecord
//!                                    │
//! ForcingProducer ──> DirectSource ──┤
//!            └──> TimestepBroker ──> BrokerSource
//!                                    │
//!                                    v
//!                  IntegratorDriver ──> EscalationController ──> Integrator
//!                                    │
//!                                    v
//!                               OutputSink
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod driver;
pub mod error;
pub mod escalation;
pub mod init;
pub mod integrator;
pub mod ladder;
pub mod pipeline;
pub mod state;
pub mod updater;

/// Layer id
pub const LAYER: u8 = 3;

pub use driver::{
    BrokerSource, DirectSource, ForcingSource, IntegratorDriver, RunSchedule, RunSummary,
    StepReport,
};
pub use error::{EngineError, EngineResult};
pub use escalation::{EscalationController, EscalationLevel, EscalationPolicy, EscalationStats};
pub use init::{InitOutcome, InitSource, Initializer, Topography};
pub use integrator::{IntegrationError, Integrator, IntegratorParams, PassthroughIntegrator};
pub use ladder::{LadderLevel, LevelInfo, TimestepLadder};
pub use pipeline::{run_pipeline, run_single, run_threaded, RunOutcome};
pub use state::StateRecord;
pub use updater::DepthUpdater;
