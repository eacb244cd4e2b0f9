// crates/sd_forcing/src/error.rs

//! Forcing stream errors

use std::path::PathBuf;

use sd_foundation::{SdError, TimestepKey};
use thiserror::Error;

use crate::variables::ForcingVariable;

/// Forcing result
pub type ForcingResult<T> = Result<T, ForcingError>;

/// Forcing stream error
#[derive(Error, Debug)]
pub enum ForcingError {
    /// Variable name not in the catalogue
    #[error("unknown forcing variable: {0}")]
    UnknownVariable(String),

    /// The run needs a variable the producer does not offer
    #[error("forcing producer does not provide '{0}'")]
    MissingVariable(ForcingVariable),

    /// No queue for this variable
    #[error("no broker queue for '{0}'")]
    NoQueue(ForcingVariable),

    /// Broker was closed while a put or get was waiting
    #[error("broker queue '{variable}' closed while waiting for {key}")]
    BrokerClosed {
        /// Variable
        variable: ForcingVariable,
        /// Awaited key
        key: TimestepKey,
    },

    /// Acknowledgment channel disconnected
    #[error("acknowledgment channel closed")]
    AckClosed,

    /// Producer failure
    #[error("producer failed for '{variable}' at {key}: {message}")]
    Producer {
        /// Variable
        variable: ForcingVariable,
        /// Timestep
        key: TimestepKey,
        /// Reason
        message: String,
    },

    /// Grid of the wrong shape
    #[error("forcing grid '{variable}' has shape {actual:?}, expected {expected:?}")]
    Shape {
        /// Variable
        variable: ForcingVariable,
        /// Expected `(ny, nx)`
        expected: (usize, usize),
        /// Actual `(ny, nx)`
        actual: (usize, usize),
    },

    /// Forcing table problem
    #[error("forcing table {path}: line {line}: {message}")]
    Table {
        /// File
        path: PathBuf,
        /// 1-based line
        line: usize,
        /// Reason
        message: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ForcingError {
    /// Table parse error
    pub fn table(path: impl Into<PathBuf>, line: usize, message: impl Into<String>) -> Self {
        Self::Table {
            path: path.into(),
            line,
            message: message.into(),
        }
    }

    /// Broker shut down underneath a waiter
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::BrokerClosed { .. } | Self::AckClosed)
    }
}

impl From<ForcingError> for SdError {
    fn from(err: ForcingError) -> Self {
        match err {
            ForcingError::Io(e) => SdError::from(e),
            ForcingError::Table { path, line, message } => SdError::parse(path, line, message),
            ForcingError::Shape {
                variable,
                expected,
                actual,
            } => SdError::shape_mismatch(variable.name(), expected, actual),
            ForcingError::BrokerClosed { variable, .. } => SdError::channel_closed(variable.name()),
            ForcingError::AckClosed => SdError::channel_closed("acknowledgment"),
            other => SdError::invalid_input(other.to_string()),
        }
    }
}
