// crates/sd_foundation/src/error.rs

//! Unified error type
//!
//! Provides the `SdError` enum and the `SdResult` alias used across the
//! workspace. Crate-local errors (config, forcing, io, engine) convert into
//! `SdError` so that failures can cross layer boundaries.
//!
//! # Example
//!
//! ```
//! use sd_foundation::error::{SdError, SdResult};
//!
//! fn read_config() -> SdResult<()> {
//!     Err(SdError::config("time_step must be positive"))
//! }
//! assert!(read_config().is_err());
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// Unified result type
pub type SdResult<T> = Result<T, SdError>;

/// SnowDrive error type
#[derive(Error, Debug)]
pub enum SdError {
    // ========================================================================
    // IO
    // ========================================================================
    /// IO failure
    #[error("IO error: {message}")]
    Io {
        /// Description
        message: String,
        #[source]
        /// Underlying IO error, if any
        source: Option<std::io::Error>,
    },

    /// Parse failure in a text file
    #[error("parse error: {file} line {line}: {message}")]
    ParseError {
        /// File path
        file: PathBuf,
        /// 1-based line number
        line: usize,
        /// Message
        message: String,
    },

    // ========================================================================
    // Data
    // ========================================================================
    /// Invalid input data
    #[error("invalid input: {message}")]
    InvalidInput {
        /// Reason
        message: String,
    },

    /// Grid shape mismatch
    #[error("shape mismatch for {name}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Field name
        name: String,
        /// Expected `(ny, nx)`
        expected: (usize, usize),
        /// Actual `(ny, nx)`
        actual: (usize, usize),
    },

    // ========================================================================
    // Configuration
    // ========================================================================
    /// Configuration error
    #[error("configuration error: {message}")]
    Config {
        /// Reason
        message: String,
    },

    /// Invalid configuration value
    #[error("invalid configuration value: {key}={value}, reason: {reason}")]
    InvalidConfig {
        /// Key
        key: String,
        /// Value
        value: String,
        /// Reason
        reason: String,
    },

    /// Serialization failure
    #[error("serialization error: {message}")]
    Serialization {
        /// Reason
        message: String,
    },

    // ========================================================================
    // Runtime
    // ========================================================================
    /// Channel closed on the other side
    #[error("channel closed: {channel}")]
    ChannelClosed {
        /// Channel name
        channel: String,
    },

    /// Worker thread failed
    #[error("worker '{worker}' failed: {message}")]
    Worker {
        /// Worker name
        worker: String,
        /// Reason
        message: String,
    },

    /// Simulation failure that ends the run
    #[error("simulation error: {0}")]
    Simulation(String),
}

// ========================================================================
// Constructors
// ========================================================================

impl SdError {
    /// IO error with source
    pub fn io_with_source(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Parse error
    pub fn parse(file: impl Into<PathBuf>, line: usize, message: impl Into<String>) -> Self {
        Self::ParseError {
            file: file.into(),
            line,
            message: message.into(),
        }
    }

    /// Invalid input
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Shape mismatch
    pub fn shape_mismatch(
        name: impl Into<String>,
        expected: (usize, usize),
        actual: (usize, usize),
    ) -> Self {
        Self::ShapeMismatch {
            name: name.into(),
            expected,
            actual,
        }
    }

    /// Configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Invalid configuration value
    pub fn invalid_config(
        key: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidConfig {
            key: key.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Channel closed
    pub fn channel_closed(channel: impl Into<String>) -> Self {
        Self::ChannelClosed {
            channel: channel.into(),
        }
    }

    /// Worker failure
    pub fn worker(worker: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Worker {
            worker: worker.into(),
            message: message.into(),
        }
    }

}

// ========================================================================
// std conversions
// ========================================================================

impl From<std::io::Error> for SdError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SdError::config("bad time step");
        assert!(err.to_string().contains("configuration error"));
    }

    #[test]
    fn test_shape_mismatch_display() {
        let err = SdError::shape_mismatch("z_s", (3, 4), (4, 3));
        let msg = err.to_string();
        assert!(msg.contains("z_s"));
        assert!(msg.contains("(3, 4)"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let err: SdError = io_err.into();
        assert!(matches!(err, SdError::Io { .. }));
    }

    #[test]
    fn test_worker_display() {
        let err = SdError::worker("sd-queue-cleaner", "thread panicked");
        assert_eq!(err.to_string(), "worker 'sd-queue-cleaner' failed: thread panicked");
    }
}
