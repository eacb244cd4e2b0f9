// crates/sd_io/src/error.rs

//! IO errors
//!
//! All IO failures of the output sinks and init encodings. Converts into
//! `SdError` for cross-layer propagation.

use std::path::PathBuf;

use sd_foundation::SdError;
use thiserror::Error;

/// IO result
pub type IoResult<T> = Result<T, IoError>;

/// IO error
#[derive(Error, Debug)]
pub enum IoError {
    /// Underlying IO failure
    #[error("IO error on {path}: {source}")]
    Io {
        /// File
        path: PathBuf,
        /// Source
        #[source]
        source: std::io::Error,
    },

    /// Unknown state field name
    #[error("unknown state field: {0}")]
    UnknownField(String),

    /// A file does not follow its encoding
    #[error("invalid {format} file {path}: {reason}")]
    Format {
        /// Encoding name
        format: &'static str,
        /// File
        path: PathBuf,
        /// Reason
        reason: String,
    },

    /// Unsupported version
    #[error("{path}: version {found} not supported (max {supported})")]
    Version {
        /// File
        path: PathBuf,
        /// Version in the file
        found: u32,
        /// Newest supported version
        supported: u32,
    },

    /// Checksum failure
    #[error("{path}: record {record} checksum mismatch (stored {stored:08x}, computed {computed:08x})")]
    Checksum {
        /// File
        path: PathBuf,
        /// Record index
        record: usize,
        /// Stored CRC
        stored: u32,
        /// Computed CRC
        computed: u32,
    },

    /// Grid shape does not match the file
    #[error("shape mismatch for {name}: expected {expected:?}, got {actual:?}")]
    Shape {
        /// Field or band
        name: String,
        /// Expected `(ny, nx)`
        expected: (usize, usize),
        /// Actual `(ny, nx)`
        actual: (usize, usize),
    },

    /// Snapshot lacks a field the sink needs
    #[error("snapshot at {key} has no field '{field}'")]
    MissingField {
        /// Field key
        field: String,
        /// Timestep
        key: String,
    },

    /// Output pipeline failure
    #[error("output pipeline failed at {stage}: {message}")]
    PipelineFailed {
        /// Stage
        stage: String,
        /// Reason
        message: String,
    },

    /// JSON (de)serialization failure
    #[error("JSON error in {path}: {message}")]
    Json {
        /// File
        path: PathBuf,
        /// Reason
        message: String,
    },
}

impl IoError {
    /// Wrap an IO error with its path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Format error
    pub fn format(format: &'static str, path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Format {
            format,
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Pipeline failure
    pub fn pipeline(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PipelineFailed {
            stage: stage.into(),
            message: message.into(),
        }
    }
}

impl From<IoError> for SdError {
    fn from(err: IoError) -> Self {
        match err {
            IoError::Io { path, source } => {
                SdError::io_with_source(format!("{}", path.display()), source)
            }
            IoError::Shape {
                name,
                expected,
                actual,
            } => SdError::shape_mismatch(name, expected, actual),
            IoError::PipelineFailed { stage, message } => SdError::worker(stage, message),
            IoError::Json { message, .. } => SdError::serialization(message),
            other => SdError::invalid_input(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = IoError::format("archive", "snow.sdar", "bad magic");
        let msg = err.to_string();
        assert!(msg.contains("snow.sdar"));
        assert!(msg.contains("bad magic"));
    }

    #[test]
    fn test_into_sd_error() {
        let err: SdError = IoError::pipeline("writer", "disk full").into();
        assert!(matches!(err, SdError::Worker { .. }));
    }
}
