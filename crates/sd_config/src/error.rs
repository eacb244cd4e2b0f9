// crates/sd_config/src/error.rs

//! Configuration errors

use sd_foundation::SdError;

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("parse error: {0}")]
    Parse(String),

    /// Invalid value
    #[error("invalid value '{key}': {value} - {reason}")]
    InvalidValue {
        /// Config key
        key: String,
        /// Config value
        value: String,
        /// Reason
        reason: String,
    },

    /// Missing entry
    #[error("missing configuration: {0}")]
    Missing(String),
}

impl ConfigError {
    /// Invalid value
    pub fn invalid(key: &str, value: impl ToString, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<ConfigError> for SdError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Io(e) => SdError::from(e),
            ConfigError::InvalidValue { key, value, reason } => {
                SdError::invalid_config(key, value, reason)
            }
            other => SdError::config(other.to_string()),
        }
    }
}
