// crates/sd_config/src/lib.rs

//! SnowDrive Config Layer (Layer 2)
//!
//! Run configuration loaded from JSON, with validation of the time step
//! rules, the escalation parameters and the crash restart settings.
//!
//! # Modules
//!
//! - [`run_config`]: `RunConfig` and its sections
//! - [`error`]: configuration error type

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod run_config;

/// Layer id
pub const LAYER: u8 = 2;

pub use error::ConfigError;
pub use run_config::{
    DomainConfig, EscalationConfig, ForcingConfig, InitConfig, InitEncoding, IntegratorConfig,
    LadderConfig, ModelType, OutputConfig, OutputMode, RestartConfig, RunConfig, TimeConfig,
    UpdateConfig,
};
