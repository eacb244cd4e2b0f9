// crates/sd_forcing/src/lib.rs

//! SnowDrive Forcing Layer (Layer 2)
//!
//! Everything between a meteorological distributor and the integrator
//! driver.
//!
//! # Modules
//!
//! - [`variables`]: forcing variable catalogue and integrator keys
//! - [`sample`]: raw and normalized forcing samples, unit normalization
//! - [`producer`]: the `ForcingProducer` trait and built-in producers
//! - [`csv`]: station forcing tables
//! - [`broker`]: per-variable timestep queues and the queue cleaner
//! - [`error`]: forcing error type

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod broker;
pub mod csv;
pub mod error;
pub mod producer;
pub mod sample;
pub mod variables;

/// Layer id
pub const LAYER: u8 = 2;

pub use broker::{ack_channel, DateQueue, QueueCleaner, TimestepBroker};
pub use error::{ForcingError, ForcingResult};
pub use producer::{ConstantProducer, FnProducer, ForcingProducer, TableProducer};
pub use sample::{ForcingSample, NormalizedSample, Normalizer, FREEZE};
pub use variables::ForcingVariable;
