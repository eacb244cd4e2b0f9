// crates/sd_foundation/src/lib.rs

//! SnowDrive Foundation Layer
//!
//! Base layer shared by every other crate of the workspace.
//!
//! # Modules
//!
//! - [`error`]: unified error type `SdError` and the `SdResult` alias
//! - [`grid`]: the `Grid` alias (row-major `ny × nx` array) and shape helpers
//! - [`time`]: timestep keys and water-year arithmetic
//!
//! # Layering
//!
//! ```text
//! Layer 4: sd_cli       ─> application
//! Layer 3: sd_engine    ─> state record, escalation, driver
//! Layer 2: sd_config, sd_forcing, sd_io
//! Layer 1: sd_foundation (this crate)
//! ```
//!
//! # Example
//!
//! ```
//! use sd_foundation::grid::{self, Shape};
//! use sd_foundation::error::SdResult;
//!
//! fn check() -> SdResult<()> {
//!     let shape = Shape::new(3, 4);
//!     let g = grid::filled(shape, 2.5);
//!     grid::ensure_shape("air_temp", &g, shape)
//! }
//! assert!(check().is_ok());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod grid;
pub mod time;

pub use error::{SdError, SdResult};
pub use grid::{Grid, Shape};
pub use time::TimestepKey;

/// Layer id
pub const LAYER: u8 = 1;
