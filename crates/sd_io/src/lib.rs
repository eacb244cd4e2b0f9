// crates/sd_io/src/lib.rs

//! SnowDrive IO Layer (Layer 2)
//!
//! Output sinks and the on-disk encodings the initializer reads.
//!
//! # Modules
//!
//! - [`field`]: state field catalogue (integrator keys, archive names, ids)
//! - [`snapshot`]: read-only state snapshots handed to sinks
//! - [`sink`]: the `OutputSink` trait, memory and archive sinks
//! - [`pipeline`]: batched background archive writer
//! - [`archive`]: time-indexed binary output archive
//! - [`band_image`]: legacy band image encoding
//! - [`gridded`]: JSON gridded archive and depth observations
//! - [`error`]: IO error type

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod archive;
pub mod band_image;
mod crc;
pub mod error;
pub mod field;
pub mod gridded;
pub mod pipeline;
pub mod sink;
pub mod snapshot;

/// Layer id
pub const LAYER: u8 = 2;

pub use archive::{ArchiveHeader, ArchiveWriter, OutputArchive};
pub use band_image::{init_image_path, snow_image_path, BandImage, BandImageSink, SNOW_BANDS};
pub use error::{IoError, IoResult};
pub use field::StateField;
pub use gridded::{DepthObservations, GriddedArchive};
pub use pipeline::{OutputPipeline, PipelineConfig, PipelineStats};
pub use sink::{ArchiveSink, MemorySink, OutputSink};
pub use snapshot::StateSnapshot;
