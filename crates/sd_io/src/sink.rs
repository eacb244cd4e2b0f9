// crates/sd_io/src/sink.rs

//! Output sinks
//!
//! The driver hands a [`StateSnapshot`] to a sink at every flush point. The
//! sink owns everything after that: encoding, batching and the final write.
//!
//! | sink              | writes                                  |
//! |-------------------|-----------------------------------------|
//! | [`ArchiveSink`]   | batched binary archive, background thread |
//! | `BandImageSink`   | one band image per flush                |
//! | [`MemorySink`]    | nothing, keeps snapshots in memory      |

use std::path::Path;

use sd_foundation::grid::Shape;
use tracing::info;

use crate::archive::ArchiveWriter;
use crate::error::{IoError, IoResult};
use crate::field::StateField;
use crate::pipeline::{OutputPipeline, PipelineConfig, PipelineStats};
use crate::snapshot::StateSnapshot;

/// Receiver of output snapshots
pub trait OutputSink: Send {
    /// Accept one snapshot
    fn flush(&mut self, snapshot: StateSnapshot) -> IoResult<()>;

    /// Drain pending writes; called once at the end of a run
    fn finish(&mut self) -> IoResult<()> {
        Ok(())
    }
}

// ============================================================================
// MemorySink
// ============================================================================

/// Keeps every snapshot in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    snapshots: Vec<StateSnapshot>,
    finished: bool,
}

impl MemorySink {
    /// Empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshots received so far
    pub fn snapshots(&self) -> &[StateSnapshot] {
        &self.snapshots
    }

    /// Whether `finish` was called
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Take the snapshots
    pub fn into_snapshots(self) -> Vec<StateSnapshot> {
        self.snapshots
    }
}

impl OutputSink for MemorySink {
    fn flush(&mut self, snapshot: StateSnapshot) -> IoResult<()> {
        self.snapshots.push(snapshot);
        Ok(())
    }

    fn finish(&mut self) -> IoResult<()> {
        self.finished = true;
        Ok(())
    }
}

// ============================================================================
// ArchiveSink
// ============================================================================

/// Binary archive written by a background pipeline
pub struct ArchiveSink {
    pipeline: Option<OutputPipeline>,
    stats: Option<PipelineStats>,
}

impl ArchiveSink {
    /// Create (or append to, on restart) the archive at `path`
    pub fn open(
        path: &Path,
        shape: Shape,
        fields: Vec<StateField>,
        append: bool,
        config: PipelineConfig,
    ) -> IoResult<Self> {
        let writer = if append {
            ArchiveWriter::append_to(path, shape, fields)?
        } else {
            ArchiveWriter::create(path, shape, fields)?
        };
        info!(
            path = %path.display(),
            batch_size = config.batch_size,
            max_pending = config.max_pending,
            "output archive opened"
        );
        Ok(Self {
            pipeline: Some(OutputPipeline::start(writer, config)?),
            stats: None,
        })
    }

    /// Statistics after `finish`
    pub fn stats(&self) -> Option<&PipelineStats> {
        self.stats.as_ref()
    }
}

impl OutputSink for ArchiveSink {
    fn flush(&mut self, snapshot: StateSnapshot) -> IoResult<()> {
        match &self.pipeline {
            Some(pipeline) => pipeline.submit(snapshot),
            None => Err(IoError::pipeline("submit", "archive sink already finished")),
        }
    }

    fn finish(&mut self) -> IoResult<()> {
        if let Some(pipeline) = self.pipeline.take() {
            let stats = pipeline.finish()?;
            info!(
                records = stats.completed_requests,
                batches = stats.batches,
                bytes = stats.total_bytes_written,
                "output archive closed"
            );
            self.stats = Some(stats);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::OutputArchive;
    use chrono::NaiveDate;
    use sd_foundation::grid;

    fn snapshot(h: u32, shape: Shape) -> StateSnapshot {
        let key = NaiveDate::from_ymd_opt(2018, 1, 1)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap();
        StateSnapshot::new(key)
            .with_field(StateField::ZS, grid::filled(shape, 0.1 * h as f64))
            .with_field(StateField::Rho, grid::filled(shape, 250.0))
    }

    #[test]
    fn test_memory_sink() {
        let mut sink = MemorySink::new();
        sink.flush(snapshot(1, Shape::new(1, 1))).unwrap();
        sink.finish().unwrap();
        assert!(sink.is_finished());
        assert_eq!(sink.snapshots().len(), 1);
    }

    #[test]
    fn test_archive_sink_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("snow.sdar");
        let shape = Shape::new(2, 3);
        let fields = vec![StateField::ZS, StateField::Rho];

        let mut sink =
            ArchiveSink::open(&path, shape, fields.clone(), false, PipelineConfig::default()).unwrap();
        for h in 0..3 {
            sink.flush(snapshot(h, shape)).unwrap();
        }
        sink.finish().unwrap();
        assert_eq!(sink.stats().unwrap().completed_requests, 3);
        assert!(sink.flush(snapshot(9, shape)).is_err());

        // restart appends to the same archive
        let mut sink = ArchiveSink::open(&path, shape, fields, true, PipelineConfig::default()).unwrap();
        sink.flush(snapshot(3, shape)).unwrap();
        sink.finish().unwrap();

        let archive = OutputArchive::load(&path).unwrap();
        assert_eq!(archive.records.len(), 4);
        assert_eq!(archive.records[3].key.format("%H").to_string(), "03");
    }
}
