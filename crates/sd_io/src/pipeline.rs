// crates/sd_io/src/pipeline.rs

//! Batched output pipeline
//!
//! Archive writes happen on a dedicated worker thread so the integrator
//! driver only pays for a snapshot copy at each flush point.
//!
//! # Flow
//!
//! ```text
//! driver ──submit(snapshot)──> bounded channel ──> worker: batch ──append──> archive
//! ```
//!
//! Snapshots are buffered by the worker and appended `batch_size` at a
//! time. `submit` blocks once `max_pending` snapshots are queued. The first
//! write error stops the worker; it is reported by the next `submit` (as a
//! closed pipeline) and in full by `finish`.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::archive::ArchiveWriter;
use crate::error::{IoError, IoResult};
use crate::snapshot::StateSnapshot;

// ============================================================================
// Requests / stats
// ============================================================================

/// Request handled by the worker
enum OutputRequest {
    /// Queue a snapshot
    Write(StateSnapshot),
    /// Write whatever is buffered
    Flush,
    /// Write whatever is buffered and stop
    Shutdown,
}

/// Pipeline statistics
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// Snapshots submitted
    pub total_requests: u64,
    /// Snapshots written
    pub completed_requests: u64,
    /// Snapshots lost to a write error
    pub failed_requests: u64,
    /// Archive appends
    pub batches: u64,
    /// Bytes appended
    pub total_bytes_written: u64,
    /// Average append time [ms]
    pub average_write_time_ms: f64,
    /// Largest queue length observed
    pub max_queue_length: usize,
}

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Snapshots per archive append
    pub batch_size: usize,
    /// Queued snapshots before `submit` blocks
    pub max_pending: usize,
    /// Worker thread name
    pub thread_name: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 8,
            max_pending: 32,
            thread_name: "sd-output-writer".to_string(),
        }
    }
}

// ============================================================================
// OutputPipeline
// ============================================================================

/// Background archive writer
pub struct OutputPipeline {
    sender: Sender<OutputRequest>,
    worker: Option<JoinHandle<IoResult<()>>>,
    stats: Arc<Mutex<PipelineStats>>,
}

impl OutputPipeline {
    /// Start a worker owning `writer`
    pub fn start(writer: ArchiveWriter, config: PipelineConfig) -> IoResult<Self> {
        let (sender, receiver) = bounded(config.max_pending.max(1));
        let stats = Arc::new(Mutex::new(PipelineStats::default()));
        let worker_stats = Arc::clone(&stats);
        let batch_size = config.batch_size.max(1);

        let worker = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || Self::worker_loop(writer, receiver, batch_size, worker_stats))
            .map_err(|e| IoError::pipeline("spawn", e.to_string()))?;

        Ok(Self {
            sender,
            worker: Some(worker),
            stats,
        })
    }

    /// Queue a snapshot, blocking while the queue is full
    pub fn submit(&self, snapshot: StateSnapshot) -> IoResult<()> {
        {
            let mut stats = self.stats.lock();
            stats.total_requests += 1;
            stats.max_queue_length = stats.max_queue_length.max(self.sender.len() + 1);
        }
        self.sender
            .send(OutputRequest::Write(snapshot))
            .map_err(|_| IoError::pipeline("submit", "output writer has stopped"))
    }

    /// Ask the worker to write its buffer now
    pub fn flush(&self) -> IoResult<()> {
        self.sender
            .send(OutputRequest::Flush)
            .map_err(|_| IoError::pipeline("flush", "output writer has stopped"))
    }

    /// Current statistics
    pub fn stats(&self) -> PipelineStats {
        self.stats.lock().clone()
    }

    /// Drain, stop the worker and surface any write error
    pub fn finish(mut self) -> IoResult<PipelineStats> {
        self.shutdown()?;
        Ok(self.stats())
    }

    fn shutdown(&mut self) -> IoResult<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        // a stopped worker has already dropped its receiver
        let _ = self.sender.send(OutputRequest::Shutdown);
        match worker.join() {
            Ok(result) => result,
            Err(_) => Err(IoError::pipeline("join", "output writer panicked")),
        }
    }

    fn worker_loop(
        mut writer: ArchiveWriter,
        receiver: Receiver<OutputRequest>,
        batch_size: usize,
        stats: Arc<Mutex<PipelineStats>>,
    ) -> IoResult<()> {
        let mut batch: Vec<StateSnapshot> = Vec::with_capacity(batch_size);

        let mut write_batch = |batch: &mut Vec<StateSnapshot>| -> IoResult<()> {
            if batch.is_empty() {
                return Ok(());
            }
            let start = Instant::now();
            let result = writer.append(batch);
            let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

            let mut s = stats.lock();
            match &result {
                Ok(bytes) => {
                    s.completed_requests += batch.len() as u64;
                    s.total_bytes_written += bytes;
                    s.batches += 1;
                    s.average_write_time_ms = (s.average_write_time_ms * (s.batches - 1) as f64
                        + elapsed_ms)
                        / s.batches as f64;
                }
                Err(e) => {
                    s.failed_requests += batch.len() as u64;
                    error!(path = %writer.path().display(), "archive append failed: {}", e);
                }
            }
            batch.clear();
            result.map(|_| ())
        };

        while let Ok(request) = receiver.recv() {
            match request {
                OutputRequest::Write(snapshot) => {
                    batch.push(snapshot);
                    if batch.len() >= batch_size {
                        write_batch(&mut batch)?;
                    }
                }
                OutputRequest::Flush => write_batch(&mut batch)?,
                OutputRequest::Shutdown => break,
            }
        }
        write_batch(&mut batch)?;
        info!(path = %writer.path().display(), records = writer.records(), "output writer finished");
        debug!("output writer thread exiting");
        Ok(())
    }
}

impl Drop for OutputPipeline {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("output pipeline dropped with error: {}", e);
        }
    }
}
