// crates/sd_engine/src/pipeline.rs

//! Execution modes
//!
//! Both modes drive the same [`IntegratorDriver`] step loop and produce
//! bit-identical state sequences for identical forcing.
//!
//! # Pull mode
//!
//! The driver calls the producer itself, one variable at a time, on the
//! calling thread.
//!
//! # Concurrent mode
//!
//! ```text
//!  sd-forcing-<var> ×N ──put──> TimestepBroker ──get──> driver (calling thread)
//!                                     ^                        │
//!                                     └── sd-queue-cleaner <── ack
//! ```
//!
//! One producer thread per streamed variable, a queue cleaner thread, and
//! the driver on the calling thread. All threads are scoped to the call.
//! Any failure closes the broker so every blocked thread wakes up; the
//! first real error is returned.

use std::thread;

use sd_config::RunConfig;
use sd_forcing::{ack_channel, ForcingProducer, ForcingVariable, QueueCleaner, TimestepBroker};
use sd_foundation::TimestepKey;
use sd_io::OutputSink;
use tracing::{debug, error, info};

use crate::driver::{BrokerSource, DirectSource, IntegratorDriver, RunSummary};
use crate::error::{EngineError, EngineResult};
use crate::integrator::Integrator;
use crate::state::StateRecord;
use crate::updater::DepthUpdater;

/// Thread name of the queue cleaner
pub const CLEANER_THREAD: &str = "sd-queue-cleaner";

/// Result of a complete run
#[derive(Debug)]
pub struct RunOutcome {
    /// Counters
    pub summary: RunSummary,
    /// Final state
    pub state: StateRecord,
}

/// Run every step in pull mode
pub fn run_single(
    driver: &mut IntegratorDriver,
    producer: &dyn ForcingProducer,
    integrator: &mut dyn Integrator,
    sink: &mut dyn OutputSink,
) -> EngineResult<RunSummary> {
    let mut source = DirectSource::new(producer, driver.variables().to_vec(), driver.shape());
    driver.run(&mut source, integrator, sink)
}

/// Run every step in concurrent mode
pub fn run_threaded(
    driver: &mut IntegratorDriver,
    producer: &dyn ForcingProducer,
    max_ahead: usize,
    integrator: &mut dyn Integrator,
    sink: &mut dyn OutputSink,
) -> EngineResult<RunSummary> {
    let variables = driver.variables().to_vec();
    let keys = driver.schedule().active_keys().to_vec();
    let shape = driver.shape();
    let broker = TimestepBroker::new(&variables, max_ahead);
    let (acks, ack_rx) = ack_channel();

    info!(
        producers = variables.len(),
        max_ahead,
        timesteps = keys.len(),
        "starting concurrent run"
    );

    thread::scope(|scope| {
        let mut producers = Vec::with_capacity(variables.len());
        for &variable in &variables {
            let name = producer_thread_name(variable);
            let (broker, keys) = (&broker, &keys);
            let spawned = thread::Builder::new()
                .name(name.clone())
                .spawn_scoped(scope, move || produce(producer, broker, variable, keys));
            match spawned {
                Ok(handle) => producers.push((name, handle)),
                Err(e) => {
                    broker.close();
                    return Err(EngineError::Worker {
                        name,
                        message: e.to_string(),
                    });
                }
            }
        }

        let cleaner = {
            let broker = &broker;
            thread::Builder::new()
                .name(CLEANER_THREAD.to_string())
                .spawn_scoped(scope, move || QueueCleaner::new(broker, ack_rx).run())
        };
        let cleaner = match cleaner {
            Ok(handle) => handle,
            Err(e) => {
                broker.close();
                return Err(EngineError::Worker {
                    name: CLEANER_THREAD.to_string(),
                    message: e.to_string(),
                });
            }
        };

        // the source owns the only ack sender; dropping it stops the cleaner
        let consumed = {
            let mut source = BrokerSource::new(&broker, variables.clone(), shape, acks);
            let result = driver.run(&mut source, integrator, sink);
            if let Err(e) = &result {
                error!(error = %e, "driver failed, closing broker");
                broker.close();
            }
            result
        };

        let mut producer_error: Option<EngineError> = None;
        for (name, handle) in producers {
            let result = handle.join().unwrap_or_else(|_| {
                Err(EngineError::Worker {
                    name: name.clone(),
                    message: "thread panicked".into(),
                })
            });
            if let Err(e) = result {
                debug!(thread = %name, error = %e, "producer stopped");
                if producer_error.as_ref().map_or(true, |p| p.is_broker_closed()) {
                    producer_error = Some(e);
                }
            }
        }

        let acknowledged = cleaner.join().map_err(|_| EngineError::Worker {
            name: CLEANER_THREAD.to_string(),
            message: "thread panicked".into(),
        })?;
        debug!(acknowledged, "queue cleaner finished");

        match (consumed, producer_error) {
            (Err(e), Some(p)) if e.is_broker_closed() && !p.is_broker_closed() => Err(p),
            (Err(e), _) => Err(e),
            (Ok(_), Some(p)) if !p.is_broker_closed() => Err(p),
            (Ok(summary), _) => Ok(summary),
        }
    })
}

/// Build the driver from `config`, run it in the configured mode and
/// finish the sink
///
/// The sink is finished on the error path too; the run error wins over a
/// finish error.
pub fn run_pipeline(
    config: &RunConfig,
    state: StateRecord,
    producer: &dyn ForcingProducer,
    integrator: &mut dyn Integrator,
    sink: &mut dyn OutputSink,
) -> EngineResult<RunOutcome> {
    let mut driver = IntegratorDriver::new(config, state)?;
    if let Some(path) = &config.update.file {
        let updater = DepthUpdater::from_file(
            path,
            config.update.default_density,
            config.escalation.reset_temperature,
        )?;
        info!(path = %path.display(), updates = updater.schedule().count(), "depth updates loaded");
        driver = driver.with_updater(updater);
    }
    producer.ensure_provides(driver.variables())?;

    let result = if config.forcing.threaded {
        run_threaded(&mut driver, producer, config.forcing.max_ahead, integrator, sink)
    } else {
        run_single(&mut driver, producer, integrator, sink)
    };

    match result {
        Ok(summary) => {
            sink.finish()?;
            info!(
                steps = summary.steps,
                flushes = summary.flushes,
                updates = summary.updates,
                "pipeline finished"
            );
            Ok(RunOutcome {
                summary,
                state: driver.into_state(),
            })
        }
        Err(e) => {
            if let Err(finish) = sink.finish() {
                error!(error = %finish, "sink finish failed after run error");
            }
            Err(e)
        }
    }
}

fn producer_thread_name(variable: ForcingVariable) -> String {
    format!("sd-forcing-{}", variable.name())
}

fn produce(
    producer: &dyn ForcingProducer,
    broker: &TimestepBroker,
    variable: ForcingVariable,
    keys: &[TimestepKey],
) -> EngineResult<()> {
    for key in keys {
        let published = producer
            .get(variable, key)
            .map_err(EngineError::from)
            .and_then(|value| broker.put(variable, *key, value).map_err(EngineError::from));
        if let Err(e) = published {
            if !e.is_broker_closed() {
                error!(variable = variable.name(), key = %key, error = %e, "producer failed, closing broker");
                broker.close();
            }
            return Err(e);
        }
    }
    debug!(variable = variable.name(), published = keys.len(), "producer finished");
    Ok(())
}
