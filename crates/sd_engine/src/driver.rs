// crates/sd_engine/src/driver.rs

//! Integrator driver
//!
//! Owns the timestep cursor, the sliding two-sample window and the state
//! record, and runs the step loop.
//!
//! # Step protocol
//!
//! ```text
//! initialize_first_step:  left  = normalize(fetch(keys[0]))        ack keys[0]
//! step(j), j = 1..=last:  right = normalize(fetch(keys[j]))
//!                         apply depth update at keys[j] (first_step = 1)
//!                         escalation.run(left, right, state, ladder, first_step)
//!                         left = right                              ack keys[j]
//!                         flush when (j · data_minutes) mod (freq · 60) == 0 or j == last
//! ```
//!
//! In-memory model types keep snow temperatures in K; flushed snapshots
//! carry them in °C like every other output, so a crash restart reads its
//! own output back in the units the initializer expects.
//!
//! The driver does not care where samples come from: [`DirectSource`]
//! pulls from a producer, [`BrokerSource`] takes them off the broker
//! queues. Both feed the same step loop, so the two execution modes only
//! differ in scheduling.

use crossbeam_channel::Sender;
use sd_config::{ModelType, RunConfig};
use sd_forcing::{
    ForcingError, ForcingProducer, ForcingSample, ForcingVariable, NormalizedSample, Normalizer,
    TimestepBroker, FREEZE,
};
use sd_foundation::grid::Shape;
use sd_foundation::time::date_range;
use sd_foundation::TimestepKey;
use sd_io::{OutputSink, StateField, StateSnapshot, SNOW_BANDS};
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};
use crate::escalation::{EscalationController, EscalationLevel, EscalationPolicy, EscalationStats};
use crate::integrator::{Integrator, IntegratorParams};
use crate::ladder::TimestepLadder;
use crate::state::StateRecord;
use crate::updater::DepthUpdater;

// ============================================================================
// Forcing sources
// ============================================================================

/// Where the driver gets forcing samples
pub trait ForcingSource {
    /// Raw sample at `key`; missing variables are already zeros
    fn fetch(&mut self, key: &TimestepKey) -> EngineResult<ForcingSample>;

    /// `key` is fully consumed
    fn acknowledge(&mut self, _key: &TimestepKey) -> EngineResult<()> {
        Ok(())
    }
}

/// Pull mode: calls the producer for each variable
pub struct DirectSource<'a> {
    producer: &'a dyn ForcingProducer,
    variables: Vec<ForcingVariable>,
    shape: Shape,
}

impl<'a> DirectSource<'a> {
    /// Source over `producer`
    pub fn new(producer: &'a dyn ForcingProducer, variables: Vec<ForcingVariable>, shape: Shape) -> Self {
        Self {
            producer,
            variables,
            shape,
        }
    }
}

impl ForcingSource for DirectSource<'_> {
    fn fetch(&mut self, key: &TimestepKey) -> EngineResult<ForcingSample> {
        let mut slices = Vec::with_capacity(self.variables.len());
        for variable in &self.variables {
            slices.push((*variable, self.producer.get(*variable, key)?));
        }
        Ok(ForcingSample::assemble(*key, self.shape, slices)?)
    }
}

/// Concurrent mode: takes samples off the broker queues
pub struct BrokerSource<'a> {
    broker: &'a TimestepBroker,
    variables: Vec<ForcingVariable>,
    shape: Shape,
    acks: Sender<TimestepKey>,
}

impl<'a> BrokerSource<'a> {
    /// Source over `broker`, acknowledging on `acks`
    pub fn new(
        broker: &'a TimestepBroker,
        variables: Vec<ForcingVariable>,
        shape: Shape,
        acks: Sender<TimestepKey>,
    ) -> Self {
        Self {
            broker,
            variables,
            shape,
            acks,
        }
    }
}

impl ForcingSource for BrokerSource<'_> {
    fn fetch(&mut self, key: &TimestepKey) -> EngineResult<ForcingSample> {
        let mut slices = Vec::with_capacity(self.variables.len());
        for variable in &self.variables {
            slices.push((*variable, self.broker.get(*variable, key)?));
        }
        Ok(ForcingSample::assemble(*key, self.shape, slices)?)
    }

    fn acknowledge(&mut self, key: &TimestepKey) -> EngineResult<()> {
        self.acks
            .send(*key)
            .map_err(|_| EngineError::Forcing(ForcingError::AckClosed))
    }
}

// ============================================================================
// Schedule
// ============================================================================

/// Timestep sequence and output cadence
#[derive(Debug, Clone, PartialEq)]
pub struct RunSchedule {
    keys: Vec<TimestepKey>,
    data_minutes: u32,
    output_frequency_hours: u32,
    last_step: usize,
}

impl RunSchedule {
    /// Schedule over `keys`; step `j` integrates `keys[j-1] → keys[j]`
    pub fn new(
        keys: Vec<TimestepKey>,
        data_minutes: u32,
        output_frequency_hours: u32,
        run_for_nsteps: Option<usize>,
    ) -> Self {
        let available = keys.len().saturating_sub(1);
        let last_step = run_for_nsteps.map_or(available, |n| n.min(available));
        Self {
            keys,
            data_minutes,
            output_frequency_hours,
            last_step,
        }
    }

    /// Schedule from the run configuration
    pub fn from_config(config: &RunConfig) -> EngineResult<Self> {
        let keys = date_range(config.time.start, config.time.end, config.time.time_step)?;
        Ok(Self::new(
            keys,
            config.time.time_step,
            config.output.frequency,
            config.time.run_for_nsteps,
        ))
    }

    /// All keys, window edge of step 0 included
    pub fn keys(&self) -> &[TimestepKey] {
        &self.keys
    }

    /// Keys the run actually touches (`keys[0..=last_step]`)
    pub fn active_keys(&self) -> &[TimestepKey] {
        let end = (self.last_step + 1).min(self.keys.len());
        &self.keys[..end]
    }

    /// Index of the final step (0 when there is nothing to integrate)
    pub fn last_step(&self) -> usize {
        self.last_step
    }

    /// Whether step `j` is followed by a flush
    pub fn is_output_step(&self, j: usize) -> bool {
        let period = self.output_frequency_hours as usize * 60;
        j == self.last_step || (period > 0 && (j * self.data_minutes as usize) % period == 0)
    }
}

// ============================================================================
// Driver
// ============================================================================

/// Result of one step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
    /// Step index
    pub step: usize,
    /// Timestep integrated to
    pub key: TimestepKey,
    /// Escalation level that succeeded
    pub level: EscalationLevel,
    /// Whether the state was flushed after the step
    pub flushed: bool,
    /// Whether a depth update was applied before the step
    pub updated: bool,
}

/// Result of a run
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// Steps integrated
    pub steps: usize,
    /// Flushes handed to the sink
    pub flushes: usize,
    /// Depth updates applied
    pub updates: usize,
    /// Escalation counters
    pub escalation: EscalationStats,
}

/// Integrator driver
pub struct IntegratorDriver {
    schedule: RunSchedule,
    variables: Vec<ForcingVariable>,
    normalizer: Normalizer,
    ladder: TimestepLadder,
    params: IntegratorParams,
    controller: EscalationController,
    updater: Option<DepthUpdater>,
    output_fields: Vec<StateField>,
    // subtracted from snow temperatures on flush
    output_temperature_offset: f64,
    state: StateRecord,
    left: Option<NormalizedSample>,
    steps: usize,
    flushes: usize,
    updates: usize,
}

impl IntegratorDriver {
    /// Driver for a run starting from `state`
    pub fn new(config: &RunConfig, state: StateRecord) -> EngineResult<Self> {
        let domain = Shape::new(config.domain.ny, config.domain.nx);
        if state.shape() != domain {
            return Err(EngineError::init(format!(
                "initial state is {}, domain is {}",
                state.shape(),
                domain
            )));
        }
        // the on-disk model writes fixed snow images
        let output_fields = match config.init.model_type {
            ModelType::Isnobal => SNOW_BANDS.to_vec(),
            _ => StateField::parse_list(&config.output.variables)?,
        };
        Ok(Self {
            schedule: RunSchedule::from_config(config)?,
            variables: ForcingVariable::streamed().collect(),
            normalizer: Normalizer::new(domain, config.forcing.soil_temp),
            ladder: TimestepLadder::from_config(config)?,
            params: IntegratorParams::from_config(config),
            controller: EscalationController::new(EscalationPolicy::from(&config.escalation)),
            updater: None,
            output_fields,
            output_temperature_offset: if config.init.model_type.is_in_memory() {
                FREEZE
            } else {
                0.0
            },
            state,
            left: None,
            steps: 0,
            flushes: 0,
            updates: 0,
        })
    }

    /// Apply depth updates during the run
    pub fn with_updater(mut self, updater: DepthUpdater) -> Self {
        self.updater = Some(updater);
        self
    }

    /// Timestep sequence
    pub fn schedule(&self) -> &RunSchedule {
        &self.schedule
    }

    /// Streamed forcing variables
    pub fn variables(&self) -> &[ForcingVariable] {
        &self.variables
    }

    /// Domain shape
    pub fn shape(&self) -> Shape {
        self.state.shape()
    }

    /// Current state
    pub fn state(&self) -> &StateRecord {
        &self.state
    }

    /// Take the state out of the driver
    pub fn into_state(self) -> StateRecord {
        self.state
    }

    /// Left edge of the window
    pub fn left(&self) -> Option<&NormalizedSample> {
        self.left.as_ref()
    }

    /// Steps integrated so far
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Escalation controller
    pub fn controller(&self) -> &EscalationController {
        &self.controller
    }

    /// Load the first sample as the left window edge
    pub fn initialize_first_step(&mut self, source: &mut dyn ForcingSource) -> EngineResult<()> {
        let key = *self
            .schedule
            .keys()
            .first()
            .ok_or_else(|| EngineError::init("empty timestep sequence"))?;
        let raw = source.fetch(&key)?;
        self.left = Some(self.normalizer.normalize(raw));
        source.acknowledge(&key)?;
        info!(key = %key, steps = self.schedule.last_step(), "first timestep loaded");
        Ok(())
    }

    /// Integrate step `j` (`keys[j-1] → keys[j]`)
    pub fn step(
        &mut self,
        j: usize,
        source: &mut dyn ForcingSource,
        integrator: &mut dyn Integrator,
        sink: &mut dyn OutputSink,
    ) -> EngineResult<StepReport> {
        let key = *self
            .schedule
            .keys()
            .get(j)
            .ok_or_else(|| EngineError::init(format!("step {} is past the end of the run", j)))?;
        let left = self
            .left
            .take()
            .ok_or_else(|| EngineError::init("step called before initialize_first_step"))?;

        let right = self.normalizer.normalize(source.fetch(&key)?);

        let mut first_step = j;
        let mut updated = false;
        if let Some(updater) = &self.updater {
            if updater.is_scheduled(&key) {
                updater.apply(&key, &mut self.state)?;
                first_step = 1;
                updated = true;
                self.updates += 1;
            }
        }

        let level = self.controller.run(
            integrator,
            &left,
            &right,
            &mut self.state,
            &self.ladder,
            &self.params,
            first_step,
        )?;

        self.left = Some(right);
        self.steps += 1;
        source.acknowledge(&key)?;

        let flushed = self.schedule.is_output_step(j);
        if flushed {
            sink.flush(self.output_snapshot(key))?;
            self.state.reset_time_since_out();
            self.flushes += 1;
            info!(key = %key, step = j, fields = self.output_fields.len(), "state flushed");
        }

        debug!(key = %key, step = j, level = %level, "step finished");
        Ok(StepReport {
            step: j,
            key,
            level,
            flushed,
            updated,
        })
    }

    /// Run every remaining step
    pub fn run(
        &mut self,
        source: &mut dyn ForcingSource,
        integrator: &mut dyn Integrator,
        sink: &mut dyn OutputSink,
    ) -> EngineResult<RunSummary> {
        if self.left.is_none() {
            self.initialize_first_step(source)?;
        }
        for j in (self.steps + 1)..=self.schedule.last_step() {
            self.step(j, source, integrator, sink)?;
        }
        info!(
            steps = self.steps,
            flushes = self.flushes,
            integrator = integrator.name(),
            "run finished"
        );
        Ok(self.summary())
    }

    /// Snapshot of the output fields, snow temperatures in °C
    pub fn output_snapshot(&self, key: TimestepKey) -> StateSnapshot {
        let mut snapshot = self.state.snapshot(key, &self.output_fields);
        let offset = self.output_temperature_offset;
        if offset != 0.0 {
            for field in StateField::TEMPERATURES {
                if let Some(g) = snapshot.fields.get_mut(&field) {
                    g.mapv_inplace(|v| v - offset);
                }
            }
        }
        snapshot
    }

    /// Counters so far
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            steps: self.steps,
            flushes: self.flushes,
            updates: self.updates,
            escalation: self.controller.stats().clone(),
        }
    }
}
