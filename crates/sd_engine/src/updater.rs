// crates/sd_engine/src/updater.rs

//! Out-of-band depth updates
//!
//! Observed snow depths injected into the state record before the
//! integrator runs a given timestep. The driver forces `first_step = 1` for
//! every step an update touches.

use std::collections::BTreeSet;
use std::path::Path;

use ndarray::{Array2, Zip};
use sd_foundation::TimestepKey;
use sd_io::{DepthObservations, StateField};
use tracing::info;

use crate::error::{EngineError, EngineResult};
use crate::state::StateRecord;

/// Applies observed depths at scheduled timesteps
#[derive(Debug, Clone)]
pub struct DepthUpdater {
    observations: DepthObservations,
    schedule: BTreeSet<TimestepKey>,
    default_density: f64,
    reset_temperature: f64,
}

impl DepthUpdater {
    /// Updater scheduled at every observation key
    pub fn new(observations: DepthObservations, default_density: f64, reset_temperature: f64) -> Self {
        let schedule = observations.grids.keys().copied().collect();
        Self {
            observations,
            schedule,
            default_density,
            reset_temperature,
        }
    }

    /// Load observations from a file
    pub fn from_file(path: &Path, default_density: f64, reset_temperature: f64) -> EngineResult<Self> {
        Ok(Self::new(
            DepthObservations::read(path)?,
            default_density,
            reset_temperature,
        ))
    }

    /// Replace the update schedule
    pub fn with_schedule(mut self, schedule: impl IntoIterator<Item = TimestepKey>) -> Self {
        self.schedule = schedule.into_iter().collect();
        self
    }

    /// Whether an update is scheduled at `key`
    pub fn is_scheduled(&self, key: &TimestepKey) -> bool {
        self.schedule.contains(key)
    }

    /// Scheduled keys
    pub fn schedule(&self) -> impl Iterator<Item = &TimestepKey> {
        self.schedule.iter()
    }

    /// Apply the observation at `key`, returns the number of updated cells
    ///
    /// Finite observations replace the depth. Cells left without snow get
    /// the shallow-snow reset; cells gaining snow with zero density get the
    /// default density.
    pub fn apply(&self, key: &TimestepKey, state: &mut StateRecord) -> EngineResult<usize> {
        let observed = self
            .observations
            .grids
            .get(key)
            .ok_or(EngineError::UpdateWithoutState { key: *key })?;
        if observed.dim() != state.shape().dim() {
            return Err(EngineError::Shape {
                field: format!("depth update at {}", key),
                expected: state.shape().dim(),
                actual: observed.dim(),
            });
        }

        let mask = state[StateField::Mask].clone();
        let mut depth = state[StateField::ZS].clone();
        let mut density = state[StateField::Rho].clone();
        let mut updated = 0usize;
        let mut cleared = Array2::from_elem(depth.dim(), false);

        Zip::from(&mut depth)
            .and(&mut density)
            .and(&mut cleared)
            .and(observed)
            .and(&mask)
            .for_each(|z, rho, clear, &obs, &m| {
                if !obs.is_finite() || m == 0.0 {
                    return;
                }
                updated += 1;
                if obs <= 0.0 {
                    *z = 0.0;
                    *clear = true;
                } else {
                    if *rho == 0.0 {
                        *rho = self.default_density;
                    }
                    *z = obs;
                }
            });

        state.set(StateField::ZS, depth)?;
        state.set(StateField::Rho, density)?;

        let cleared_count = state.reset_where(&cleared, self.reset_temperature);

        info!(key = %key, updated, cleared = cleared_count, "depth update applied");
        Ok(updated)
    }
}
