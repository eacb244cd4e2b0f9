// crates/sd_engine/src/integrator.rs

//! Integrator interface
//!
//! The snowpack physics is an external, opaque integrator. The engine only
//! relies on this contract:
//!
//! - `integrate` advances `state` in place from the left to the right
//!   forcing sample, subdividing with `ladder` as needed;
//! - `first_step == 1` tells the integrator that its sub-step history is not
//!   continuous (first step of a run, or state changed by an update);
//! - a numerical blow-up is reported as [`IntegrationError::Diverged`],
//!   anything else as [`IntegrationError::Fatal`].

use std::collections::BTreeMap;

use sd_config::RunConfig;
use sd_forcing::NormalizedSample;
use thiserror::Error;

use crate::ladder::TimestepLadder;
use crate::state::StateRecord;

/// Integrator failure
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IntegrationError {
    /// Numerical divergence, retryable
    #[error("diverged{}: {message}", at_pixel(.pixel))]
    Diverged {
        /// Offending pixel, if known
        pixel: Option<(usize, usize)>,
        /// Message
        message: String,
    },
    /// Anything else, ends the run
    #[error("fatal: {0}")]
    Fatal(String),
}

impl IntegrationError {
    /// Divergence without pixel information
    pub fn diverged(message: impl Into<String>) -> Self {
        Self::Diverged {
            pixel: None,
            message: message.into(),
        }
    }
}

fn at_pixel(pixel: &Option<(usize, usize)>) -> String {
    match pixel {
        Some((y, x)) => format!(" at pixel ({}, {})", y, x),
        None => String::new(),
    }
}

/// Parameters passed through to the integrator unchanged
#[derive(Debug, Clone, PartialEq)]
pub struct IntegratorParams {
    /// Named constants (measurement heights, active layer, ...)
    pub constants: BTreeMap<String, f64>,
    /// Thread-count hint
    pub threads: usize,
}

impl IntegratorParams {
    /// Parameters from the run configuration
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            constants: config.integrator.constants.clone(),
            threads: config.integrator.threads,
        }
    }

    /// One constant
    pub fn constant(&self, name: &str) -> Option<f64> {
        self.constants.get(name).copied()
    }
}

impl Default for IntegratorParams {
    fn default() -> Self {
        Self {
            constants: BTreeMap::new(),
            threads: 1,
        }
    }
}

/// Snowpack integrator
pub trait Integrator: Send {
    /// Advance `state` by one data step
    fn integrate(
        &mut self,
        left: &NormalizedSample,
        right: &NormalizedSample,
        state: &mut StateRecord,
        ladder: &TimestepLadder,
        params: &IntegratorParams,
        first_step: usize,
    ) -> Result<(), IntegrationError>;

    /// Name for logs
    fn name(&self) -> &str {
        "integrator"
    }
}

/// Integrator that only advances the run clock
///
/// Used by dry runs to exercise the pipeline without the external physics.
#[derive(Debug, Default, Clone)]
pub struct PassthroughIntegrator {
    calls: usize,
}

impl PassthroughIntegrator {
    /// New pass-through integrator
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of integration calls
    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl Integrator for PassthroughIntegrator {
    fn integrate(
        &mut self,
        _left: &NormalizedSample,
        _right: &NormalizedSample,
        state: &mut StateRecord,
        ladder: &TimestepLadder,
        _params: &IntegratorParams,
        _first_step: usize,
    ) -> Result<(), IntegrationError> {
        self.calls += 1;
        state.advance_clock(ladder.data_seconds());
        Ok(())
    }

    fn name(&self) -> &str {
        "passthrough"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IntegrationError::Diverged {
            pixel: Some((3, 4)),
            message: "T_s below absolute zero".into(),
        };
        assert_eq!(err.to_string(), "diverged at pixel (3, 4): T_s below absolute zero");
        assert_eq!(IntegrationError::diverged("x").to_string(), "diverged: x");
    }

    #[test]
    fn test_params_from_config() {
        let start = chrono::NaiveDate::from_ymd_opt(2018, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let config = RunConfig::new(start, start, 60, 2, 2);
        let params = IntegratorParams::from_config(&config);
        assert_eq!(params.constant("z_u"), Some(5.0));
        assert_eq!(params.constant("max_h2o_vol"), Some(0.01));
        assert_eq!(params.threads, 1);
    }
}
