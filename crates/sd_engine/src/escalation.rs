// crates/sd_engine/src/escalation.rs

//! Failure escalation controller
//!
//! Wraps one integrator call and retries it with increasingly aggressive
//! corrections when the integrator diverges.
//!
//! ```text
//! level 0  Unmodified       integrate as is
//! level 1  ResetShallow     zero snow shallower than depth_level1, retry
//! level 2  ResetDeeper      zero snow shallower than depth_level2, retry
//! level 3  RelaxThresholds  integrate with relaxed mass thresholds, repeat
//! ```
//!
//! Level 3 repeats until it succeeds or `max_consecutive_relaxations`
//! consecutive relaxed attempts have failed. The consecutive counter lives
//! across timesteps and only resets after a success at level 0 or 1.
//! Relaxed thresholds apply to a copy of the ladder, so the caller's ladder
//! is unchanged whatever happens. State corrections of levels 1 and 2 are
//! kept.

use std::fmt;

use sd_config::EscalationConfig;
use sd_forcing::NormalizedSample;
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::integrator::{IntegrationError, Integrator, IntegratorParams};
use crate::ladder::TimestepLadder;
use crate::state::StateRecord;

/// Escalation ladder level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EscalationLevel {
    /// Integrate unmodified
    Unmodified = 0,
    /// Shallow-snow reset at the first threshold
    ResetShallow = 1,
    /// Shallow-snow reset at the second threshold
    ResetDeeper = 2,
    /// Relaxed mass thresholds
    RelaxThresholds = 3,
}

impl EscalationLevel {
    /// Level after a divergence
    pub fn next(self) -> Self {
        match self {
            Self::Unmodified => Self::ResetShallow,
            Self::ResetShallow => Self::ResetDeeper,
            Self::ResetDeeper | Self::RelaxThresholds => Self::RelaxThresholds,
        }
    }

    /// Whether a success at this level clears the consecutive counter
    pub fn resets_counter(self) -> bool {
        self <= Self::ResetShallow
    }
}

impl fmt::Display for EscalationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unmodified => "unmodified",
            Self::ResetShallow => "reset shallow snow",
            Self::ResetDeeper => "reset deeper snow",
            Self::RelaxThresholds => "relax mass thresholds",
        };
        write!(f, "level {} ({})", *self as u8, name)
    }
}

/// Escalation parameters
#[derive(Debug, Clone, PartialEq)]
pub struct EscalationPolicy {
    /// Level 1 depth threshold
    pub depth_level1: f64,
    /// Level 2 depth threshold
    pub depth_level2: f64,
    /// Level 3 thresholds `[normal, medium, small]`
    pub relaxed_thresholds: [f64; 3],
    /// Consecutive level-3 attempts allowed
    pub max_consecutive_relaxations: u32,
    /// Temperature written into reset cells
    pub reset_temperature: f64,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self::from(&EscalationConfig::default())
    }
}

impl From<&EscalationConfig> for EscalationPolicy {
    fn from(config: &EscalationConfig) -> Self {
        Self {
            depth_level1: config.depth_level1,
            depth_level2: config.depth_level2,
            relaxed_thresholds: [
                config.relaxed_normal,
                config.relaxed_medium,
                config.relaxed_small,
            ],
            max_consecutive_relaxations: config.max_consecutive_relaxations,
            reset_temperature: config.reset_temperature,
        }
    }
}

/// Escalation counters over a run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EscalationStats {
    /// Integrator calls, retries included
    pub attempts: u64,
    /// Successful steps per level
    pub successes: [u64; 4],
    /// Cells zeroed by shallow-snow resets
    pub reset_cells: u64,
    /// Highest consecutive-relaxation count seen
    pub max_consecutive: u32,
}

/// Failure escalation controller
#[derive(Debug, Clone)]
pub struct EscalationController {
    policy: EscalationPolicy,
    consecutive: u32,
    stats: EscalationStats,
}

impl EscalationController {
    /// Controller with a fresh counter
    pub fn new(policy: EscalationPolicy) -> Self {
        Self {
            policy,
            consecutive: 0,
            stats: EscalationStats::default(),
        }
    }

    /// Parameters
    pub fn policy(&self) -> &EscalationPolicy {
        &self.policy
    }

    /// Current consecutive relaxed-attempt count
    pub fn consecutive_relaxations(&self) -> u32 {
        self.consecutive
    }

    /// Counters so far
    pub fn stats(&self) -> &EscalationStats {
        &self.stats
    }

    /// Integrate one step, escalating on divergence
    ///
    /// Returns the level that succeeded.
    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &mut self,
        integrator: &mut dyn Integrator,
        left: &NormalizedSample,
        right: &NormalizedSample,
        state: &mut StateRecord,
        ladder: &TimestepLadder,
        params: &IntegratorParams,
        first_step: usize,
    ) -> EngineResult<EscalationLevel> {
        let key = right.key();
        let relaxed = ladder.with_thresholds(self.policy.relaxed_thresholds);
        let mut level = EscalationLevel::Unmodified;

        loop {
            let active = if level == EscalationLevel::RelaxThresholds {
                if self.consecutive >= self.policy.max_consecutive_relaxations {
                    return Err(EngineError::RetryBudgetExhausted {
                        key,
                        attempts: self.consecutive,
                    });
                }
                self.consecutive += 1;
                self.stats.max_consecutive = self.stats.max_consecutive.max(self.consecutive);
                &relaxed
            } else {
                ladder
            };

            self.stats.attempts += 1;
            match integrator.integrate(left, right, state, active, params, first_step) {
                Ok(()) => {
                    if level.resets_counter() {
                        self.consecutive = 0;
                    }
                    self.stats.successes[level as usize] += 1;
                    if level == EscalationLevel::Unmodified {
                        debug!(key = %key, "integration succeeded");
                    } else {
                        info!(key = %key, level = %level, "integration recovered");
                    }
                    return Ok(level);
                }
                Err(IntegrationError::Fatal(message)) => {
                    return Err(EngineError::IntegratorFatal { key, message });
                }
                Err(err @ IntegrationError::Diverged { .. }) => {
                    let next = level.next();
                    warn!(
                        key = %key,
                        from = %level,
                        to = %next,
                        consecutive = self.consecutive,
                        "{}, escalating",
                        err
                    );
                    let threshold = match next {
                        EscalationLevel::ResetShallow => Some(self.policy.depth_level1),
                        EscalationLevel::ResetDeeper => Some(self.policy.depth_level2),
                        _ => None,
                    };
                    if let Some(threshold) = threshold {
                        let cells = state.reset_shallow(threshold, self.policy.reset_temperature);
                        self.stats.reset_cells += cells as u64;
                    }
                    level = next;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrator::PassthroughIntegrator;
    use chrono::NaiveDate;
    use sd_config::OutputMode;
    use sd_forcing::{ForcingSample, Normalizer};
    use sd_foundation::grid::Shape;

    fn sample(hour: u32) -> NormalizedSample {
        let key = NaiveDate::from_ymd_opt(2018, 1, 1)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap();
        let raw = ForcingSample::assemble(key, Shape::new(1, 1), Vec::new()).unwrap();
        Normalizer::new(Shape::new(1, 1), -2.5).normalize(raw)
    }

    /// Fails the first `failures` calls
    struct FailingFirst {
        failures: usize,
        calls: usize,
    }

    impl Integrator for FailingFirst {
        fn integrate(
            &mut self,
            _left: &NormalizedSample,
            _right: &NormalizedSample,
            _state: &mut StateRecord,
            _ladder: &TimestepLadder,
            _params: &IntegratorParams,
            _first_step: usize,
        ) -> Result<(), IntegrationError> {
            self.calls += 1;
            if self.calls <= self.failures {
                Err(IntegrationError::diverged("stub"))
            } else {
                Ok(())
            }
        }
    }

    fn ladder() -> TimestepLadder {
        TimestepLadder::new(60, [60.0, 10.0, 1.0], OutputMode::Data).unwrap()
    }

    #[test]
    fn test_level_order() {
        assert_eq!(EscalationLevel::Unmodified.next(), EscalationLevel::ResetShallow);
        assert_eq!(EscalationLevel::ResetDeeper.next(), EscalationLevel::RelaxThresholds);
        assert_eq!(EscalationLevel::RelaxThresholds.next(), EscalationLevel::RelaxThresholds);
        assert!(EscalationLevel::ResetShallow.resets_counter());
        assert!(!EscalationLevel::ResetDeeper.resets_counter());
    }

    #[test]
    fn test_success_first_try() {
        let mut controller = EscalationController::new(EscalationPolicy::default());
        let mut state = StateRecord::flat(Shape::new(1, 1), 0.0, 0.0);
        let level = controller
            .run(
                &mut PassthroughIntegrator::new(),
                &sample(0),
                &sample(1),
                &mut state,
                &ladder(),
                &IntegratorParams::default(),
                1,
            )
            .unwrap();
        assert_eq!(level, EscalationLevel::Unmodified);
        assert_eq!(controller.stats().attempts, 1);
        assert_eq!(controller.stats().reset_cells, 0);
    }

    #[test]
    fn test_counter_survives_level_two_and_three() {
        let mut controller = EscalationController::new(EscalationPolicy::default());
        let mut state = StateRecord::flat(Shape::new(1, 1), 0.0, 0.0);

        // fails at 0, 1, 2 and the first relaxed attempt
        let mut integrator = FailingFirst { failures: 4, calls: 0 };
        let level = controller
            .run(&mut integrator, &sample(0), &sample(1), &mut state, &ladder(), &IntegratorParams::default(), 1)
            .unwrap();
        assert_eq!(level, EscalationLevel::RelaxThresholds);
        assert_eq!(controller.consecutive_relaxations(), 2);

        // next step succeeds immediately and clears the counter
        let level = controller
            .run(&mut integrator, &sample(1), &sample(2), &mut state, &ladder(), &IntegratorParams::default(), 2)
            .unwrap();
        assert_eq!(level, EscalationLevel::Unmodified);
        assert_eq!(controller.consecutive_relaxations(), 0);
        assert_eq!(controller.stats().successes, [1, 0, 0, 1]);
    }

    #[test]
    fn test_fatal_is_not_retried() {
        struct Fatal;
        impl Integrator for Fatal {
            fn integrate(
                &mut self,
                _left: &NormalizedSample,
                _right: &NormalizedSample,
                _state: &mut StateRecord,
                _ladder: &TimestepLadder,
                _params: &IntegratorParams,
                _first_step: usize,
            ) -> Result<(), IntegrationError> {
                Err(IntegrationError::Fatal("bad constants".into()))
            }
        }

        let mut controller = EscalationController::new(EscalationPolicy::default());
        let mut state = StateRecord::flat(Shape::new(1, 1), 0.0, 0.0);
        let err = controller
            .run(&mut Fatal, &sample(0), &sample(1), &mut state, &ladder(), &IntegratorParams::default(), 1)
            .unwrap_err();
        assert!(matches!(err, EngineError::IntegratorFatal { .. }));
        assert_eq!(controller.stats().attempts, 1);
    }
}
