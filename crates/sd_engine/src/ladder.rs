// crates/sd_engine/src/ladder.rs

//! Timestep info ladder
//!
//! Four resolution levels the integrator may subdivide a data step into.
//!
//! ```text
//! data   (configured)  ─ intervals = data / 60 min   (0 when sub-hourly)
//! normal (60 min)      ─ intervals = 4
//! medium (15 min)      ─ intervals = 15
//! small  (1 min)
//! ```
//!
//! Each sub-data level carries a mass-change threshold above which the
//! integrator drops to the next finer level. Thresholds are the only part
//! the escalation controller ever changes, and only on a copy.

use sd_config::{OutputMode, RunConfig};

use crate::error::{EngineError, EngineResult};

/// Emit output at whole-step boundaries
pub const WHOLE: u8 = 0x1;
/// Emit output at divided sub-step boundaries
pub const DIVIDED: u8 = 0x2;

/// Normal level duration [min]
pub const NORMAL_MINUTES: u32 = 60;
/// Medium level duration [min]
pub const MEDIUM_MINUTES: u32 = 15;
/// Small level duration [min]
pub const SMALL_MINUTES: u32 = 1;

/// Ladder level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LadderLevel {
    /// Forcing data step
    Data = 0,
    /// One hour
    Normal = 1,
    /// Fifteen minutes
    Medium = 2,
    /// One minute
    Small = 3,
}

impl LadderLevel {
    /// All levels, coarse to fine
    pub const ALL: [LadderLevel; 4] = [Self::Data, Self::Normal, Self::Medium, Self::Small];
}

/// One ladder level
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelInfo {
    /// Duration [min]
    pub minutes: u32,
    /// Subdivisions of the next-coarser level
    pub intervals: u32,
    /// Mass-change threshold (0 for the data level)
    pub threshold: f64,
    /// `WHOLE` / `DIVIDED` flags
    pub output: u8,
}

impl LevelInfo {
    /// Duration [s]
    pub fn seconds(&self) -> f64 {
        self.minutes as f64 * 60.0
    }
}

/// Timestep info ladder
#[derive(Debug, Clone, PartialEq)]
pub struct TimestepLadder {
    levels: [LevelInfo; 4],
}

impl TimestepLadder {
    /// Build the ladder for a data step and thresholds `[normal, medium, small]`
    pub fn new(data_minutes: u32, thresholds: [f64; 3], mode: OutputMode) -> EngineResult<Self> {
        if data_minutes == 0 {
            return Err(EngineError::Ladder("data step must be positive".into()));
        }
        if data_minutes >= NORMAL_MINUTES && data_minutes % NORMAL_MINUTES != 0 {
            return Err(EngineError::Ladder(format!(
                "data step {} min is not a whole number of hours",
                data_minutes
            )));
        }
        if data_minutes < NORMAL_MINUTES && NORMAL_MINUTES % data_minutes != 0 {
            return Err(EngineError::Ladder(format!(
                "data step {} min does not divide one hour",
                data_minutes
            )));
        }
        if let Some(t) = thresholds.iter().find(|t| !(**t > 0.0)) {
            return Err(EngineError::Ladder(format!("mass threshold {} must be positive", t)));
        }

        let mut levels = [
            LevelInfo {
                minutes: data_minutes,
                intervals: 0,
                threshold: 0.0,
                output: 0,
            },
            LevelInfo {
                minutes: NORMAL_MINUTES,
                intervals: data_minutes / NORMAL_MINUTES,
                threshold: thresholds[0],
                output: 0,
            },
            LevelInfo {
                minutes: MEDIUM_MINUTES,
                intervals: NORMAL_MINUTES / MEDIUM_MINUTES,
                threshold: thresholds[1],
                output: 0,
            },
            LevelInfo {
                minutes: SMALL_MINUTES,
                intervals: MEDIUM_MINUTES / SMALL_MINUTES,
                threshold: thresholds[2],
                output: 0,
            },
        ];

        match mode {
            OutputMode::Data => levels[0].output = DIVIDED,
            OutputMode::Normal => levels[1].output = WHOLE | DIVIDED,
            OutputMode::All => {
                for level in &mut levels[1..] {
                    level.output = WHOLE;
                }
            }
        }

        let ladder = Self { levels };
        ladder.check_divides()?;
        Ok(ladder)
    }

    /// Ladder from the run configuration
    pub fn from_config(config: &RunConfig) -> EngineResult<Self> {
        Self::new(
            config.time.time_step,
            [
                config.ladder.thresh_normal,
                config.ladder.thresh_medium,
                config.ladder.thresh_small,
            ],
            config.output.output_mode(),
        )
    }

    fn check_divides(&self) -> EngineResult<()> {
        for pair in self.levels.windows(2) {
            let (parent, child) = (pair[0], pair[1]);
            if child.intervals == 0 {
                continue;
            }
            if child.minutes * child.intervals != parent.minutes {
                return Err(EngineError::Ladder(format!(
                    "{} × {} min does not make up the {} min parent level",
                    child.intervals, child.minutes, parent.minutes
                )));
            }
        }
        Ok(())
    }

    /// One level
    pub fn level(&self, level: LadderLevel) -> &LevelInfo {
        &self.levels[level as usize]
    }

    /// Data step [s]
    pub fn data_seconds(&self) -> f64 {
        self.levels[0].seconds()
    }

    /// Mass thresholds `[normal, medium, small]`
    pub fn thresholds(&self) -> [f64; 3] {
        [
            self.levels[1].threshold,
            self.levels[2].threshold,
            self.levels[3].threshold,
        ]
    }

    /// Copy with different mass thresholds
    pub fn with_thresholds(&self, thresholds: [f64; 3]) -> Self {
        let mut ladder = self.clone();
        for (level, t) in ladder.levels[1..].iter_mut().zip(thresholds) {
            level.threshold = t;
        }
        ladder
    }
}
