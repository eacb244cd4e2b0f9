// crates/sd_config/src/run_config.rs

//! RunConfig - full configuration of one simulation run
//!
//! Loaded from JSON. Every defaulted value has a `default_*` function so a
//! minimal file only needs the run dates and the domain shape.
//!
//! ```json
//! {
//!   "time": { "start": "2018-01-01T00:00:00", "end": "2018-01-02T00:00:00", "time_step": 60 },
//!   "domain": { "ny": 10, "nx": 12 }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Run dates and data time step
    pub time: TimeConfig,

    /// Domain shape and static fields
    pub domain: DomainConfig,

    /// Output cadence and destination
    #[serde(default)]
    pub output: OutputConfig,

    /// Mass thresholds of the timestep ladder
    #[serde(default)]
    pub ladder: LadderConfig,

    /// Failure escalation parameters
    #[serde(default)]
    pub escalation: EscalationConfig,

    /// Initial condition source
    #[serde(default)]
    pub init: InitConfig,

    /// Forcing stream settings
    #[serde(default)]
    pub forcing: ForcingConfig,

    /// Integrator pass-through settings
    #[serde(default)]
    pub integrator: IntegratorConfig,

    /// Out-of-band depth updates
    #[serde(default)]
    pub update: UpdateConfig,
}

// ============================================================================
// time
// ============================================================================

/// Run dates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeConfig {
    /// First timestep
    pub start: NaiveDateTime,

    /// Last timestep (inclusive)
    pub end: NaiveDateTime,

    /// Data time step [min]
    #[serde(default = "default_time_step")]
    pub time_step: u32,

    /// Stop after this many integration steps
    #[serde(default)]
    pub run_for_nsteps: Option<usize>,
}

fn default_time_step() -> u32 { 60 }

// ============================================================================
// domain
// ============================================================================

/// Domain shape and static fields
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainConfig {
    /// Rows
    pub ny: usize,

    /// Columns
    pub nx: usize,

    /// Gridded archive holding `mask`, `dem` and `roughness`
    #[serde(default)]
    pub topo_file: Option<PathBuf>,

    /// Uniform elevation when no topo file is given [m]
    #[serde(default)]
    pub elevation: f64,

    /// Uniform surface roughness when no topo file is given [m]
    #[serde(default = "default_roughness")]
    pub roughness: f64,
}

fn default_roughness() -> f64 { 0.005 }

impl DomainConfig {
    /// Uniform domain without topo file
    pub fn new(ny: usize, nx: usize) -> Self {
        Self {
            ny,
            nx,
            topo_file: None,
            elevation: 0.0,
            roughness: default_roughness(),
        }
    }
}

// ============================================================================
// output
// ============================================================================

/// Which ladder levels emit output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Data level, divided sub-steps
    #[default]
    Data,
    /// Normal level, whole and divided
    Normal,
    /// Normal, medium and small levels, whole steps
    All,
}

impl OutputMode {
    /// Parse a mode name; unknown names fall back to `Data`
    pub fn parse_lossy(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "normal" => Self::Normal,
            "all" => Self::All,
            _ => Self::Data,
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Flush frequency [h]
    #[serde(default = "default_frequency")]
    pub frequency: u32,

    /// Fields handed to the sink, integrator keys or archive names
    #[serde(default = "default_output_variables")]
    pub variables: Vec<String>,

    /// Output directory
    #[serde(default = "default_output_dir")]
    pub directory: PathBuf,

    /// Ladder output mode (`data`, `normal`, `all`)
    #[serde(default = "default_output_mode")]
    pub mode: String,

    /// Snapshots per archive append
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Snapshots queued before the driver blocks
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
}

fn default_frequency() -> u32 { 1 }
fn default_output_dir() -> PathBuf { PathBuf::from("output") }
fn default_output_mode() -> String { "data".to_string() }
fn default_batch_size() -> usize { 8 }
fn default_max_pending() -> usize { 32 }

fn default_output_variables() -> Vec<String> {
    [
        "thickness",
        "snow_density",
        "temp_surf",
        "temp_lower",
        "temp_snowcover",
        "water_saturation",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl OutputConfig {
    /// Parsed output mode
    pub fn output_mode(&self) -> OutputMode {
        OutputMode::parse_lossy(&self.mode)
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            frequency: default_frequency(),
            variables: default_output_variables(),
            directory: default_output_dir(),
            mode: default_output_mode(),
            batch_size: default_batch_size(),
            max_pending: default_max_pending(),
        }
    }
}

// ============================================================================
// ladder / escalation
// ============================================================================

/// Mass thresholds of the timestep ladder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LadderConfig {
    /// Normal level threshold [kg/m²]
    #[serde(default = "default_thresh_normal")]
    pub thresh_normal: f64,

    /// Medium level threshold [kg/m²]
    #[serde(default = "default_thresh_medium")]
    pub thresh_medium: f64,

    /// Small level threshold [kg/m²]
    #[serde(default = "default_thresh_small")]
    pub thresh_small: f64,
}

fn default_thresh_normal() -> f64 { 60.0 }
fn default_thresh_medium() -> f64 { 10.0 }
fn default_thresh_small() -> f64 { 1.0 }

impl Default for LadderConfig {
    fn default() -> Self {
        Self {
            thresh_normal: default_thresh_normal(),
            thresh_medium: default_thresh_medium(),
            thresh_small: default_thresh_small(),
        }
    }
}

/// Failure escalation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationConfig {
    /// Shallow-snow threshold of level 1 [m]
    #[serde(default = "default_depth_level1")]
    pub depth_level1: f64,

    /// Shallow-snow threshold of level 2 [m]
    #[serde(default = "default_depth_level2")]
    pub depth_level2: f64,

    /// Relaxed normal threshold of level 3
    #[serde(default = "default_relaxed_normal")]
    pub relaxed_normal: f64,

    /// Relaxed medium threshold of level 3
    #[serde(default = "default_relaxed_medium")]
    pub relaxed_medium: f64,

    /// Relaxed small threshold of level 3
    #[serde(default = "default_relaxed_small")]
    pub relaxed_small: f64,

    /// Consecutive level-3 attempts before the run fails
    #[serde(default = "default_max_relaxations")]
    pub max_consecutive_relaxations: u32,

    /// Temperature written into reset cells
    #[serde(default = "default_reset_temperature")]
    pub reset_temperature: f64,
}

fn default_depth_level1() -> f64 { 0.05 }
fn default_depth_level2() -> f64 { 0.07 }
fn default_relaxed_normal() -> f64 { 60.0 }
fn default_relaxed_medium() -> f64 { 20.0 }
fn default_relaxed_small() -> f64 { 10.0 }
fn default_max_relaxations() -> u32 { 73 }
fn default_reset_temperature() -> f64 { -75.0 }

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            depth_level1: default_depth_level1(),
            depth_level2: default_depth_level2(),
            relaxed_normal: default_relaxed_normal(),
            relaxed_medium: default_relaxed_medium(),
            relaxed_small: default_relaxed_small(),
            max_consecutive_relaxations: default_max_relaxations(),
            reset_temperature: default_reset_temperature(),
        }
    }
}

// ============================================================================
// init
// ============================================================================

/// Model type, decides where state lives between stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    /// On-disk model, needs a band-image init artifact
    Isnobal,
    /// In-memory model fed from stored forcing
    #[default]
    Ipysnobal,
    /// In-memory model fed by the live distributor
    SmrfIpysnobal,
}

impl ModelType {
    /// State kept in memory, temperatures in Kelvin
    pub fn is_in_memory(&self) -> bool {
        !matches!(self, Self::Isnobal)
    }
}

/// Init file encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitEncoding {
    /// Legacy band image, 7 or 8 bands
    Ipw,
    /// Legacy band image written as model output
    IpwOut,
    /// Gridded archive with integrator field names
    Netcdf,
    /// Time-indexed output archive
    NetcdfOut,
}

impl InitEncoding {
    /// Config name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ipw => "ipw",
            Self::IpwOut => "ipw_out",
            Self::Netcdf => "netcdf",
            Self::NetcdfOut => "netcdf_out",
        }
    }
}

/// Crash restart settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RestartConfig {
    /// Restart from the run's own output
    #[serde(default)]
    pub restart_crash: bool,

    /// Water-year hour of the output record to restart from
    #[serde(default)]
    pub restart_hour: Option<u32>,

    /// Cells shallower than this are reset [m]
    #[serde(default)]
    pub depth_threshold: Option<f64>,
}

/// Initial condition source
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InitConfig {
    /// Model type
    #[serde(default)]
    pub model_type: ModelType,

    /// Init file, zero state when absent
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Encoding of `file`
    #[serde(default)]
    pub encoding: Option<InitEncoding>,

    /// Crash restart
    #[serde(default)]
    pub restart: RestartConfig,
}

// ============================================================================
// forcing / integrator / update
// ============================================================================

/// Forcing stream settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForcingConfig {
    /// Uniform soil temperature [°C]
    #[serde(default = "default_soil_temp")]
    pub soil_temp: f64,

    /// Run producers and consumer on separate threads
    #[serde(default)]
    pub threaded: bool,

    /// Timesteps a producer may buffer ahead of the consumer
    #[serde(default = "default_max_ahead")]
    pub max_ahead: usize,

    /// Forcing table (CSV, one column per variable)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_soil_temp() -> f64 { -2.5 }
fn default_max_ahead() -> usize { 2 }

impl Default for ForcingConfig {
    fn default() -> Self {
        Self {
            soil_temp: default_soil_temp(),
            threaded: false,
            max_ahead: default_max_ahead(),
            file: None,
        }
    }
}

/// Values passed through to the integrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegratorConfig {
    /// Thread-count hint
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Named constants (measurement heights, active layer, ...)
    #[serde(default = "default_constants")]
    pub constants: BTreeMap<String, f64>,
}

fn default_threads() -> usize { 1 }

fn default_constants() -> BTreeMap<String, f64> {
    [
        ("z_u", 5.0),
        ("z_t", 5.0),
        ("z_g", 0.5),
        ("max_z_s_0", 0.25),
        ("max_h2o_vol", 0.01),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), *v))
    .collect()
}

impl Default for IntegratorConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            constants: default_constants(),
        }
    }
}

/// Out-of-band depth updates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Gridded archive of observed depths keyed by timestep
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Density given to cells that gain snow from an update [kg/m³]
    #[serde(default = "default_update_density")]
    pub default_density: f64,
}

fn default_update_density() -> f64 { 150.0 }

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            file: None,
            default_density: default_update_density(),
        }
    }
}

// ============================================================================
// load / validate
// ============================================================================

impl RunConfig {
    /// Config with default sections
    pub fn new(start: NaiveDateTime, end: NaiveDateTime, time_step: u32, ny: usize, nx: usize) -> Self {
        Self {
            time: TimeConfig {
                start,
                end,
                time_step,
                run_for_nsteps: None,
            },
            domain: DomainConfig::new(ny, nx),
            output: OutputConfig::default(),
            ladder: LadderConfig::default(),
            escalation: EscalationConfig::default(),
            init: InitConfig::default(),
            forcing: ForcingConfig::default(),
            integrator: IntegratorConfig::default(),
            update: UpdateConfig::default(),
        }
    }

    /// Load and validate a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::Io)?;
        Self::from_json(&content)
    }

    /// Parse and validate a JSON string
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: RunConfig =
            serde_json::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Output archive path
    pub fn archive_path(&self) -> PathBuf {
        self.output.directory.join("snow.sdar")
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_time()?;

        if self.domain.ny == 0 || self.domain.nx == 0 {
            return Err(ConfigError::invalid(
                "domain",
                format!("{}x{}", self.domain.ny, self.domain.nx),
                "domain must have at least one cell",
            ));
        }

        if self.output.frequency == 0 {
            return Err(ConfigError::invalid("output.frequency", 0, "must be positive"));
        }
        if self.output.batch_size == 0 {
            return Err(ConfigError::invalid("output.batch_size", 0, "must be positive"));
        }
        if self.output.max_pending == 0 {
            return Err(ConfigError::invalid("output.max_pending", 0, "must be positive"));
        }

        let thresholds = [
            ("ladder.thresh_normal", self.ladder.thresh_normal),
            ("ladder.thresh_medium", self.ladder.thresh_medium),
            ("ladder.thresh_small", self.ladder.thresh_small),
            ("escalation.relaxed_normal", self.escalation.relaxed_normal),
            ("escalation.relaxed_medium", self.escalation.relaxed_medium),
            ("escalation.relaxed_small", self.escalation.relaxed_small),
        ];
        for (key, value) in thresholds {
            if !(value > 0.0) {
                return Err(ConfigError::invalid(key, value, "threshold must be positive"));
            }
        }

        let esc = &self.escalation;
        if esc.depth_level1 < 0.0 || esc.depth_level2 < 0.0 {
            return Err(ConfigError::invalid(
                "escalation.depth_level1",
                esc.depth_level1,
                "depth thresholds must be non-negative",
            ));
        }
        if esc.depth_level1 > esc.depth_level2 {
            return Err(ConfigError::invalid(
                "escalation.depth_level2",
                esc.depth_level2,
                "level 2 threshold must not be below level 1",
            ));
        }
        if esc.max_consecutive_relaxations == 0 {
            return Err(ConfigError::invalid(
                "escalation.max_consecutive_relaxations",
                0,
                "must be positive",
            ));
        }

        let restart = &self.init.restart;
        if restart.restart_crash {
            if restart.restart_hour.is_none() {
                return Err(ConfigError::Missing("init.restart.restart_hour".into()));
            }
            match restart.depth_threshold {
                None => return Err(ConfigError::Missing("init.restart.depth_threshold".into())),
                Some(d) if d < 0.0 => {
                    return Err(ConfigError::invalid(
                        "init.restart.depth_threshold",
                        d,
                        "must be non-negative",
                    ))
                }
                Some(_) => {}
            }
        }
        if self.init.file.is_some() && self.init.encoding.is_none() {
            return Err(ConfigError::Missing("init.encoding".into()));
        }

        if self.forcing.max_ahead == 0 {
            return Err(ConfigError::invalid("forcing.max_ahead", 0, "must be positive"));
        }
        if self.integrator.threads == 0 {
            return Err(ConfigError::invalid("integrator.threads", 0, "must be positive"));
        }
        if self.update.default_density <= 0.0 {
            return Err(ConfigError::invalid(
                "update.default_density",
                self.update.default_density,
                "must be positive",
            ));
        }

        Ok(())
    }

    fn validate_time(&self) -> Result<(), ConfigError> {
        let step = self.time.time_step;
        if !(1..=3600).contains(&step) {
            return Err(ConfigError::invalid(
                "time.time_step",
                step,
                "must be within [1, 3600] minutes",
            ));
        }
        if step > 60 && step % 60 != 0 {
            return Err(ConfigError::invalid(
                "time.time_step",
                step,
                "steps above 60 minutes must be a whole number of hours",
            ));
        }
        if step < 60 && 60 % step != 0 {
            return Err(ConfigError::invalid(
                "time.time_step",
                step,
                "sub-hourly steps must divide 60 minutes",
            ));
        }

        if self.time.end < self.time.start {
            return Err(ConfigError::invalid(
                "time.end",
                self.time.end,
                "end must not be before start",
            ));
        }
        let span = (self.time.end - self.time.start).num_minutes();
        if span % i64::from(step) != 0 {
            return Err(ConfigError::invalid(
                "time.end",
                self.time.end,
                "run length must be a whole number of data steps",
            ));
        }
        if self.time.run_for_nsteps == Some(0) {
            return Err(ConfigError::invalid("time.run_for_nsteps", 0, "must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::io::Write;

    fn at(d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2018, 1, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = RunConfig::new(at(1, 0), at(2, 0), 60, 4, 5);
        assert!(config.validate().is_ok());
        assert_eq!(config.escalation.max_consecutive_relaxations, 73);
        assert_eq!(config.escalation.depth_level1, 0.05);
        assert_eq!(config.escalation.depth_level2, 0.07);
        assert_eq!(config.ladder.thresh_normal, 60.0);
    }

    #[test]
    fn test_time_step_range() {
        let mut config = RunConfig::new(at(1, 0), at(2, 0), 0, 4, 5);
        assert!(config.validate().is_err());
        config.time.time_step = 90;
        assert!(config.validate().is_err());
        config.time.time_step = 120;
        assert!(config.validate().is_ok());
        config.time.time_step = 15;
        assert!(config.validate().is_ok());
        config.time.time_step = 7;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reversed_dates_rejected() {
        let config = RunConfig::new(at(2, 0), at(1, 0), 60, 4, 5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_step_rejected() {
        let mut config = RunConfig::new(at(1, 0), at(1, 5), 120, 4, 5);
        assert!(config.validate().is_err());
        config.time.end = at(1, 6);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_depth_threshold_order() {
        let mut config = RunConfig::new(at(1, 0), at(2, 0), 60, 4, 5);
        config.escalation.depth_level1 = 0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_restart_requires_hour() {
        let mut config = RunConfig::new(at(1, 0), at(2, 0), 60, 4, 5);
        config.init.restart.restart_crash = true;
        assert!(matches!(config.validate(), Err(ConfigError::Missing(_))));
        config.init.restart.restart_hour = Some(2200);
        config.init.restart.depth_threshold = Some(0.05);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_output_mode_fallback() {
        assert_eq!(OutputMode::parse_lossy("ALL"), OutputMode::All);
        assert_eq!(OutputMode::parse_lossy("normal"), OutputMode::Normal);
        assert_eq!(OutputMode::parse_lossy("whatever"), OutputMode::Data);
    }

    #[test]
    fn test_from_file_minimal() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "time": {{ "start": "2018-01-01T00:00:00", "end": "2018-01-01T06:00:00", "time_step": 15 }},
                "domain": {{ "ny": 3, "nx": 2 }},
                "init": {{ "model_type": "smrf_ipysnobal" }}
            }}"#
        )
        .unwrap();

        let config = RunConfig::from_file(file.path()).unwrap();
        assert_eq!(config.time.time_step, 15);
        assert_eq!(config.init.model_type, ModelType::SmrfIpysnobal);
        assert!(config.init.model_type.is_in_memory());
        assert_eq!(config.output.variables.len(), 6);
        assert_eq!(config.forcing.soil_temp, -2.5);
    }

    #[test]
    fn test_json_roundtrip() {
        let config = RunConfig::new(at(1, 0), at(2, 0), 60, 4, 5);
        let json = config.to_json().unwrap();
        let parsed = RunConfig::from_json(&json).unwrap();
        assert_eq!(parsed.domain.nx, 5);
        assert_eq!(parsed.time.end, at(2, 0));
    }
}
