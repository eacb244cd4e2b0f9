// crates/sd_engine/src/init.rs

//! Initializer
//!
//! Builds the first state record from exactly one source:
//!
//! 1. crash restart: the run's own output at the restart hour, followed by
//!    the shallow-snow reset at the configured depth threshold;
//! 2. zero state, when no init file is configured;
//! 3. an init file in one of the supported encodings.
//!
//! # Encodings
//!
//! | encoding     | container      | fields                                              |
//! |--------------|----------------|-----------------------------------------------------|
//! | `ipw`        | band image     | elevation, z_0, z_s, rho, T_s_0, (T_s_l), T_s, h2o_sat |
//! | `ipw_out`    | band image     | bands 0 z_s, 1 rho, 4 T_s_0, 5 T_s_l, 6 T_s, 8 h2o_sat |
//! | `netcdf`     | gridded archive| z_s, rho, T_s_0, T_s, h2o_sat, T_s_l (absent = 0)   |
//! | `netcdf_out` | output archive | record nearest to the start / restart hour          |
//!
//! Whatever the source, the init fields are multiplied by the mask and, for
//! in-memory model types, temperatures are shifted to Kelvin exactly once.
//! The on-disk model type also gets its band-image init artifact.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use sd_config::{DomainConfig, InitConfig, InitEncoding, ModelType, RunConfig};
use sd_forcing::FREEZE;
use sd_foundation::grid::{self, Grid, Shape};
use sd_foundation::time::water_year_hour;
use sd_io::{
    init_image_path, snow_image_path, BandImage, GriddedArchive, OutputArchive, StateField,
};
use tracing::{error, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::state::StateRecord;

/// Distance above which the selected output record is reported [h]
const MAX_RECORD_DISTANCE_HOURS: f64 = 24.0;

/// Band order of a band-image init file with the lower layer
const IPW_BANDS_8: [StateField; 8] = [
    StateField::Elevation,
    StateField::Z0,
    StateField::ZS,
    StateField::Rho,
    StateField::TS0,
    StateField::TSL,
    StateField::TS,
    StateField::H2oSat,
];

/// Band order of a band-image init file without the lower layer
const IPW_BANDS_7: [StateField; 7] = [
    StateField::Elevation,
    StateField::Z0,
    StateField::ZS,
    StateField::Rho,
    StateField::TS0,
    StateField::TS,
    StateField::H2oSat,
];

/// Bands of a snow output image read back as init state
const IPW_OUT_BANDS: [(usize, StateField); 6] = [
    (0, StateField::ZS),
    (1, StateField::Rho),
    (4, StateField::TS0),
    (5, StateField::TSL),
    (6, StateField::TS),
    (8, StateField::H2oSat),
];

// ============================================================================
// Source selection
// ============================================================================

/// Initial condition source
#[derive(Debug, Clone, PartialEq)]
pub enum InitSource {
    /// Run's own output at `hour`, reset below `threshold`
    CrashRestart {
        /// Water-year hour to restart from
        hour: u32,
        /// Depth threshold of the reset
        threshold: f64,
    },
    /// All dynamic fields zero
    Zero,
    /// Init file
    File {
        /// Path
        path: PathBuf,
        /// Encoding
        encoding: InitEncoding,
    },
}

impl InitSource {
    /// Pick the source by priority
    pub fn select(init: &InitConfig) -> EngineResult<Self> {
        if init.restart.restart_crash {
            let hour = init
                .restart
                .restart_hour
                .ok_or_else(|| EngineError::init("crash restart without a restart hour"))?;
            let threshold = init
                .restart
                .depth_threshold
                .ok_or_else(|| EngineError::init("crash restart without a depth threshold"))?;
            return Ok(Self::CrashRestart { hour, threshold });
        }
        match (&init.file, init.encoding) {
            (None, _) => Ok(Self::Zero),
            (Some(path), Some(encoding)) => Ok(Self::File {
                path: path.clone(),
                encoding,
            }),
            (Some(path), None) => Err(EngineError::init(format!(
                "init file {} has no encoding",
                path.display()
            ))),
        }
    }
}

impl fmt::Display for InitSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CrashRestart { hour, threshold } => {
                write!(f, "crash restart at hour {} (threshold {})", hour, threshold)
            }
            Self::Zero => f.write_str("zero state"),
            Self::File { path, encoding } => {
                write!(f, "{} file {}", encoding.name(), path.display())
            }
        }
    }
}

// ============================================================================
// Topography
// ============================================================================

/// Static fields of the domain
#[derive(Debug, Clone, PartialEq)]
pub struct Topography {
    /// Land mask
    pub mask: Grid,
    /// Elevation [m]
    pub elevation: Grid,
    /// Surface roughness [m]
    pub roughness: Grid,
}

impl Topography {
    /// Unmasked domain with uniform values
    pub fn uniform(shape: Shape, elevation: f64, roughness: f64) -> Self {
        Self {
            mask: grid::filled(shape, 1.0),
            elevation: grid::filled(shape, elevation),
            roughness: grid::filled(shape, roughness),
        }
    }

    /// Topography from the domain configuration
    ///
    /// The topo file is a gridded archive with `mask`, `dem` and
    /// `roughness`; absent variables fall back to the uniform values.
    pub fn load(domain: &DomainConfig) -> EngineResult<Self> {
        let shape = Shape::new(domain.ny, domain.nx);
        let mut topo = Self::uniform(shape, domain.elevation, domain.roughness);
        let Some(path) = &domain.topo_file else {
            return Ok(topo);
        };

        let archive = GriddedArchive::read(path)?;
        if archive.shape() != shape {
            return Err(EngineError::init(format!(
                "topo file {} is {}, domain is {}",
                path.display(),
                archive.shape(),
                shape
            )));
        }
        for (name, target) in [
            ("mask", &mut topo.mask),
            ("dem", &mut topo.elevation),
            ("roughness", &mut topo.roughness),
        ] {
            if let Some(g) = archive.grid(name, path)? {
                *target = g;
            }
        }
        Ok(topo)
    }
}

// ============================================================================
// Initializer
// ============================================================================

/// Result of initialization
#[derive(Debug, Clone)]
pub struct InitOutcome {
    /// First state record
    pub state: StateRecord,
    /// Source used
    pub source: InitSource,
    /// Band-image init artifact of the on-disk model type
    pub init_artifact: Option<PathBuf>,
}

/// Loaded init fields, before masking and unit conversion
#[derive(Debug, Default)]
struct InitFields {
    fields: BTreeMap<StateField, Grid>,
    roughness: Option<Grid>,
}

/// Builds the first state record
pub struct Initializer<'a> {
    config: &'a RunConfig,
    topography: Option<Topography>,
}

impl<'a> Initializer<'a> {
    /// Initializer for a run
    pub fn new(config: &'a RunConfig) -> Self {
        Self {
            config,
            topography: None,
        }
    }

    /// Use this topography instead of the configured one
    pub fn with_topography(mut self, topography: Topography) -> Self {
        self.topography = Some(topography);
        self
    }

    /// Build the state record
    pub fn initialize(mut self) -> EngineResult<InitOutcome> {
        let config = self.config;
        let model_type = config.init.model_type;
        let source = InitSource::select(&config.init)?;
        let start_hour = water_year_hour(&config.time.start);
        info!(source = %source, model_type = ?model_type, "initializing state");

        let mut topo = match self.topography.take() {
            Some(t) => t,
            None => Topography::load(&config.domain)?,
        };

        let loaded = match &source {
            InitSource::Zero => InitFields::default(),
            InitSource::File { path, encoding } => match encoding {
                InitEncoding::Ipw => read_band_image_init(path)?,
                InitEncoding::IpwOut => read_band_image_output(path)?,
                InitEncoding::Netcdf => read_gridded(path)?,
                InitEncoding::NetcdfOut => read_output_archive(path, start_hour)?,
            },
            InitSource::CrashRestart { hour, .. } => {
                if model_type.is_in_memory() {
                    read_output_archive(&config.archive_path(), *hour as f64)?
                } else {
                    let path = snow_image_path(&config.output.directory, *hour);
                    warn!(path = %path.display(), "crash restart from snow image");
                    read_band_image_output(&path)?
                }
            }
        };

        if let Some(roughness) = loaded.roughness {
            warn!("init file roughness overrides the topo roughness");
            topo.roughness = roughness * &topo.mask;
        }

        let mut state = StateRecord::new(topo.mask, topo.elevation, topo.roughness)?;
        for (field, g) in loaded.fields {
            if !field.is_static() {
                state.set(field, g)?;
            }
        }

        if source == InitSource::Zero {
            for field in StateField::TEMPERATURES {
                state.fill(field, config.escalation.reset_temperature)?;
            }
        }

        if let InitSource::CrashRestart { threshold, .. } = &source {
            state.reset_shallow(*threshold, config.escalation.reset_temperature);
        }

        state.apply_mask(&StateField::INIT);

        if model_type.is_in_memory() {
            for field in StateField::TEMPERATURES {
                state.shift(field, FREEZE)?;
            }
        }

        state.set_clock(start_hour);

        let init_artifact = if model_type == ModelType::Isnobal {
            Some(self.write_init_artifact(&state, &source, start_hour)?)
        } else {
            None
        };

        info!(shape = %state.shape(), start_hour, "state initialized");
        Ok(InitOutcome {
            state,
            source,
            init_artifact,
        })
    }

    fn write_init_artifact(
        &self,
        state: &StateRecord,
        source: &InitSource,
        start_hour: f64,
    ) -> EngineResult<PathBuf> {
        let restarting = matches!(source, InitSource::CrashRestart { .. });
        if let InitSource::File {
            path,
            encoding: InitEncoding::Ipw,
        } = source
        {
            info!(path = %path.display(), "band-image init file used as is");
            return Ok(path.clone());
        }

        let hour = match source {
            InitSource::CrashRestart { hour, .. } => *hour,
            _ => start_hour.round() as u32,
        };

        let mut bands = vec![
            StateField::Elevation,
            StateField::Z0,
            StateField::ZS,
            StateField::Rho,
            StateField::TS0,
        ];
        if start_hour > 0.0 || restarting {
            bands.push(StateField::TSL);
        }
        bands.extend([StateField::TS, StateField::H2oSat]);

        let mut image = BandImage::new(state.shape());
        for field in bands {
            image.push_band(state[field].clone())?;
        }
        let path = init_image_path(&self.config.output.directory, hour);
        image.write(&path)?;
        info!(path = %path.display(), bands = image.n_bands(), "init image written");
        Ok(path)
    }
}

// ============================================================================
// Readers
// ============================================================================

fn read_band_image_init(path: &Path) -> EngineResult<InitFields> {
    let image = BandImage::read(path)?;
    let layout: &[StateField] = match image.n_bands() {
        8 => &IPW_BANDS_8,
        7 => &IPW_BANDS_7,
        n => {
            return Err(EngineError::init(format!(
                "band image {} has {} bands, expected 7 or 8",
                path.display(),
                n
            )))
        }
    };

    let mut loaded = InitFields::default();
    for (index, field) in layout.iter().enumerate() {
        let band = image.require_band(index, path)?.clone();
        match field {
            StateField::Z0 => loaded.roughness = Some(band),
            StateField::Elevation => {}
            _ => {
                loaded.fields.insert(*field, band);
            }
        }
    }
    Ok(loaded)
}

fn read_band_image_output(path: &Path) -> EngineResult<InitFields> {
    let image = BandImage::read(path)?;
    let mut loaded = InitFields::default();
    for (index, field) in IPW_OUT_BANDS {
        loaded
            .fields
            .insert(field, image.require_band(index, path)?.clone());
    }
    Ok(loaded)
}

fn read_gridded(path: &Path) -> EngineResult<InitFields> {
    let archive = GriddedArchive::read(path)?;
    let mut loaded = InitFields::default();
    for field in StateField::INIT {
        match archive.grid(field.key(), path)? {
            Some(g) => {
                loaded.fields.insert(field, g);
            }
            None => info!(field = field.key(), "not in init file, starting at zero"),
        }
    }
    Ok(loaded)
}

fn read_output_archive(path: &Path, hour: f64) -> EngineResult<InitFields> {
    let archive = OutputArchive::load(path)?;
    let (record, distance) = archive.nearest(hour).ok_or_else(|| {
        EngineError::init(format!("output archive {} has no records", path.display()))
    })?;

    warn!(
        path = %path.display(),
        requested = hour,
        selected = record.water_year_hour,
        key = %record.key,
        "init record selected from output archive"
    );
    if distance > MAX_RECORD_DISTANCE_HOURS {
        error!(
            distance,
            "selected output record is more than {} hours from the requested hour",
            MAX_RECORD_DISTANCE_HOURS
        );
    }

    let mut loaded = InitFields::default();
    for field in StateField::INIT {
        loaded.fields.insert(field, record.require(field)?.clone());
    }
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ndarray::array;
    use sd_io::{ArchiveWriter, StateSnapshot};

    fn config(dir: &Path) -> RunConfig {
        let start = NaiveDate::from_ymd_opt(2017, 10, 2)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let end = NaiveDate::from_ymd_opt(2017, 10, 2)
            .unwrap()
            .and_hms_opt(6, 0, 0)
            .unwrap();
        let mut config = RunConfig::new(start, end, 60, 1, 2);
        config.output.directory = dir.to_path_buf();
        config
    }

    #[test]
    fn test_select_priority() {
        let mut init = InitConfig::default();
        assert_eq!(InitSource::select(&init).unwrap(), InitSource::Zero);

        init.file = Some(PathBuf::from("init.json"));
        assert!(InitSource::select(&init).is_err());
        init.encoding = Some(InitEncoding::Netcdf);
        assert!(matches!(InitSource::select(&init).unwrap(), InitSource::File { .. }));

        init.restart.restart_crash = true;
        init.restart.restart_hour = Some(100);
        init.restart.depth_threshold = Some(0.05);
        assert_eq!(
            InitSource::select(&init).unwrap(),
            InitSource::CrashRestart {
                hour: 100,
                threshold: 0.05
            }
        );
    }

    #[test]
    fn test_zero_state_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = Initializer::new(&config(dir.path())).initialize().unwrap();
        let state = outcome.state;
        assert_eq!(outcome.source, InitSource::Zero);
        assert!(outcome.init_artifact.is_none());
        assert_eq!(state[StateField::ZS][[0, 1]], 0.0);
        for field in StateField::TEMPERATURES {
            assert_eq!(state[field][[0, 0]], -75.0 + FREEZE);
        }
        assert_eq!(state.current_time(), 24.0 * 3600.0);
    }

    #[test]
    fn test_gridded_init_masked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("init.json");
        let mut archive = GriddedArchive::new(Shape::new(1, 2));
        archive.insert("z_s", &array![[1.0, 2.0]]).unwrap();
        archive.insert("T_s", &array![[-1.0, -1.0]]).unwrap();
        archive.write(&path).unwrap();

        let mut cfg = config(dir.path());
        cfg.init.file = Some(path);
        cfg.init.encoding = Some(InitEncoding::Netcdf);
        let topo = Topography {
            mask: array![[1.0, 0.0]],
            elevation: array![[10.0, 10.0]],
            roughness: array![[0.01, 0.01]],
        };
        let state = Initializer::new(&cfg)
            .with_topography(topo)
            .initialize()
            .unwrap()
            .state;
        assert_eq!(state[StateField::ZS], array![[1.0, 0.0]]);
        assert_eq!(state[StateField::TS], array![[-1.0 + FREEZE, FREEZE]]);
        assert_eq!(state[StateField::Rho], array![[0.0, 0.0]]);
    }

    #[test]
    fn test_output_archive_nearest_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prior.sdar");
        let shape = Shape::new(1, 2);
        let mut writer = ArchiveWriter::create(&path, shape, StateField::INIT.to_vec()).unwrap();
        let mut batch = Vec::new();
        for (hour, depth) in [(0u32, 0.1), (1, 0.2)] {
            let key = NaiveDate::from_ymd_opt(2017, 10, 2)
                .unwrap()
                .and_hms_opt(hour, 0, 0)
                .unwrap();
            let mut snap = StateSnapshot::new(key);
            for field in StateField::INIT {
                snap.fields.insert(field, grid::zeros(shape));
            }
            snap.fields.insert(StateField::ZS, grid::filled(shape, depth));
            batch.push(snap);
        }
        writer.append(&batch).unwrap();

        let loaded = read_output_archive(&path, 25.2).unwrap();
        assert_eq!(loaded.fields[&StateField::ZS][[0, 0]], 0.2);
    }

    #[test]
    fn test_band_image_init_bad_band_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("init.ipw");
        let mut image = BandImage::new(Shape::new(1, 2));
        for _ in 0..5 {
            image.push_band(grid::zeros(Shape::new(1, 2))).unwrap();
        }
        image.write(&path).unwrap();
        assert!(matches!(read_band_image_init(&path), Err(EngineError::Init(_))));
    }

    #[test]
    fn test_on_disk_model_writes_init_image() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.init.model_type = ModelType::Isnobal;

        let outcome = Initializer::new(&cfg).initialize().unwrap();
        let path = outcome.init_artifact.unwrap();
        assert!(path.ends_with("init0024"));
        let image = BandImage::read(&path).unwrap();
        // start hour 24 > 0, lower layer included
        assert_eq!(image.n_bands(), 8);
        // temperatures stay in the source convention
        assert_eq!(outcome.state[StateField::TS][[0, 0]], -75.0);
        assert_eq!(image.band(6).unwrap()[[0, 0]], -75.0);
    }

    #[test]
    fn test_zero_state_temperatures_masked() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.escalation.reset_temperature = -40.0;
        let topo = Topography {
            mask: array![[1.0, 0.0]],
            elevation: array![[10.0, 10.0]],
            roughness: array![[0.01, 0.01]],
        };
        let state = Initializer::new(&cfg)
            .with_topography(topo)
            .initialize()
            .unwrap()
            .state;
        assert_eq!(state[StateField::TS0], array![[-40.0 + FREEZE, FREEZE]]);
        assert_eq!(state[StateField::TS], array![[-40.0 + FREEZE, FREEZE]]);
    }

    #[test]
    fn test_band_image_roughness_masked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("init.ipw");
        let shape = Shape::new(1, 2);
        let mut image = BandImage::new(shape);
        for value in [2000.0, 0.02, 0.5, 250.0, -1.0, -2.0, 0.1] {
            image.push_band(grid::filled(shape, value)).unwrap();
        }
        image.write(&path).unwrap();

        let mut cfg = config(dir.path());
        cfg.init.file = Some(path);
        cfg.init.encoding = Some(InitEncoding::Ipw);
        let topo = Topography {
            mask: array![[0.0, 1.0]],
            elevation: array![[10.0, 10.0]],
            roughness: array![[0.01, 0.01]],
        };
        let state = Initializer::new(&cfg)
            .with_topography(topo)
            .initialize()
            .unwrap()
            .state;
        assert_eq!(state[StateField::Z0], array![[0.0, 0.02]]);
    }

    #[test]
    fn test_band_image_init_passthrough() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("init.ipw");
        let shape = Shape::new(1, 2);
        let mut image = BandImage::new(shape);
        for value in [2000.0, 0.02, 0.5, 250.0, -1.0, -2.0, 0.1] {
            image.push_band(grid::filled(shape, value)).unwrap();
        }
        image.write(&path).unwrap();

        let mut cfg = config(dir.path());
        cfg.init.model_type = ModelType::Isnobal;
        cfg.init.file = Some(path.clone());
        cfg.init.encoding = Some(InitEncoding::Ipw);

        let outcome = Initializer::new(&cfg).initialize().unwrap();
        assert_eq!(outcome.init_artifact, Some(path));
        let state = outcome.state;
        assert_eq!(state[StateField::Z0][[0, 0]], 0.02);
        assert_eq!(state[StateField::ZS][[0, 1]], 0.5);
        assert_eq!(state[StateField::TS][[0, 0]], -2.0);
        assert_eq!(state[StateField::TSL][[0, 0]], 0.0);
        assert_eq!(state[StateField::H2oSat][[0, 0]], 0.1);
    }
}
