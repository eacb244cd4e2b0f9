// crates/sd_io/src/gridded.rs

//! Gridded-archive encoding
//!
//! Named grids stored as JSON, used as an init source and for timed depth
//! observations fed to the state updater.
//!
//! ```json
//! {
//!   "ny": 2, "nx": 2,
//!   "variables": { "z_s": [0.5, 0.5, 0.0, 1.0], "rho": [...] }
//! }
//! ```
//!
//! Values are row-major; `null` entries decode to NaN.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::NaiveDateTime;
use sd_foundation::grid::{self, Grid, Shape};
use sd_foundation::TimestepKey;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{IoError, IoResult};

const FORMAT: &str = "gridded archive";

/// Timestamp format of observation keys
pub const OBSERVATION_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

// ============================================================================
// Gridded archive
// ============================================================================

/// Named grids of one shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GriddedArchive {
    /// Rows
    pub ny: usize,
    /// Columns
    pub nx: usize,
    /// Row-major values per variable
    #[serde(default)]
    pub variables: BTreeMap<String, Vec<Option<f64>>>,
}

impl GriddedArchive {
    /// Empty archive
    pub fn new(shape: Shape) -> Self {
        Self {
            ny: shape.ny,
            nx: shape.nx,
            variables: BTreeMap::new(),
        }
    }

    /// Archive shape
    pub fn shape(&self) -> Shape {
        Shape::new(self.ny, self.nx)
    }

    /// Store a grid under `name`
    pub fn insert(&mut self, name: impl Into<String>, g: &Grid) -> IoResult<()> {
        let name = name.into();
        if g.dim() != self.shape().dim() {
            return Err(IoError::Shape {
                name,
                expected: self.shape().dim(),
                actual: g.dim(),
            });
        }
        self.variables.insert(name, g.iter().map(|v| Some(*v)).collect());
        Ok(())
    }

    /// Whether a variable is present
    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    /// Decode one variable (`None` when absent)
    pub fn grid(&self, name: &str, path: &Path) -> IoResult<Option<Grid>> {
        let Some(values) = self.variables.get(name) else {
            return Ok(None);
        };
        let values = values.iter().map(|v| v.unwrap_or(f64::NAN)).collect();
        grid::from_vec(self.shape(), values)
            .map(Some)
            .map_err(|e| IoError::format(FORMAT, path, format!("variable '{}': {}", name, e)))
    }

    /// Load from JSON
    pub fn read(path: &Path) -> IoResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| IoError::io(path, e))?;
        let archive: Self = serde_json::from_str(&content).map_err(|e| IoError::Json {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        info!(
            path = %path.display(),
            shape = %archive.shape(),
            variables = archive.variables.len(),
            "gridded archive loaded"
        );
        Ok(archive)
    }

    /// Write as JSON
    pub fn write(&self, path: &Path) -> IoResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| IoError::io(parent, e))?;
        }
        let content = serde_json::to_string_pretty(self).map_err(|e| IoError::Json {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        fs::write(path, content).map_err(|e| IoError::io(path, e))
    }
}

// ============================================================================
// Depth observations
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct ObservationFile {
    ny: usize,
    nx: usize,
    observations: Vec<ObservationEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ObservationEntry {
    time: String,
    depth: Vec<Option<f64>>,
}

/// Observed depth grids keyed by timestep
///
/// Cells without an observation are NaN.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DepthObservations {
    /// Observations, ordered by key
    pub grids: BTreeMap<TimestepKey, Grid>,
}

impl DepthObservations {
    /// Load from JSON
    ///
    /// ```json
    /// { "ny": 1, "nx": 2,
    ///   "observations": [ { "time": "2018-01-02 12:00", "depth": [0.4, null] } ] }
    /// ```
    pub fn read(path: &Path) -> IoResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| IoError::io(path, e))?;
        let file: ObservationFile = serde_json::from_str(&content).map_err(|e| IoError::Json {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let shape = Shape::new(file.ny, file.nx);
        let mut grids = BTreeMap::new();
        for entry in file.observations {
            let key = NaiveDateTime::parse_from_str(&entry.time, OBSERVATION_TIME_FORMAT)
                .map_err(|e| IoError::format(FORMAT, path, format!("time '{}': {}", entry.time, e)))?;
            let values = entry.depth.iter().map(|v| v.unwrap_or(f64::NAN)).collect();
            let g = grid::from_vec(shape, values)
                .map_err(|e| IoError::format(FORMAT, path, format!("observation {}: {}", entry.time, e)))?;
            grids.insert(key, g);
        }
        info!(path = %path.display(), observations = grids.len(), "depth observations loaded");
        Ok(Self { grids })
    }

    /// Write as JSON
    pub fn write(&self, path: &Path) -> IoResult<()> {
        let shape = self.grids.values().next().map(Shape::of).unwrap_or(Shape::new(0, 0));
        let file = ObservationFile {
            ny: shape.ny,
            nx: shape.nx,
            observations: self
                .grids
                .iter()
                .map(|(key, g)| ObservationEntry {
                    time: key.format(OBSERVATION_TIME_FORMAT).to_string(),
                    depth: g.iter().map(|v| v.is_finite().then_some(*v)).collect(),
                })
                .collect(),
        };
        let content = serde_json::to_string_pretty(&file).map_err(|e| IoError::Json {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        fs::write(path, content).map_err(|e| IoError::io(path, e))
    }

    /// Number of observations
    pub fn len(&self) -> usize {
        self.grids.len()
    }

    /// No observations
    pub fn is_empty(&self) -> bool {
        self.grids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_gridded_write_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("init.json");
        let shape = Shape::new(2, 2);

        let mut archive = GriddedArchive::new(shape);
        archive.insert("z_s", &grid::filled(shape, 0.5)).unwrap();
        assert!(archive.insert("rho", &grid::zeros(Shape::new(1, 2))).is_err());
        archive.write(&path).unwrap();

        let loaded = GriddedArchive::read(&path).unwrap();
        assert_eq!(loaded, archive);
        assert_eq!(loaded.grid("z_s", &path).unwrap().unwrap()[[1, 1]], 0.5);
        assert!(loaded.grid("rho", &path).unwrap().is_none());
    }

    #[test]
    fn test_gridded_bad_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, r#"{"ny": 2, "nx": 2, "variables": {"z_s": [1.0, 2.0]}}"#).unwrap();
        let archive = GriddedArchive::read(&path).unwrap();
        assert!(matches!(archive.grid("z_s", &path), Err(IoError::Format { .. })));
    }

    #[test]
    fn test_gridded_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{ny: }").unwrap();
        assert!(matches!(GriddedArchive::read(&path), Err(IoError::Json { .. })));
    }

    #[test]
    fn test_observations_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("depth.json");
        fs::write(
            &path,
            r#"{"ny": 1, "nx": 2, "observations": [
                {"time": "2018-01-02 12:00", "depth": [0.4, null]}
            ]}"#,
        )
        .unwrap();

        let obs = DepthObservations::read(&path).unwrap();
        assert_eq!(obs.len(), 1);
        let key = NaiveDate::from_ymd_opt(2018, 1, 2)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let g = &obs.grids[&key];
        assert_eq!(g[[0, 0]], 0.4);
        assert!(g[[0, 1]].is_nan());

        let out = dir.path().join("copy.json");
        obs.write(&out).unwrap();
        let again = DepthObservations::read(&out).unwrap();
        assert_eq!(again.grids[&key][[0, 0]], 0.4);
        assert!(again.grids[&key][[0, 1]].is_nan());
    }

    #[test]
    fn test_observations_bad_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("depth.json");
        fs::write(
            &path,
            r#"{"ny": 1, "nx": 1, "observations": [{"time": "yesterday", "depth": [0.4]}]}"#,
        )
        .unwrap();
        assert!(matches!(DepthObservations::read(&path), Err(IoError::Format { .. })));
    }
}
