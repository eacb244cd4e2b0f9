// crates/sd_io/src/band_image.rs

//! Legacy band image encoding
//!
//! A stack of same-shape grids ("bands") in one file. The on-disk model type
//! reads its init state from a band image and writes one band image per
//! output step (`snow.NNNN`, NNNN = water-year hour).
//!
//! # File format (v1, little-endian)
//!
//! ```text
//! [magic: 4 bytes] "SDBI"
//! [version: u32]
//! [ny: u64] [nx: u64]
//! [band count: u32]
//! [band data: band count × ny × nx f64, row-major]
//! [CRC32: u32]
//! ```
//!
//! # Band layouts
//!
//! | layout        | bands |
//! |---------------|-------|
//! | init, 8 bands | elevation, z_0, z_s, rho, T_s_0, T_s_l, T_s, h2o_sat |
//! | init, 7 bands | elevation, z_0, z_s, rho, T_s_0, T_s, h2o_sat |
//! | snow output   | z_s, rho, m_s, h2o, T_s_0, T_s_l, T_s, z_s_l, h2o_sat |

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use sd_foundation::grid::{self, Grid, Shape};
use tracing::info;

use crate::archive::ByteReader;
use crate::crc::crc32;
use crate::error::{IoError, IoResult};
use crate::field::StateField;
use crate::sink::OutputSink;
use crate::snapshot::StateSnapshot;

const BAND_MAGIC: &[u8; 4] = b"SDBI";
const BAND_VERSION: u32 = 1;
const FORMAT: &str = "band image";

/// Bands of a snow output image
pub const SNOW_BANDS: [StateField; 9] = [
    StateField::ZS,
    StateField::Rho,
    StateField::MS,
    StateField::H2o,
    StateField::TS0,
    StateField::TSL,
    StateField::TS,
    StateField::ZSL,
    StateField::H2oSat,
];

/// Path of the snow output image for a water-year hour
pub fn snow_image_path(directory: &Path, water_year_hour: u32) -> PathBuf {
    directory.join(format!("snow.{:04}", water_year_hour))
}

/// Path of the init image for a water-year hour
pub fn init_image_path(directory: &Path, water_year_hour: u32) -> PathBuf {
    directory.join(format!("init{:04}", water_year_hour))
}

/// Band image
#[derive(Debug, Clone, PartialEq)]
pub struct BandImage {
    shape: Shape,
    bands: Vec<Grid>,
}

impl BandImage {
    /// Empty image
    pub fn new(shape: Shape) -> Self {
        Self {
            shape,
            bands: Vec::new(),
        }
    }

    /// Append a band
    pub fn push_band(&mut self, band: Grid) -> IoResult<()> {
        if band.dim() != self.shape.dim() {
            return Err(IoError::Shape {
                name: format!("band {}", self.bands.len()),
                expected: self.shape.dim(),
                actual: band.dim(),
            });
        }
        self.bands.push(band);
        Ok(())
    }

    /// Image shape
    pub fn shape(&self) -> Shape {
        self.shape
    }

    /// Number of bands
    pub fn n_bands(&self) -> usize {
        self.bands.len()
    }

    /// One band
    pub fn band(&self, index: usize) -> Option<&Grid> {
        self.bands.get(index)
    }

    /// One band, format error when absent
    pub fn require_band(&self, index: usize, path: &Path) -> IoResult<&Grid> {
        self.bands.get(index).ok_or_else(|| {
            IoError::format(
                FORMAT,
                path,
                format!("band {} requested, image has {}", index, self.bands.len()),
            )
        })
    }

    /// Write via a temporary file and rename
    pub fn write(&self, path: &Path) -> IoResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| IoError::io(parent, e))?;
        }

        let mut data = Vec::with_capacity(28 + self.bands.len() * self.shape.n_cells() * 8);
        data.extend_from_slice(BAND_MAGIC);
        data.extend_from_slice(&BAND_VERSION.to_le_bytes());
        data.extend_from_slice(&(self.shape.ny as u64).to_le_bytes());
        data.extend_from_slice(&(self.shape.nx as u64).to_le_bytes());
        data.extend_from_slice(&(self.bands.len() as u32).to_le_bytes());
        for band in &self.bands {
            for v in band.iter() {
                data.extend_from_slice(&v.to_le_bytes());
            }
        }
        let crc = crc32(&data);

        let temp_path = path.with_extension("tmp");
        {
            let file = File::create(&temp_path).map_err(|e| IoError::io(&temp_path, e))?;
            let mut writer = BufWriter::new(file);
            writer
                .write_all(&data)
                .and_then(|_| writer.write_all(&crc.to_le_bytes()))
                .and_then(|_| writer.flush())
                .map_err(|e| IoError::io(&temp_path, e))?;
        }
        std::fs::rename(&temp_path, path).map_err(|e| IoError::io(path, e))?;
        Ok(())
    }

    /// Read and verify
    pub fn read(path: &Path) -> IoResult<Self> {
        let mut bytes = Vec::new();
        File::open(path)
            .and_then(|mut f| f.read_to_end(&mut bytes))
            .map_err(|e| IoError::io(path, e))?;

        if bytes.len() < 28 {
            return Err(IoError::format(FORMAT, path, "file too small"));
        }
        let crc_offset = bytes.len() - 4;
        let (body, tail) = bytes.split_at(crc_offset);
        let mut stored = [0u8; 4];
        stored.copy_from_slice(tail);
        let stored = u32::from_le_bytes(stored);
        let computed = crc32(body);
        if stored != computed {
            return Err(IoError::Checksum {
                path: path.to_path_buf(),
                record: 0,
                stored,
                computed,
            });
        }

        let mut reader = ByteReader::new(body, path, FORMAT);
        if reader.take(4)? != BAND_MAGIC {
            return Err(reader.error("bad magic"));
        }
        let version = reader.u32()?;
        if version > BAND_VERSION {
            return Err(IoError::Version {
                path: path.to_path_buf(),
                found: version,
                supported: BAND_VERSION,
            });
        }
        let shape = Shape::new(reader.dim()?, reader.dim()?);
        let n_bands = reader.u32()? as usize;
        let expected = shape
            .ny
            .checked_mul(shape.nx)
            .and_then(|cells| cells.checked_mul(n_bands))
            .and_then(|values| values.checked_mul(8));
        if expected != Some(reader.remaining()) {
            return Err(reader.error(format!(
                "{} bands of a {} grid do not match {} data bytes",
                n_bands,
                shape,
                reader.remaining()
            )));
        }

        let mut image = Self::new(shape);
        for _ in 0..n_bands {
            let mut values = Vec::with_capacity(shape.n_cells());
            for _ in 0..shape.n_cells() {
                values.push(reader.f64()?);
            }
            let band = grid::from_vec(shape, values).map_err(|e| reader.error(e.to_string()))?;
            image.bands.push(band);
        }
        if reader.remaining() != 0 {
            return Err(reader.error("trailing bytes after last band"));
        }
        Ok(image)
    }
}

// ============================================================================
// Snow image sink
// ============================================================================

/// Writes one snow band image per flush
pub struct BandImageSink {
    directory: PathBuf,
    written: Vec<PathBuf>,
}

impl BandImageSink {
    /// Sink writing into `directory`
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            written: Vec::new(),
        }
    }

    /// Files written so far
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

impl OutputSink for BandImageSink {
    fn flush(&mut self, snapshot: StateSnapshot) -> IoResult<()> {
        let shape = snapshot
            .shape()
            .ok_or_else(|| IoError::MissingField {
                field: StateField::ZS.key().to_string(),
                key: snapshot.key.to_string(),
            })?;

        let mut image = BandImage::new(shape);
        for field in SNOW_BANDS {
            image.push_band(snapshot.require(field)?.clone())?;
        }

        let path = snow_image_path(&self.directory, snapshot.water_year_hour.round() as u32);
        image.write(&path)?;
        info!(path = %path.display(), key = %snapshot.key, "snow image written");
        self.written.push(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = init_image_path(dir.path(), 2200);
        assert!(path.ends_with("init2200"));

        let shape = Shape::new(3, 2);
        let mut image = BandImage::new(shape);
        for i in 0..7 {
            image.push_band(grid::filled(shape, i as f64)).unwrap();
        }
        image.write(&path).unwrap();

        let loaded = BandImage::read(&path).unwrap();
        assert_eq!(loaded, image);
        assert_eq!(loaded.band(6).unwrap()[[2, 1]], 6.0);
        assert!(loaded.require_band(8, &path).is_err());
    }

    #[test]
    fn test_wrong_band_shape() {
        let mut image = BandImage::new(Shape::new(2, 2));
        assert!(image.push_band(grid::zeros(Shape::new(2, 3))).is_err());
    }

    #[test]
    fn test_corruption_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img");
        let mut image = BandImage::new(Shape::new(2, 2));
        image.push_band(grid::filled(Shape::new(2, 2), 1.0)).unwrap();
        image.write(&path).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[30] ^= 0x01;
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(BandImage::read(&path), Err(IoError::Checksum { .. })));
    }

    #[test]
    fn test_oversized_header_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img");
        let mut image = BandImage::new(Shape::new(2, 2));
        image.push_band(grid::filled(Shape::new(2, 2), 1.0)).unwrap();
        image.write(&path).unwrap();

        // ny = u64::MAX with a valid checksum
        let bytes = std::fs::read(&path).unwrap();
        let mut body = bytes[..bytes.len() - 4].to_vec();
        body[8..16].copy_from_slice(&u64::MAX.to_le_bytes());
        let crc = crate::crc::crc32(&body);
        body.extend_from_slice(&crc.to_le_bytes());
        std::fs::write(&path, &body).unwrap();

        assert!(matches!(BandImage::read(&path), Err(IoError::Format { .. })));
    }

    #[test]
    fn test_snow_sink() {
        let dir = tempfile::tempdir().unwrap();
        let key = NaiveDate::from_ymd_opt(2017, 10, 2)
            .unwrap()
            .and_hms_opt(1, 0, 0)
            .unwrap();
        let shape = Shape::new(2, 2);
        let mut snapshot = StateSnapshot::new(key);
        for (i, field) in SNOW_BANDS.iter().enumerate() {
            snapshot.fields.insert(*field, grid::filled(shape, i as f64));
        }

        let mut sink = BandImageSink::new(dir.path());
        sink.flush(snapshot).unwrap();
        assert_eq!(sink.written(), &[snow_image_path(dir.path(), 25)]);

        let image = BandImage::read(&sink.written()[0]).unwrap();
        assert_eq!(image.n_bands(), 9);
        assert_eq!(image.band(8).unwrap()[[0, 0]], 8.0);
    }

    #[test]
    fn test_snow_sink_needs_all_bands() {
        let dir = tempfile::tempdir().unwrap();
        let key = NaiveDate::from_ymd_opt(2017, 10, 2)
            .unwrap()
            .and_hms_opt(1, 0, 0)
            .unwrap();
        let snapshot = StateSnapshot::new(key).with_field(StateField::ZS, grid::zeros(Shape::new(2, 2)));
        let mut sink = BandImageSink::new(dir.path());
        assert!(matches!(sink.flush(snapshot), Err(IoError::MissingField { .. })));
    }
}
