// crates/sd_io/src/archive.rs

//! Output archive
//!
//! Time-indexed binary archive of state snapshots. Serves as the run's
//! output and as the prior-output / crash-restart init source.
//!
//! # File format (v1, little-endian)
//!
//! ```text
//! [magic: 4 bytes] "SDAR"
//! [version: u32]
//! [ny: u64] [nx: u64]
//! [field count: u32]
//! [field ids: u8 × field count]
//! records, appended:
//!   [key: i64 unix seconds]
//!   [water-year hour: f64]
//!   [field data: field count × ny × nx f64, row-major]
//!   [CRC32 of the record: u32]
//! ```

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use chrono::DateTime;
use sd_foundation::grid::{self, Shape};
use tracing::debug;

use crate::crc::crc32;
use crate::error::{IoError, IoResult};
use crate::field::StateField;
use crate::snapshot::StateSnapshot;

/// Archive magic
const ARCHIVE_MAGIC: &[u8; 4] = b"SDAR";

/// Current format version
const ARCHIVE_VERSION: u32 = 1;

const FORMAT: &str = "output archive";

// ============================================================================
// Header
// ============================================================================

/// Archive header
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveHeader {
    /// Format version
    pub version: u32,
    /// Grid shape
    pub shape: Shape,
    /// Stored fields, record order
    pub fields: Vec<StateField>,
}

impl ArchiveHeader {
    fn encode(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(28 + self.fields.len());
        data.extend_from_slice(ARCHIVE_MAGIC);
        data.extend_from_slice(&self.version.to_le_bytes());
        data.extend_from_slice(&(self.shape.ny as u64).to_le_bytes());
        data.extend_from_slice(&(self.shape.nx as u64).to_le_bytes());
        data.extend_from_slice(&(self.fields.len() as u32).to_le_bytes());
        data.extend(self.fields.iter().map(|f| f.id()));
        data
    }

    fn decode(reader: &mut ByteReader<'_>) -> IoResult<Self> {
        let magic = reader.take(4)?;
        if magic != ARCHIVE_MAGIC {
            return Err(reader.error("bad magic"));
        }
        let version = reader.u32()?;
        if version > ARCHIVE_VERSION {
            return Err(IoError::Version {
                path: reader.path.to_path_buf(),
                found: version,
                supported: ARCHIVE_VERSION,
            });
        }
        let ny = reader.dim()?;
        let nx = reader.dim()?;
        let n_fields = reader.u32()? as usize;
        let mut fields = Vec::with_capacity(n_fields);
        for &id in reader.take(n_fields)? {
            let field = StateField::from_id(id)
                .ok_or_else(|| reader.error(format!("unknown field id {}", id)))?;
            fields.push(field);
        }
        Ok(Self {
            version,
            shape: Shape::new(ny, nx),
            fields,
        })
    }

    /// Bytes of one record, `None` when the layout overflows `usize`
    pub fn record_len(&self) -> Option<usize> {
        self.shape
            .ny
            .checked_mul(self.shape.nx)?
            .checked_mul(self.fields.len())?
            .checked_mul(8)?
            .checked_add(8 + 8 + 4)
    }
}

// ============================================================================
// Writer
// ============================================================================

/// Appends snapshot records to an archive
pub struct ArchiveWriter {
    path: PathBuf,
    header: ArchiveHeader,
    writer: BufWriter<File>,
    records: usize,
}

impl ArchiveWriter {
    /// Create (truncate) an archive
    pub fn create(path: &Path, shape: Shape, fields: Vec<StateField>) -> IoResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| IoError::io(parent, e))?;
        }
        let header = ArchiveHeader {
            version: ARCHIVE_VERSION,
            shape,
            fields,
        };
        let file = File::create(path).map_err(|e| IoError::io(path, e))?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(&header.encode())
            .and_then(|_| writer.flush())
            .map_err(|e| IoError::io(path, e))?;

        Ok(Self {
            path: path.to_path_buf(),
            header,
            writer,
            records: 0,
        })
    }

    /// Append to an existing archive with the same layout, or create it
    pub fn append_to(path: &Path, shape: Shape, fields: Vec<StateField>) -> IoResult<Self> {
        if !path.exists() {
            return Self::create(path, shape, fields);
        }
        let existing = OutputArchive::load(path)?;
        if existing.header.shape != shape || existing.header.fields != fields {
            return Err(IoError::format(
                FORMAT,
                path,
                "existing archive has a different shape or field list",
            ));
        }
        let file = OpenOptions::new()
            .append(true)
            .open(path)
            .map_err(|e| IoError::io(path, e))?;

        Ok(Self {
            path: path.to_path_buf(),
            records: existing.records.len(),
            header: existing.header,
            writer: BufWriter::new(file),
        })
    }

    /// Archive path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records written so far (including pre-existing ones)
    pub fn records(&self) -> usize {
        self.records
    }

    /// Append a batch, returns the bytes written
    pub fn append(&mut self, batch: &[StateSnapshot]) -> IoResult<u64> {
        let mut written = 0u64;
        for snapshot in batch {
            let record = self.encode_record(snapshot)?;
            self.writer
                .write_all(&record)
                .map_err(|e| IoError::io(&self.path, e))?;
            written += record.len() as u64;
            self.records += 1;
        }
        self.writer
            .flush()
            .map_err(|e| IoError::io(&self.path, e))?;
        debug!(path = %self.path.display(), records = batch.len(), bytes = written, "archive batch appended");
        Ok(written)
    }

    fn encode_record(&self, snapshot: &StateSnapshot) -> IoResult<Vec<u8>> {
        let mut data = Vec::with_capacity(self.header.record_len().unwrap_or(0));
        data.extend_from_slice(&snapshot.key.and_utc().timestamp().to_le_bytes());
        data.extend_from_slice(&snapshot.water_year_hour.to_le_bytes());

        for field in &self.header.fields {
            let g = snapshot.require(*field)?;
            if g.dim() != self.header.shape.dim() {
                return Err(IoError::Shape {
                    name: field.key().to_string(),
                    expected: self.header.shape.dim(),
                    actual: g.dim(),
                });
            }
            for v in g.iter() {
                data.extend_from_slice(&v.to_le_bytes());
            }
        }

        let crc = crc32(&data);
        data.extend_from_slice(&crc.to_le_bytes());
        Ok(data)
    }
}

// ============================================================================
// Reader
// ============================================================================

/// Fully loaded archive
#[derive(Debug, Clone)]
pub struct OutputArchive {
    /// Header
    pub header: ArchiveHeader,
    /// Records, file order
    pub records: Vec<StateSnapshot>,
}

impl OutputArchive {
    /// Load and verify every record
    pub fn load(path: &Path) -> IoResult<Self> {
        let mut bytes = Vec::new();
        File::open(path)
            .and_then(|mut f| f.read_to_end(&mut bytes))
            .map_err(|e| IoError::io(path, e))?;

        let mut reader = ByteReader::new(&bytes, path, FORMAT);
        let header = ArchiveHeader::decode(&mut reader)?;

        let record_len = header
            .record_len()
            .ok_or_else(|| reader.error(format!("record size of a {} grid overflows", header.shape)))?;
        if reader.remaining() % record_len != 0 {
            return Err(reader.error("truncated record"));
        }

        let n_cells = header.shape.n_cells();
        let mut records = Vec::with_capacity(reader.remaining() / record_len);
        while reader.remaining() > 0 {
            let index = records.len();
            let body = reader.take(record_len - 4)?;
            let stored = reader.u32()?;
            let computed = crc32(body);
            if stored != computed {
                return Err(IoError::Checksum {
                    path: path.to_path_buf(),
                    record: index,
                    stored,
                    computed,
                });
            }

            let mut rec = ByteReader::new(body, path, FORMAT);
            let secs = rec.i64()?;
            let key = DateTime::from_timestamp(secs, 0)
                .map(|d| d.naive_utc())
                .ok_or_else(|| rec.error(format!("record {}: bad timestamp {}", index, secs)))?;
            let water_year_hour = rec.f64()?;

            let mut fields = BTreeMap::new();
            for field in &header.fields {
                let mut values = Vec::with_capacity(n_cells);
                for _ in 0..n_cells {
                    values.push(rec.f64()?);
                }
                let g = grid::from_vec(header.shape, values)
                    .map_err(|e| rec.error(e.to_string()))?;
                fields.insert(*field, g);
            }

            records.push(StateSnapshot {
                key,
                water_year_hour,
                fields,
            });
        }

        Ok(Self { header, records })
    }

    /// Record whose water-year hour is closest to `hour`, with the distance
    ///
    /// On ties the record written last wins, so a rerun after a crash
    /// restart shadows the records of the crashed run.
    pub fn nearest(&self, hour: f64) -> Option<(&StateSnapshot, f64)> {
        self.records
            .iter()
            .rev()
            .map(|r| (r, (r.water_year_hour - hour).abs()))
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }
}

// ============================================================================
// Byte reader
// ============================================================================

/// Little-endian cursor over a byte slice
pub(crate) struct ByteReader<'a> {
    data: &'a [u8],
    offset: usize,
    path: &'a Path,
    format: &'static str,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(data: &'a [u8], path: &'a Path, format: &'static str) -> Self {
        Self {
            data,
            offset: 0,
            path,
            format,
        }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    pub(crate) fn error(&self, reason: impl Into<String>) -> IoError {
        IoError::format(self.format, self.path, reason)
    }

    pub(crate) fn take(&mut self, n: usize) -> IoResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(self.error(format!("unexpected end of file at byte {}", self.offset)));
        }
        let data: &'a [u8] = self.data;
        let slice = &data[self.offset..self.offset + n];
        self.offset += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> IoResult<[u8; N]> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.take(N)?);
        Ok(buf)
    }

    pub(crate) fn u32(&mut self) -> IoResult<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub(crate) fn u64(&mut self) -> IoResult<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    /// Grid dimension stored as `u64`
    pub(crate) fn dim(&mut self) -> IoResult<usize> {
        let value = self.u64()?;
        usize::try_from(value).map_err(|_| self.error(format!("grid dimension {} out of range", value)))
    }

    pub(crate) fn i64(&mut self) -> IoResult<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    pub(crate) fn f64(&mut self) -> IoResult<f64> {
        Ok(f64::from_le_bytes(self.array()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};

    fn key(d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2018, 1, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn snapshot(k: NaiveDateTime, depth: f64) -> StateSnapshot {
        let shape = Shape::new(2, 3);
        StateSnapshot::new(k)
            .with_field(StateField::ZS, grid::filled(shape, depth))
            .with_field(StateField::Rho, grid::filled(shape, 250.0))
    }

    #[test]
    fn test_write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("snow.sdar");
        let fields = vec![StateField::ZS, StateField::Rho];

        let mut writer = ArchiveWriter::create(&path, Shape::new(2, 3), fields.clone()).unwrap();
        writer.append(&[snapshot(key(1, 0), 0.5), snapshot(key(1, 1), 0.6)]).unwrap();
        writer.append(&[snapshot(key(1, 2), 0.7)]).unwrap();
        drop(writer);

        let archive = OutputArchive::load(&path).unwrap();
        assert_eq!(archive.header.fields, fields);
        assert_eq!(archive.records.len(), 3);
        assert_eq!(archive.records[1].key, key(1, 1));
        assert_eq!(archive.records[2].get(StateField::ZS).unwrap()[[1, 2]], 0.7);
    }

    #[test]
    fn test_missing_field_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snow.sdar");
        let mut writer =
            ArchiveWriter::create(&path, Shape::new(2, 3), vec![StateField::ZS, StateField::TS]).unwrap();
        let err = writer.append(&[snapshot(key(1, 0), 0.5)]).unwrap_err();
        assert!(matches!(err, IoError::MissingField { .. }));
    }

    #[test]
    fn test_corrupted_record_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snow.sdar");
        let mut writer = ArchiveWriter::create(&path, Shape::new(2, 3), vec![StateField::ZS]).unwrap();
        writer.append(&[snapshot(key(1, 0), 0.5)]).unwrap();
        drop(writer);

        let mut bytes = std::fs::read(&path).unwrap();
        let n = bytes.len();
        bytes[n - 10] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            OutputArchive::load(&path),
            Err(IoError::Checksum { record: 0, .. })
        ));
    }

    #[test]
    fn test_truncated_record_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snow.sdar");
        let mut writer = ArchiveWriter::create(&path, Shape::new(2, 3), vec![StateField::ZS]).unwrap();
        writer.append(&[snapshot(key(1, 0), 0.5)]).unwrap();
        drop(writer);

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();
        assert!(matches!(OutputArchive::load(&path), Err(IoError::Format { .. })));
    }

    #[test]
    fn test_append_to_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snow.sdar");
        let fields = vec![StateField::ZS];
        let mut writer = ArchiveWriter::create(&path, Shape::new(2, 3), fields.clone()).unwrap();
        writer.append(&[snapshot(key(1, 0), 0.5)]).unwrap();
        drop(writer);

        let mut writer = ArchiveWriter::append_to(&path, Shape::new(2, 3), fields).unwrap();
        assert_eq!(writer.records(), 1);
        writer.append(&[snapshot(key(1, 1), 0.4)]).unwrap();
        drop(writer);

        assert_eq!(OutputArchive::load(&path).unwrap().records.len(), 2);
        assert!(ArchiveWriter::append_to(&path, Shape::new(3, 3), vec![StateField::ZS]).is_err());
    }

    #[test]
    fn test_nearest_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snow.sdar");
        let mut writer = ArchiveWriter::create(&path, Shape::new(2, 3), vec![StateField::ZS]).unwrap();
        writer
            .append(&[snapshot(key(1, 0), 0.1), snapshot(key(2, 0), 0.2), snapshot(key(3, 0), 0.3)])
            .unwrap();
        drop(writer);

        let archive = OutputArchive::load(&path).unwrap();
        let target = archive.records[1].water_year_hour + 5.0;
        let (record, distance) = archive.nearest(target).unwrap();
        assert_eq!(record.key, key(2, 0));
        assert_eq!(distance, 5.0);
    }

    #[test]
    fn test_nearest_prefers_rerun_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snow.sdar");
        let fields = vec![StateField::ZS];
        let mut writer = ArchiveWriter::create(&path, Shape::new(2, 3), fields.clone()).unwrap();
        writer.append(&[snapshot(key(1, 4), 0.9), snapshot(key(1, 5), 1.0)]).unwrap();
        drop(writer);

        // restart at hour 4 writes hour 5 again
        let mut writer = ArchiveWriter::append_to(&path, Shape::new(2, 3), fields).unwrap();
        writer.append(&[snapshot(key(1, 5), 2.0)]).unwrap();
        drop(writer);

        let archive = OutputArchive::load(&path).unwrap();
        assert_eq!(archive.records.len(), 3);
        let hour = archive.records[1].water_year_hour;
        let (record, distance) = archive.nearest(hour).unwrap();
        assert_eq!(distance, 0.0);
        assert_eq!(record.get(StateField::ZS).unwrap()[[0, 0]], 2.0);
    }

    #[test]
    fn test_oversized_header_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snow.sdar");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(ARCHIVE_MAGIC);
        bytes.extend_from_slice(&ARCHIVE_VERSION.to_le_bytes());
        bytes.extend_from_slice(&u64::MAX.to_le_bytes());
        bytes.extend_from_slice(&2u64.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.push(StateField::ZS.id());
        bytes.extend_from_slice(&[0u8; 64]);
        std::fs::write(&path, &bytes).unwrap();

        assert!(matches!(OutputArchive::load(&path), Err(IoError::Format { .. })));
    }
}
