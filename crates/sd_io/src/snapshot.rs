// crates/sd_io/src/snapshot.rs

//! State snapshots
//!
//! Read-only copy of the output fields of a state record at a flush point.
//! Snapshots cross the thread boundary into the output writer, so the state
//! record itself is never shared.

use std::collections::BTreeMap;

use sd_foundation::grid::{Grid, Shape};
use sd_foundation::time::water_year_hour;
use sd_foundation::TimestepKey;

use crate::error::{IoError, IoResult};
use crate::field::StateField;

/// Snapshot of selected state fields
#[derive(Debug, Clone, PartialEq)]
pub struct StateSnapshot {
    /// Timestep of the flush
    pub key: TimestepKey,
    /// Water-year hour of `key`
    pub water_year_hour: f64,
    /// Field grids
    pub fields: BTreeMap<StateField, Grid>,
}

impl StateSnapshot {
    /// Empty snapshot at `key`
    pub fn new(key: TimestepKey) -> Self {
        Self {
            key,
            water_year_hour: water_year_hour(&key),
            fields: BTreeMap::new(),
        }
    }

    /// Add a field
    pub fn with_field(mut self, field: StateField, grid: Grid) -> Self {
        self.fields.insert(field, grid);
        self
    }

    /// Grid of one field
    pub fn get(&self, field: StateField) -> Option<&Grid> {
        self.fields.get(&field)
    }

    /// Grid of one field, error when absent
    pub fn require(&self, field: StateField) -> IoResult<&Grid> {
        self.fields.get(&field).ok_or_else(|| IoError::MissingField {
            field: field.key().to_string(),
            key: self.key.to_string(),
        })
    }

    /// Shape shared by the fields (`None` when empty)
    pub fn shape(&self) -> Option<Shape> {
        self.fields.values().next().map(Shape::of)
    }

    /// Payload size in bytes
    pub fn size_bytes(&self) -> usize {
        self.fields.values().map(|g| g.len() * 8).sum()
    }
}
