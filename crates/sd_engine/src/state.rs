// crates/sd_engine/src/state.rs

//! State record
//!
//! The integrator's full mutable state: one grid per [`StateField`], all of
//! the domain shape.
//!
//! # Invariants
//!
//! - Every field exists and has the mask's shape for the lifetime of the
//!   record. Grids are only replaced through [`StateRecord::set`], which
//!   checks the shape; in-place access hands out views that cannot resize.
//! - Static fields (mask, elevation, roughness) are fixed by
//!   [`StateRecord::new`] and are never handed out mutably.

use std::ops::Index;

use ndarray::{Array2, ArrayViewMut2, Zip};
use sd_foundation::grid::{self, Grid, Shape};
use sd_foundation::time::SECONDS_PER_HOUR;
use sd_foundation::TimestepKey;
use sd_io::{StateField, StateSnapshot};
use tracing::warn;

use crate::error::{EngineError, EngineResult};

/// Fields cleared by the shallow-snow reset
const RESET_ZEROED: [StateField; 3] = [StateField::ZS, StateField::Rho, StateField::H2oSat];

/// Mutable physical state of the domain
#[derive(Debug, Clone, PartialEq)]
pub struct StateRecord {
    shape: Shape,
    // indexed by StateField::id
    fields: Vec<Grid>,
}

impl StateRecord {
    /// Record with the given static fields and every dynamic field zero
    pub fn new(mask: Grid, elevation: Grid, roughness: Grid) -> EngineResult<Self> {
        let shape = Shape::of(&mask);
        let mut fields: Vec<Grid> = StateField::ALL.iter().map(|_| grid::zeros(shape)).collect();

        for (field, g) in [
            (StateField::Mask, mask),
            (StateField::Elevation, elevation),
            (StateField::Z0, roughness),
        ] {
            check_shape(field, &g, shape)?;
            fields[field.id() as usize] = g;
        }
        Ok(Self { shape, fields })
    }

    /// Unmasked flat domain, for tests and dry runs
    pub fn flat(shape: Shape, elevation: f64, roughness: f64) -> Self {
        let mut fields: Vec<Grid> = StateField::ALL.iter().map(|_| grid::zeros(shape)).collect();
        fields[StateField::Mask.id() as usize] = grid::filled(shape, 1.0);
        fields[StateField::Elevation.id() as usize] = grid::filled(shape, elevation);
        fields[StateField::Z0.id() as usize] = grid::filled(shape, roughness);
        Self { shape, fields }
    }

    /// Domain shape
    pub fn shape(&self) -> Shape {
        self.shape
    }

    /// Grid of a field
    pub fn get(&self, field: StateField) -> &Grid {
        &self.fields[field.id() as usize]
    }

    /// In-place view of a dynamic field, `None` for static fields
    pub fn get_mut(&mut self, field: StateField) -> Option<ArrayViewMut2<'_, f64>> {
        if field.is_static() {
            return None;
        }
        Some(self.fields[field.id() as usize].view_mut())
    }

    /// Replace a dynamic field
    pub fn set(&mut self, field: StateField, g: Grid) -> EngineResult<()> {
        if field.is_static() {
            return Err(EngineError::StaticField(field.key().to_string()));
        }
        check_shape(field, &g, self.shape)?;
        self.fields[field.id() as usize] = g;
        Ok(())
    }

    /// Fill a dynamic field with a scalar
    pub fn fill(&mut self, field: StateField, value: f64) -> EngineResult<()> {
        match self.get_mut(field) {
            Some(mut view) => {
                view.fill(value);
                Ok(())
            }
            None => Err(EngineError::StaticField(field.key().to_string())),
        }
    }

    /// Multiply dynamic fields by the mask
    pub fn apply_mask(&mut self, fields: &[StateField]) {
        let mask = self.get(StateField::Mask).clone();
        for field in fields.iter().filter(|f| !f.is_static()) {
            let g = &mut self.fields[field.id() as usize];
            Zip::from(g).and(&mask).par_for_each(|v, &m| *v *= m);
        }
    }

    /// Zero out the snowpack where depth is below `threshold`
    ///
    /// Affected cells get depth, density and saturation 0 and all three
    /// layer temperatures set to `reset_temperature`. Returns the number of
    /// affected cells.
    pub fn reset_shallow(&mut self, threshold: f64, reset_temperature: f64) -> usize {
        let hit: Array2<bool> = self.get(StateField::ZS).mapv(|d| d < threshold);
        let affected = self.reset_where(&hit, reset_temperature);
        warn!(
            threshold,
            affected,
            total = self.shape.n_cells(),
            "shallow snow reset"
        );
        affected
    }

    /// Clear the snowpack in the cells flagged by `hit`
    pub fn reset_where(&mut self, hit: &Array2<bool>, reset_temperature: f64) -> usize {
        for (fields, value) in [
            (&RESET_ZEROED[..], 0.0),
            (&StateField::TEMPERATURES[..], reset_temperature),
        ] {
            for field in fields {
                let g = &mut self.fields[field.id() as usize];
                Zip::from(g).and(hit).par_for_each(|v, &h| {
                    if h {
                        *v = value;
                    }
                });
            }
        }
        hit.iter().filter(|h| **h).count()
    }

    /// Add `delta` to every cell of a dynamic field
    pub fn shift(&mut self, field: StateField, delta: f64) -> EngineResult<()> {
        match self.get_mut(field) {
            Some(mut view) => {
                view.mapv_inplace(|v| v + delta);
                Ok(())
            }
            None => Err(EngineError::StaticField(field.key().to_string())),
        }
    }

    /// Elapsed simulation time [s], read from the first cell
    pub fn current_time(&self) -> f64 {
        self.get(StateField::CurrentTime)
            .iter()
            .next()
            .copied()
            .unwrap_or(0.0)
    }

    /// Start the run clock at a water-year hour
    pub fn set_clock(&mut self, water_year_hour: f64) {
        self.fields[StateField::CurrentTime.id() as usize].fill(water_year_hour * SECONDS_PER_HOUR);
        self.fields[StateField::TimeSinceOut.id() as usize].fill(0.0);
    }

    /// Advance both clocks by `seconds`
    pub fn advance_clock(&mut self, seconds: f64) {
        for field in [StateField::CurrentTime, StateField::TimeSinceOut] {
            self.fields[field.id() as usize].mapv_inplace(|v| v + seconds);
        }
    }

    /// Reset the time since the last output
    pub fn reset_time_since_out(&mut self) {
        self.fields[StateField::TimeSinceOut.id() as usize].fill(0.0);
    }

    /// Copy the requested fields into a snapshot
    pub fn snapshot(&self, key: TimestepKey, fields: &[StateField]) -> StateSnapshot {
        let mut snapshot = StateSnapshot::new(key);
        for field in fields {
            snapshot.fields.insert(*field, self.get(*field).clone());
        }
        snapshot
    }

    /// Whether two records are bitwise identical
    pub fn bitwise_eq(&self, other: &Self) -> bool {
        self.shape == other.shape
            && self
                .fields
                .iter()
                .zip(other.fields.iter())
                .all(|(a, b)| grid::bitwise_eq(a, b))
    }
}

impl Index<StateField> for StateRecord {
    type Output = Grid;

    fn index(&self, field: StateField) -> &Grid {
        self.get(field)
    }
}

fn check_shape(field: StateField, g: &Grid, shape: Shape) -> EngineResult<()> {
    if g.dim() != shape.dim() {
        return Err(EngineError::Shape {
            field: field.key().to_string(),
            expected: shape.dim(),
            actual: g.dim(),
        });
    }
    Ok(())
}
