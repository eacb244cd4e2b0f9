// crates/sd_forcing/src/producer.rs

//! Forcing producers
//!
//! A producer answers `get(variable, key)` with a grid or `None` for "no
//! data". The same producer backs both execution modes: the driver calls it
//! directly in pull mode, and one worker per variable calls it in
//! concurrent mode.

use std::collections::BTreeMap;
use std::fmt;

use sd_foundation::grid::{self, Grid, Shape};
use sd_foundation::TimestepKey;

use crate::csv::ForcingTable;
use crate::error::{ForcingError, ForcingResult};
use crate::variables::ForcingVariable;

/// Source of forcing grids
pub trait ForcingProducer: Send + Sync {
    /// Variables this producer can deliver
    fn variables(&self) -> Vec<ForcingVariable>;

    /// Grid of `variable` at `key`, `None` when there is no data
    fn get(&self, variable: ForcingVariable, key: &TimestepKey) -> ForcingResult<Option<Grid>>;

    /// Check that every required variable is offered
    fn ensure_provides(&self, required: &[ForcingVariable]) -> ForcingResult<()> {
        let offered = self.variables();
        match required.iter().find(|v| !offered.contains(v)) {
            Some(missing) => Err(ForcingError::MissingVariable(*missing)),
            None => Ok(()),
        }
    }
}

// ============================================================================
// ConstantProducer
// ============================================================================

/// Uniform value per variable, the same at every timestep
#[derive(Debug, Clone)]
pub struct ConstantProducer {
    shape: Shape,
    values: BTreeMap<ForcingVariable, f64>,
}

impl ConstantProducer {
    /// Empty producer
    pub fn new(shape: Shape) -> Self {
        Self {
            shape,
            values: BTreeMap::new(),
        }
    }

    /// Set a value
    pub fn with(mut self, variable: ForcingVariable, value: f64) -> Self {
        self.values.insert(variable, value);
        self
    }
}

impl ForcingProducer for ConstantProducer {
    fn variables(&self) -> Vec<ForcingVariable> {
        self.values.keys().copied().collect()
    }

    fn get(&self, variable: ForcingVariable, _key: &TimestepKey) -> ForcingResult<Option<Grid>> {
        Ok(self.values.get(&variable).map(|&v| grid::filled(self.shape, v)))
    }
}

// ============================================================================
// TableProducer
// ============================================================================

/// Station table broadcast over the domain
///
/// Each row is one timestep; an empty cell or a key with no row yields
/// `None`.
#[derive(Debug, Clone)]
pub struct TableProducer {
    shape: Shape,
    table: ForcingTable,
}

impl TableProducer {
    /// Wrap a loaded table
    pub fn new(shape: Shape, table: ForcingTable) -> Self {
        Self { shape, table }
    }

    /// Underlying table
    pub fn table(&self) -> &ForcingTable {
        &self.table
    }
}

impl ForcingProducer for TableProducer {
    fn variables(&self) -> Vec<ForcingVariable> {
        self.table.variables().to_vec()
    }

    fn get(&self, variable: ForcingVariable, key: &TimestepKey) -> ForcingResult<Option<Grid>> {
        Ok(self
            .table
            .value(variable, key)
            .map(|v| grid::filled(self.shape, v)))
    }
}

// ============================================================================
// FnProducer
// ============================================================================

/// Producer backed by a closure, for synthetic forcing
pub struct FnProducer<F> {
    variables: Vec<ForcingVariable>,
    func: F,
}

impl<F> FnProducer<F>
where
    F: Fn(ForcingVariable, &TimestepKey) -> Option<Grid> + Send + Sync,
{
    /// Producer for `variables` computing each grid with `func`
    pub fn new(variables: Vec<ForcingVariable>, func: F) -> Self {
        Self { variables, func }
    }
}

impl<F> fmt::Debug for FnProducer<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnProducer")
            .field("variables", &self.variables)
            .finish_non_exhaustive()
    }
}

impl<F> ForcingProducer for FnProducer<F>
where
    F: Fn(ForcingVariable, &TimestepKey) -> Option<Grid> + Send + Sync,
{
    fn variables(&self) -> Vec<ForcingVariable> {
        self.variables.clone()
    }

    fn get(&self, variable: ForcingVariable, key: &TimestepKey) -> ForcingResult<Option<Grid>> {
        if !self.variables.contains(&variable) {
            return Ok(None);
        }
        Ok((self.func)(variable, key))
    }
}
