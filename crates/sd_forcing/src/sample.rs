// crates/sd_forcing/src/sample.rs

//! Forcing samples
//!
//! A [`ForcingSample`] is what the stream delivered for one timestep, in the
//! distributor's units, with every absent variable already replaced by an
//! all-zero grid. A [`NormalizedSample`] is the same data in the
//! integrator's units. The only way to obtain a `NormalizedSample` is
//! [`Normalizer::normalize`], which consumes the raw sample, so a grid is
//! converted exactly once no matter how long it stays in the sliding window.

use std::collections::BTreeMap;

use ndarray::Zip;
use sd_foundation::grid::{self, Grid, Shape};
use sd_foundation::TimestepKey;
use tracing::warn;

use crate::error::{ForcingError, ForcingResult};
use crate::variables::ForcingVariable;

/// Offset between °C and K used by the integrator
pub const FREEZE: f64 = 273.16;

/// Forcing sample in distributor units
#[derive(Debug, Clone)]
pub struct ForcingSample {
    key: TimestepKey,
    grids: BTreeMap<ForcingVariable, Grid>,
}

impl ForcingSample {
    /// Assemble a sample from per-variable slices
    ///
    /// `None` means the producer had no data; the variable is replaced by
    /// zeros and a warning is logged.
    pub fn assemble<I>(key: TimestepKey, shape: Shape, slices: I) -> ForcingResult<Self>
    where
        I: IntoIterator<Item = (ForcingVariable, Option<Grid>)>,
    {
        let mut grids = BTreeMap::new();
        for (variable, slice) in slices {
            let grid = match slice {
                Some(g) => {
                    if g.dim() != shape.dim() {
                        return Err(ForcingError::Shape {
                            variable,
                            expected: shape.dim(),
                            actual: g.dim(),
                        });
                    }
                    g
                }
                None => {
                    warn!(
                        variable = variable.name(),
                        key = %key,
                        "no forcing data, substituting zeros"
                    );
                    grid::zeros(shape)
                }
            };
            grids.insert(variable, grid);
        }
        Ok(Self { key, grids })
    }

    /// Timestep
    pub fn key(&self) -> TimestepKey {
        self.key
    }

    /// Grid of one variable
    pub fn get(&self, variable: ForcingVariable) -> Option<&Grid> {
        self.grids.get(&variable)
    }

    /// Variables present
    pub fn variables(&self) -> impl Iterator<Item = ForcingVariable> + '_ {
        self.grids.keys().copied()
    }
}

/// Forcing sample in integrator units
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedSample {
    key: TimestepKey,
    grids: BTreeMap<ForcingVariable, Grid>,
}

impl NormalizedSample {
    /// Timestep
    pub fn key(&self) -> TimestepKey {
        self.key
    }

    /// Grid of one variable
    pub fn get(&self, variable: ForcingVariable) -> Option<&Grid> {
        self.grids.get(&variable)
    }

    /// Grid by integrator key (`T_a`, `m_pp`, ...)
    pub fn by_integrator_key(&self, key: &str) -> Option<&Grid> {
        self.grids
            .iter()
            .find(|(v, _)| v.integrator_key() == key)
            .map(|(_, g)| g)
    }

    /// All grids in integrator input order
    pub fn iter(&self) -> impl Iterator<Item = (ForcingVariable, &Grid)> {
        self.grids.iter().map(|(v, g)| (*v, g))
    }
}

/// Unit normalization applied once per sample at window ingestion
#[derive(Debug, Clone)]
pub struct Normalizer {
    shape: Shape,
    soil_temp: f64,
}

impl Normalizer {
    /// Normalizer for a domain with a uniform soil temperature [°C]
    pub fn new(shape: Shape, soil_temp: f64) -> Self {
        Self { shape, soil_temp }
    }

    /// Domain shape
    pub fn shape(&self) -> Shape {
        self.shape
    }

    /// Synthesize ground temperature and shift temperatures to K
    pub fn normalize(&self, sample: ForcingSample) -> NormalizedSample {
        let ForcingSample { key, mut grids } = sample;

        grids.insert(
            ForcingVariable::SoilTemp,
            grid::filled(self.shape, self.soil_temp),
        );

        for (variable, g) in grids.iter_mut() {
            if variable.is_temperature() {
                Zip::from(g).par_for_each(|v| *v += FREEZE);
            }
        }

        NormalizedSample { key, grids }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn key() -> TimestepKey {
        NaiveDate::from_ymd_opt(2018, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_missing_becomes_zero() {
        let shape = Shape::new(2, 3);
        let sample = ForcingSample::assemble(
            key(),
            shape,
            vec![
                (ForcingVariable::WindSpeed, None),
                (ForcingVariable::AirTemp, Some(grid::filled(shape, -3.0))),
            ],
        )
        .unwrap();

        let wind = sample.get(ForcingVariable::WindSpeed).unwrap();
        assert_eq!(wind.dim(), (2, 3));
        assert!(wind.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_wrong_shape_rejected() {
        let shape = Shape::new(2, 3);
        let result = ForcingSample::assemble(
            key(),
            shape,
            vec![(ForcingVariable::Thermal, Some(grid::zeros(Shape::new(3, 2))))],
        );
        assert!(matches!(result, Err(ForcingError::Shape { .. })));
    }

    #[test]
    fn test_normalize_temperatures_once() {
        let shape = Shape::new(2, 2);
        let sample = ForcingSample::assemble(
            key(),
            shape,
            vec![
                (ForcingVariable::AirTemp, Some(grid::filled(shape, -5.0))),
                (ForcingVariable::PrecipTemp, Some(grid::filled(shape, 1.0))),
                (ForcingVariable::WindSpeed, Some(grid::filled(shape, 3.0))),
            ],
        )
        .unwrap();

        let normalized = Normalizer::new(shape, -2.5).normalize(sample);
        let ta = normalized.by_integrator_key("T_a").unwrap();
        let tpp = normalized.by_integrator_key("T_pp").unwrap();
        let tg = normalized.by_integrator_key("T_g").unwrap();
        let u = normalized.by_integrator_key("u").unwrap();

        assert!(ta.iter().all(|&v| v == -5.0 + FREEZE));
        assert!(tpp.iter().all(|&v| v == 1.0 + FREEZE));
        assert!(tg.iter().all(|&v| v == -2.5 + FREEZE));
        assert!(u.iter().all(|&v| v == 3.0));
    }

    #[test]
    fn test_streamed_soil_temp_is_replaced() {
        let shape = Shape::new(1, 1);
        let sample = ForcingSample::assemble(
            key(),
            shape,
            vec![(ForcingVariable::SoilTemp, Some(grid::filled(shape, 40.0)))],
        )
        .unwrap();
        let normalized = Normalizer::new(shape, 0.0).normalize(sample);
        assert_eq!(normalized.get(ForcingVariable::SoilTemp).unwrap()[[0, 0]], FREEZE);
    }
}
