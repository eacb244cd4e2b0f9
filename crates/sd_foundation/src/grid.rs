// crates/sd_foundation/src/grid.rs

//! Gridded fields
//!
//! Every spatial field in the workspace is a row-major `ny × nx` array of
//! `f64`. Forcing grids, state fields and archive records all share the
//! [`Grid`] alias so shapes can be checked in one place.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{SdError, SdResult};

/// 2-D numeric grid (`ny` rows × `nx` columns)
pub type Grid = Array2<f64>;

/// Domain shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    /// Rows
    pub ny: usize,
    /// Columns
    pub nx: usize,
}

impl Shape {
    /// Create a shape
    pub const fn new(ny: usize, nx: usize) -> Self {
        Self { ny, nx }
    }

    /// Shape of an existing grid
    pub fn of(grid: &Grid) -> Self {
        let (ny, nx) = grid.dim();
        Self { ny, nx }
    }

    /// Number of cells
    #[inline]
    pub fn n_cells(&self) -> usize {
        self.ny * self.nx
    }

    /// `(ny, nx)` tuple, as used by ndarray
    #[inline]
    pub fn dim(&self) -> (usize, usize) {
        (self.ny, self.nx)
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.ny, self.nx)
    }
}

/// All-zero grid
pub fn zeros(shape: Shape) -> Grid {
    Grid::zeros(shape.dim())
}

/// Grid filled with a scalar (scalar broadcast)
pub fn filled(shape: Shape, value: f64) -> Grid {
    Grid::from_elem(shape.dim(), value)
}

/// Build a grid from row-major values
pub fn from_vec(shape: Shape, values: Vec<f64>) -> SdResult<Grid> {
    let n = values.len();
    Grid::from_shape_vec(shape.dim(), values).map_err(|_| {
        SdError::invalid_input(format!(
            "{} values cannot fill a {} grid",
            n, shape
        ))
    })
}

/// Check that `grid` has the expected shape
pub fn ensure_shape(name: &str, grid: &Grid, expected: Shape) -> SdResult<()> {
    let actual = grid.dim();
    if actual != expected.dim() {
        return Err(SdError::shape_mismatch(name, expected.dim(), actual));
    }
    Ok(())
}

/// Bitwise equality, NaN payloads included
pub fn bitwise_eq(a: &Grid, b: &Grid) -> bool {
    a.dim() == b.dim()
        && a.iter()
            .zip(b.iter())
            .all(|(x, y)| x.to_bits() == y.to_bits())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_of() {
        let g = zeros(Shape::new(3, 5));
        assert_eq!(Shape::of(&g), Shape::new(3, 5));
        assert_eq!(Shape::new(3, 5).n_cells(), 15);
    }

    #[test]
    fn test_filled() {
        let g = filled(Shape::new(2, 2), -2.5);
        assert!(g.iter().all(|&v| v == -2.5));
    }

    #[test]
    fn test_from_vec_wrong_len() {
        assert!(from_vec(Shape::new(2, 2), vec![1.0; 3]).is_err());
        assert!(from_vec(Shape::new(2, 2), vec![1.0; 4]).is_ok());
    }

    #[test]
    fn test_ensure_shape() {
        let g = zeros(Shape::new(2, 3));
        assert!(ensure_shape("g", &g, Shape::new(2, 3)).is_ok());
        assert!(ensure_shape("g", &g, Shape::new(3, 2)).is_err());
    }

    #[test]
    fn test_bitwise_eq() {
        let a = filled(Shape::new(2, 2), 0.1 + 0.2);
        let mut b = a.clone();
        assert!(bitwise_eq(&a, &b));
        b[[1, 1]] = 0.3;
        assert!(!bitwise_eq(&a, &b));
    }

    #[test]
    fn test_shape_serde() {
        let s = Shape::new(4, 7);
        let json = serde_json::to_string(&s).unwrap();
        let parsed: Shape = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, s);
    }
}
