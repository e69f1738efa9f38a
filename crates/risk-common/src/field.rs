//! Raw per-variable gridded data as retrieved from the archive.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{GridSpec, VariableId};

/// One variable's data on its native grid and time axis.
///
/// `values` is `times.len()` consecutive row-major grids; NaN marks a
/// missing sample. The (lat, lon, time) mapping is unique by construction:
/// each key maps to exactly one slot in the array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableField {
    pub variable: VariableId,
    pub grid: GridSpec,
    /// Native time axis (first day of the step for monthly data).
    pub times: Vec<NaiveDate>,
    #[serde(with = "crate::serde_nan")]
    pub values: Vec<f32>,
}

impl VariableField {
    pub fn new(
        variable: VariableId,
        grid: GridSpec,
        times: Vec<NaiveDate>,
        values: Vec<f32>,
    ) -> Self {
        debug_assert_eq!(values.len(), times.len() * grid.len());
        Self {
            variable,
            grid,
            times,
            values,
        }
    }

    /// The grid slice for time step `t`.
    pub fn step(&self, t: usize) -> &[f32] {
        let n = self.grid.len();
        &self.values[t * n..(t + 1) * n]
    }

    /// Value at (col, row, t).
    pub fn get(&self, col: usize, row: usize, t: usize) -> f32 {
        self.values[t * self.grid.len() + self.grid.flat_index(col, row)]
    }

    /// Replace values outside the variable's valid physical range with NaN.
    pub fn mask_invalid(&mut self) {
        let (lo, hi) = self.variable.valid_range();
        for v in &mut self.values {
            if !v.is_nan() && (*v < lo || *v > hi) {
                *v = f32::NAN;
            }
        }
    }

    /// Concatenate a later field for the same variable and grid onto this
    /// one along the time axis.
    pub fn extend_time(&mut self, other: VariableField) {
        debug_assert_eq!(self.variable, other.variable);
        debug_assert_eq!(self.grid, other.grid);
        self.times.extend(other.times);
        self.values.extend(other.values);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BoundingBox;

    fn field() -> VariableField {
        let grid = GridSpec::from_region(BoundingBox::new(0.0, 0.0, 1.0, 1.0), 1.0);
        // 2x2 grid, 2 time steps
        VariableField::new(
            VariableId::Temperature2m,
            grid,
            vec![
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            ],
            vec![280.0, 281.0, 282.0, 283.0, 290.0, 291.0, 292.0, 293.0],
        )
    }

    #[test]
    fn test_step_slicing() {
        let f = field();
        assert_eq!(f.step(0), &[280.0, 281.0, 282.0, 283.0]);
        assert_eq!(f.step(1), &[290.0, 291.0, 292.0, 293.0]);
        assert_eq!(f.get(1, 1, 1), 293.0);
    }

    #[test]
    fn test_mask_invalid() {
        let mut f = field();
        f.values[0] = 50.0; // below valid Kelvin range
        f.mask_invalid();
        assert!(f.values[0].is_nan());
        assert_eq!(f.values[1], 281.0);
    }

    #[test]
    fn test_extend_time() {
        let mut a = field();
        let mut b = field();
        b.times = vec![
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(),
        ];
        a.extend_time(b);
        assert_eq!(a.times.len(), 4);
        assert_eq!(a.values.len(), 16);
    }
}
