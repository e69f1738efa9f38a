//! Aligned multi-variable dataset and per-variable alignment configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use risk_common::{GridSpec, TemporalReducer, VariableId, YearMonth};

/// Spatial resampling method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpatialMethod {
    Nearest,
    Bilinear,
}

/// Per-variable alignment configuration. Explicit, never inferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignmentSpec {
    pub spatial: SpatialMethod,
    pub reducer: TemporalReducer,
}

impl AlignmentSpec {
    /// Registry defaults for a variable: bilinear resampling plus the
    /// variable's declared reducer. Configuration may override either.
    pub fn registry_default(variable: VariableId) -> Self {
        Self {
            spatial: SpatialMethod::Bilinear,
            reducer: variable.reducer(),
        }
    }
}

/// All contributing variables on one grid and one time axis.
///
/// Every variable holds `times.len()` consecutive row-major grids of
/// identical shape; NaN marks a cell/step with no data.
#[derive(Debug, Clone)]
pub struct AlignedDataset {
    pub grid: GridSpec,
    pub times: Vec<YearMonth>,
    pub variables: BTreeMap<VariableId, Vec<f32>>,
}

impl AlignedDataset {
    /// Value of `variable` at (col, row, t), NaN when missing.
    pub fn get(&self, variable: VariableId, col: usize, row: usize, t: usize) -> f32 {
        self.variables[&variable][t * self.grid.len() + self.grid.flat_index(col, row)]
    }

    /// The grid slice of `variable` at time step `t`.
    pub fn step(&self, variable: VariableId, t: usize) -> &[f32] {
        let n = self.grid.len();
        &self.variables[&variable][t * n..(t + 1) * n]
    }

    pub fn has_variable(&self, variable: VariableId) -> bool {
        self.variables.contains_key(&variable)
    }

    /// Whether any of the given variables is missing at (col, row, t).
    pub fn any_missing(&self, variables: &[VariableId], col: usize, row: usize, t: usize) -> bool {
        variables
            .iter()
            .any(|v| self.get(*v, col, row, t).is_nan())
    }

    /// Count of cell/steps missing in at least one of the given variables.
    pub fn missing_count(&self, variables: &[VariableId]) -> u64 {
        let mut count = 0;
        for t in 0..self.times.len() {
            for row in 0..self.grid.ny {
                for col in 0..self.grid.nx {
                    if self.any_missing(variables, col, row, t) {
                        count += 1;
                    }
                }
            }
        }
        count
    }
}
