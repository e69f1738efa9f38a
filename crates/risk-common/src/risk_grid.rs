//! The published risk grid artifact and its provenance metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{GridSpec, TimeRange, YearMonth};

/// Computed fire-risk scores on the canonical region grid.
///
/// Scores are in the declared output range (default [0, 1]); NaN marks an
/// indeterminate cell whose contributing data was missing. A grid is created
/// once per run and superseded, never mutated, by later runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskGrid {
    pub grid: GridSpec,
    /// Time axis, one entry per scored step.
    pub times: Vec<YearMonth>,
    /// Row-major scores, `times.len()` consecutive grids.
    #[serde(with = "crate::serde_nan")]
    pub scores: Vec<f32>,
    pub metadata: RiskGridMetadata,
}

impl RiskGrid {
    /// The score slice for time step `t`.
    pub fn step(&self, t: usize) -> &[f32] {
        let n = self.grid.len();
        &self.scores[t * n..(t + 1) * n]
    }

    /// Score at (col, row, t); NaN means indeterminate.
    pub fn get(&self, col: usize, row: usize, t: usize) -> f32 {
        self.scores[t * self.grid.len() + self.grid.flat_index(col, row)]
    }
}

/// Full provenance record attached to every published grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskGridMetadata {
    pub region_signature: String,
    pub resolution: f64,
    pub time_range: TimeRange,
    /// Contributing variables with their normalization parameters.
    pub variables: Vec<VariableProvenance>,
    /// Version label of the weighting configuration used.
    pub weighting_version: String,
    pub computed_at: DateTime<Utc>,
    /// Cache signatures of the raw datasets this grid was derived from.
    pub source_signatures: Vec<String>,
    /// Cells missing in at least one contributing variable.
    pub missing_cells: u64,
    /// Cells scored as indeterminate (missing and not filled by a fallback).
    pub indeterminate_cells: u64,
    /// Raw combinations that exceeded the output range and were clamped.
    pub clamped_cells: u64,
    /// Missing-data fallback strategy, when one was applied.
    pub fallback: Option<String>,
    /// Distribution statistics over all valid scores.
    pub stats: Option<RiskStats>,
}

impl RiskGridMetadata {
    /// Deterministic signature of the inputs and configuration that
    /// produced the grid. Two runs with equal provenance signatures would
    /// publish identical grids, so the second can be skipped.
    pub fn provenance_signature(&self) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(self.region_signature.as_bytes());
        hasher.update(self.time_range.signature().as_bytes());
        hasher.update(self.weighting_version.as_bytes());
        for sig in &self.source_signatures {
            hasher.update(sig.as_bytes());
        }
        hex::encode(&hasher.finalize()[..8])
    }
}

/// One contributing input's provenance. Inputs may be registry variables
/// or derived quantities (e.g. wind speed from its u/v components).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableProvenance {
    /// Input name, e.g. "t2m", "wind_speed", "relative_humidity".
    pub variable: String,
    pub weight: f64,
    /// Normalization method and parameters, e.g. "minmax(273.15..313.15)".
    pub normalization: String,
    /// Whether the normalized value was inverted (low raw = high risk).
    pub inverted: bool,
}

/// Distribution statistics computed over all valid scores of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskStats {
    pub mean: f64,
    pub std: f64,
    pub median: f64,
    pub p84: f64,
    pub p95: f64,
    /// Alert threshold: mean + one standard deviation.
    pub threshold: f64,
    /// Count of valid cells at or above the threshold.
    pub high_risk_cells: u64,
}
