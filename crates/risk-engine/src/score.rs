//! Scoring: aligned variables to a composite risk grid.

use chrono::Utc;
use rayon::prelude::*;
use tracing::{debug, info};

use aligner::AlignedDataset;
use risk_common::{
    PipelineResult, RiskGrid, RiskGridMetadata, RiskStats, TimeRange, VariableId,
    VariableProvenance,
};

use crate::config::{MissingFallback, Normalization, RiskInput, WeightingConfig};
use crate::derive;

/// Run-level context carried into the published grid's metadata.
#[derive(Debug, Clone)]
pub struct ScoreContext {
    pub region_signature: String,
    pub resolution: f64,
    pub time_range: TimeRange,
    /// Cache signatures of the raw datasets the aligned data came from.
    pub source_signatures: Vec<String>,
}

/// Per-step scoring tallies, merged into the metadata counts.
#[derive(Debug, Default, Clone, Copy)]
struct StepCounts {
    missing: u64,
    indeterminate: u64,
    clamped: u64,
}

/// Compute the composite risk grid.
///
/// Per cell and time step: each input is normalized, optionally inverted,
/// and combined by its configured weight; the result is clamped to the
/// output range (clamps are counted, not hidden). A cell missing any
/// contributing input scores indeterminate (NaN) unless the configured
/// fallback fills it, in which case the strategy is recorded in metadata.
pub fn score(
    aligned: &AlignedDataset,
    config: &WeightingConfig,
    density: Option<&[f32]>,
    ctx: &ScoreContext,
) -> PipelineResult<RiskGrid> {
    config.validate(aligned)?;

    let n = aligned.grid.len();
    let steps = aligned.times.len();

    // Materialize every input series once, up front.
    let inputs: Vec<Vec<f32>> = config
        .terms
        .iter()
        .map(|t| input_series(aligned, t.input))
        .collect();

    // Z-score parameters are computed over the run's valid values and
    // recorded in provenance so the normalization is reproducible.
    let norms: Vec<ResolvedNorm> = config
        .terms
        .iter()
        .zip(inputs.iter())
        .map(|(term, values)| ResolvedNorm::resolve(term.normalization, values))
        .collect();

    let density_norm = density.map(|d| normalize_density(d, n));
    let (lo, hi) = config.output_range;
    let dims = (aligned.grid.nx, aligned.grid.ny);

    // Score one time step per rayon task; steps are independent.
    let per_step: Vec<(Vec<f32>, StepCounts)> = (0..steps)
        .into_par_iter()
        .map(|t| {
            score_step(
                t,
                dims,
                config,
                &inputs,
                &norms,
                density_norm.as_deref(),
                (lo, hi),
            )
        })
        .collect();

    let mut scores = Vec::with_capacity(steps * n);
    let mut counts = StepCounts::default();
    for (step_scores, step_counts) in per_step {
        scores.extend(step_scores);
        counts.missing += step_counts.missing;
        counts.indeterminate += step_counts.indeterminate;
        counts.clamped += step_counts.clamped;
    }

    let land_mask = aligned
        .variables
        .get(&VariableId::LandSeaMask)
        .map(|lsm| lsm.as_slice());
    let stats = compute_stats(&scores, land_mask, n);

    let variables = config
        .terms
        .iter()
        .zip(norms.iter())
        .map(|(term, norm)| VariableProvenance {
            variable: term.input.name(),
            weight: term.weight,
            normalization: norm.describe(),
            inverted: term.invert,
        })
        .collect();

    let metadata = RiskGridMetadata {
        region_signature: ctx.region_signature.clone(),
        resolution: ctx.resolution,
        time_range: ctx.time_range,
        variables,
        weighting_version: config.version.clone(),
        computed_at: Utc::now(),
        source_signatures: ctx.source_signatures.clone(),
        missing_cells: counts.missing,
        indeterminate_cells: counts.indeterminate,
        clamped_cells: counts.clamped,
        fallback: config.missing_fallback.map(|f| match f {
            MissingFallback::NearestValid => "nearest_valid".to_string(),
        }),
        stats: Some(stats),
    };

    info!(
        version = %config.version,
        steps,
        missing = counts.missing,
        indeterminate = counts.indeterminate,
        clamped = counts.clamped,
        "Scored risk grid"
    );

    Ok(RiskGrid {
        grid: aligned.grid.clone(),
        times: aligned.times.clone(),
        scores,
        metadata,
    })
}

fn score_step(
    t: usize,
    (nx, ny): (usize, usize),
    config: &WeightingConfig,
    inputs: &[Vec<f32>],
    norms: &[ResolvedNorm],
    density_norm: Option<&[f32]>,
    (lo, hi): (f64, f64),
) -> (Vec<f32>, StepCounts) {
    let n = nx * ny;
    let mut out = vec![f32::NAN; n];
    let mut counts = StepCounts::default();
    let dw = config.density_weight;

    for cell in 0..n {
        let idx = t * n + cell;
        let mut acc = 0.0f64;
        let mut missing = false;

        for ((term, values), norm) in config.terms.iter().zip(inputs).zip(norms) {
            let raw = values[idx];
            if raw.is_nan() {
                missing = true;
                break;
            }
            let mut v = norm.apply(raw as f64);
            if term.invert {
                v = 1.0 - v;
            }
            acc += term.weight * v;
        }

        if missing {
            counts.missing += 1;
            continue;
        }

        if dw > 0.0 {
            if let Some(d) = density_norm {
                acc = (1.0 - dw) * acc + dw * d[cell] as f64;
            }
        }

        if acc < lo || acc > hi {
            counts.clamped += 1;
            acc = acc.clamp(lo, hi);
        }
        out[cell] = acc as f32;
    }

    match config.missing_fallback {
        Some(MissingFallback::NearestValid) => {
            counts.indeterminate = fill_nearest_valid(&mut out, nx, ny);
        }
        None => counts.indeterminate = counts.missing,
    }

    (out, counts)
}

/// Fill NaN cells from the nearest valid cell of the same step, searching
/// outward ring by ring. Returns the count still indeterminate afterwards.
fn fill_nearest_valid(scores: &mut [f32], nx: usize, ny: usize) -> u64 {
    let original = scores.to_vec();
    let mut remaining = 0u64;

    for row in 0..ny {
        for col in 0..nx {
            if !original[row * nx + col].is_nan() {
                continue;
            }
            match nearest_valid(&original, nx, ny, col, row) {
                Some(v) => scores[row * nx + col] = v,
                None => remaining += 1,
            }
        }
    }
    remaining
}

fn nearest_valid(data: &[f32], nx: usize, ny: usize, col: usize, row: usize) -> Option<f32> {
    let max_radius = nx.max(ny);
    for radius in 1..=max_radius {
        let mut best: Option<(f64, f32)> = None;
        let r = radius as isize;
        for dy in -r..=r {
            for dx in -r..=r {
                if dx.abs() != r && dy.abs() != r {
                    continue; // interior already visited at a smaller radius
                }
                let c = col as isize + dx;
                let w = row as isize + dy;
                if c < 0 || w < 0 || c >= nx as isize || w >= ny as isize {
                    continue;
                }
                let v = data[w as usize * nx + c as usize];
                if v.is_nan() {
                    continue;
                }
                let dist = ((dx * dx + dy * dy) as f64).sqrt();
                if best.map_or(true, |(d, _)| dist < d) {
                    best = Some((dist, v));
                }
            }
        }
        if let Some((_, v)) = best {
            return Some(v);
        }
    }
    None
}

/// A normalization with all parameters resolved for this run.
#[derive(Debug, Clone, Copy)]
enum ResolvedNorm {
    MinMax { min: f64, max: f64 },
    ZScore { mean: f64, std: f64 },
}

impl ResolvedNorm {
    fn resolve(norm: Normalization, values: &[f32]) -> Self {
        match norm {
            Normalization::MinMax { min, max } => ResolvedNorm::MinMax { min, max },
            Normalization::ZScore => {
                let valid: Vec<f64> = values
                    .iter()
                    .filter(|v| !v.is_nan())
                    .map(|v| *v as f64)
                    .collect();
                let mean = if valid.is_empty() {
                    0.0
                } else {
                    valid.iter().sum::<f64>() / valid.len() as f64
                };
                let var = if valid.is_empty() {
                    0.0
                } else {
                    valid.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / valid.len() as f64
                };
                ResolvedNorm::ZScore {
                    mean,
                    std: var.sqrt(),
                }
            }
        }
    }

    /// Normalize a raw value onto [0, 1], clipping outside the window.
    fn apply(&self, raw: f64) -> f64 {
        match self {
            ResolvedNorm::MinMax { min, max } => ((raw - min) / (max - min)).clamp(0.0, 1.0),
            ResolvedNorm::ZScore { mean, std } => {
                if *std == 0.0 {
                    return 0.5;
                }
                let z = (raw - mean) / std;
                ((z + 3.0) / 6.0).clamp(0.0, 1.0)
            }
        }
    }

    fn describe(&self) -> String {
        match self {
            ResolvedNorm::MinMax { min, max } => format!("minmax({min}..{max})"),
            ResolvedNorm::ZScore { mean, std } => format!("zscore(mean={mean:.4},std={std:.4})"),
        }
    }
}

fn input_series(aligned: &AlignedDataset, input: RiskInput) -> Vec<f32> {
    match input {
        RiskInput::TemperatureC => {
            derive::kelvin_to_celsius(&aligned.variables[&VariableId::Temperature2m])
        }
        RiskInput::WindSpeed => derive::wind_speed(
            &aligned.variables[&VariableId::WindU10],
            &aligned.variables[&VariableId::WindV10],
        ),
        RiskInput::RelativeHumidity => derive::relative_humidity(
            &aligned.variables[&VariableId::Temperature2m],
            &aligned.variables[&VariableId::Dewpoint2m],
        ),
        RiskInput::Raw(v) => aligned.variables[&v].clone(),
    }
}

/// Density counts normalized by the grid's maximum count.
fn normalize_density(density: &[f32], n: usize) -> Vec<f32> {
    debug_assert_eq!(density.len(), n);
    let max = density.iter().cloned().fold(0.0f32, f32::max);
    if max <= 0.0 {
        return vec![0.0; n];
    }
    density.iter().map(|c| c / max).collect()
}

/// Distribution statistics over all valid scores. The alert threshold is
/// mean plus one standard deviation, held constant across the whole run so
/// month-to-month comparisons are meaningful. High-risk cells are counted
/// on land only when a land-sea mask is available.
fn compute_stats(scores: &[f32], land_mask: Option<&[f32]>, n: usize) -> RiskStats {
    let mut valid: Vec<f64> = scores
        .iter()
        .filter(|s| !s.is_nan())
        .map(|s| *s as f64)
        .collect();

    if valid.is_empty() {
        return RiskStats {
            mean: 0.0,
            std: 0.0,
            median: 0.0,
            p84: 0.0,
            p95: 0.0,
            threshold: 0.0,
            high_risk_cells: 0,
        };
    }

    let mean = valid.iter().sum::<f64>() / valid.len() as f64;
    let std =
        (valid.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / valid.len() as f64).sqrt();
    let threshold = mean + std;

    valid.sort_by(|a, b| a.total_cmp(b));
    let percentile = |p: f64| -> f64 {
        let idx = ((valid.len() - 1) as f64 * p).round() as usize;
        valid[idx]
    };

    let mut high_risk_cells = 0u64;
    for (i, s) in scores.iter().enumerate() {
        if s.is_nan() || (*s as f64) < threshold {
            continue;
        }
        let on_land = land_mask.map_or(true, |lsm| lsm[i % n] > 0.5);
        if on_land {
            high_risk_cells += 1;
        }
    }

    debug!(mean, std, threshold, high_risk_cells, "Risk distribution");

    RiskStats {
        mean,
        std,
        median: percentile(0.5),
        p84: percentile(0.84),
        p95: percentile(0.95),
        threshold,
        high_risk_cells,
    }
}
