//! Alignment of raw variable fields onto the canonical region grid.

use std::collections::BTreeMap;

use tracing::debug;

use risk_common::{
    PipelineError, PipelineResult, Region, TemporalReducer, TimeRange, VariableField, VariableId,
    YearMonth,
};

use crate::dataset::{AlignedDataset, AlignmentSpec};
use crate::interpolation::resample_to_grid;

/// Align raw fields onto the region grid and monthly cadence.
///
/// Each variable is spatially resampled with its configured method, then
/// temporally reduced onto the months of `time_range`. A variable whose
/// native coverage does not intersect the region fails the run with an
/// `Alignment` error naming it.
pub fn align(
    fields: &[VariableField],
    region: &Region,
    time_range: TimeRange,
    specs: &BTreeMap<VariableId, AlignmentSpec>,
) -> PipelineResult<AlignedDataset> {
    let grid = region.grid();
    let months: Vec<YearMonth> = time_range.months().collect();
    let mut variables = BTreeMap::new();

    for field in fields {
        let spec = specs.get(&field.variable).ok_or_else(|| {
            PipelineError::alignment(
                field.variable.short_name(),
                "no alignment spec configured",
            )
        })?;

        if !field.grid.bbox().intersects(&region.bbox) {
            return Err(PipelineError::alignment(
                field.variable.short_name(),
                format!(
                    "native coverage {:?} does not intersect region {:?}",
                    field.grid.bbox(),
                    region.bbox
                ),
            ));
        }

        // Spatial pass: one resampled grid per native time step.
        let resampled: Vec<Vec<f32>> = (0..field.times.len())
            .map(|t| resample_to_grid(&field.grid, field.step(t), &grid, spec.spatial))
            .collect();

        // Temporal pass: reduce native steps into each target month.
        let mut values = vec![f32::NAN; months.len() * grid.len()];
        for (m, month) in months.iter().enumerate() {
            let step_indices: Vec<usize> = field
                .times
                .iter()
                .enumerate()
                .filter(|(_, date)| month.contains_date(**date))
                .map(|(i, _)| i)
                .collect();

            let out = &mut values[m * grid.len()..(m + 1) * grid.len()];
            reduce_steps(&resampled, &step_indices, spec.reducer, out);
        }

        debug!(
            variable = %field.variable,
            native_steps = field.times.len(),
            months = months.len(),
            "Aligned variable"
        );
        variables.insert(field.variable, values);
    }

    Ok(AlignedDataset {
        grid,
        times: months,
        variables,
    })
}

/// Reduce the selected native steps cell-wise into `out`.
///
/// Mean is taken over the samples present (a continuous quantity is still
/// meaningful from a partial month); Sum requires every sample, since a
/// partial accumulation would silently understate the total. A month with
/// no native step stays NaN.
fn reduce_steps(
    resampled: &[Vec<f32>],
    step_indices: &[usize],
    reducer: TemporalReducer,
    out: &mut [f32],
) {
    if step_indices.is_empty() {
        return;
    }

    for cell in 0..out.len() {
        let samples = step_indices.iter().map(|&i| resampled[i][cell]);
        out[cell] = match reducer {
            TemporalReducer::Mean => {
                let (mut sum, mut n) = (0.0f64, 0u32);
                for s in samples {
                    if !s.is_nan() {
                        sum += s as f64;
                        n += 1;
                    }
                }
                if n == 0 {
                    f32::NAN
                } else {
                    (sum / n as f64) as f32
                }
            }
            TemporalReducer::Sum => {
                let mut sum = 0.0f64;
                let mut complete = true;
                for s in samples {
                    if s.is_nan() {
                        complete = false;
                        break;
                    }
                    sum += s as f64;
                }
                if complete {
                    sum as f32
                } else {
                    f32::NAN
                }
            }
        };
    }
}

/// Build the default alignment specs for a variable set from the registry.
pub fn registry_specs(variables: &[VariableId]) -> BTreeMap<VariableId, AlignmentSpec> {
    variables
        .iter()
        .map(|v| (*v, AlignmentSpec::registry_default(*v)))
        .collect()
}
