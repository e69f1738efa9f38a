//! Versioned weighting configuration.
//!
//! The exact combination formula is external configuration, loaded from
//! YAML and validated before any computation. Results are reproducible and
//! auditable: the version label and every term's parameters travel with
//! the published grid.

use std::path::Path;

use serde::{Deserialize, Serialize};

use aligner::AlignedDataset;
use risk_common::{PipelineError, PipelineResult, VariableId};

/// A scoring input: a registry variable or a derived quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskInput {
    /// 2m temperature in Celsius (derived from t2m).
    TemperatureC,
    /// Wind speed magnitude (derived from u10/v10).
    WindSpeed,
    /// Relative humidity % (derived from t2m/d2m).
    RelativeHumidity,
    /// A raw registry variable, unconverted.
    #[serde(untagged)]
    Raw(VariableId),
}

impl RiskInput {
    /// Registry variables this input needs in the aligned dataset.
    pub fn required_variables(&self) -> Vec<VariableId> {
        match self {
            RiskInput::TemperatureC => vec![VariableId::Temperature2m],
            RiskInput::WindSpeed => vec![VariableId::WindU10, VariableId::WindV10],
            RiskInput::RelativeHumidity => {
                vec![VariableId::Temperature2m, VariableId::Dewpoint2m]
            }
            RiskInput::Raw(v) => vec![*v],
        }
    }

    pub fn name(&self) -> String {
        match self {
            RiskInput::TemperatureC => "temperature_c".into(),
            RiskInput::WindSpeed => "wind_speed".into(),
            RiskInput::RelativeHumidity => "relative_humidity".into(),
            RiskInput::Raw(v) => v.short_name().into(),
        }
    }
}

/// Normalization applied to an input before weighting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// Linear map of [min, max] onto [0, 1], clipped outside.
    MinMax { min: f64, max: f64 },
    /// Standard score over the run's valid values, mapped linearly from
    /// [-3σ, 3σ] onto [0, 1].
    ZScore,
}

impl Normalization {
    /// Human-readable parameter record for provenance metadata.
    pub fn describe(&self) -> String {
        match self {
            Normalization::MinMax { min, max } => format!("minmax({min}..{max})"),
            Normalization::ZScore => "zscore(3sigma)".into(),
        }
    }
}

/// One weighted term of the composite score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightTerm {
    pub input: RiskInput,
    pub weight: f64,
    #[serde(with = "serde_yaml::with::singleton_map")]
    pub normalization: Normalization,
    /// Invert the normalized value: low raw reading means high risk
    /// (humidity, soil moisture).
    #[serde(default)]
    pub invert: bool,
}

/// Missing-data fallback strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingFallback {
    /// Fill an indeterminate cell from the nearest valid cell of the same
    /// time step, searching outward a bounded number of rings.
    NearestValid,
}

/// The full, versioned weighting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightingConfig {
    /// Version label recorded in every published grid.
    pub version: String,
    pub terms: Vec<WeightTerm>,
    /// Output range scores are clamped to.
    #[serde(default = "default_output_range")]
    pub output_range: (f64, f64),
    /// Optional missing-data strategy; absent means indeterminate cells
    /// stay indeterminate.
    #[serde(default)]
    pub missing_fallback: Option<MissingFallback>,
    /// Weight of the historical fire-density calibration term. Zero (the
    /// default) means density is not consulted at scoring time.
    #[serde(default)]
    pub density_weight: f64,
}

fn default_output_range() -> (f64, f64) {
    (0.0, 1.0)
}

impl WeightingConfig {
    /// Load from a YAML file.
    pub fn load(path: &Path) -> PipelineResult<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&content).map_err(|e| {
            PipelineError::ScoringConfiguration(format!(
                "cannot parse weighting config {}: {e}",
                path.display()
            ))
        })
    }

    /// The weighting used by the original Galicia analysis: temperature
    /// 34%, wind 33%, inverted humidity 33%.
    pub fn galicia_v1() -> Self {
        Self {
            version: "galicia-v1".into(),
            terms: vec![
                WeightTerm {
                    input: RiskInput::TemperatureC,
                    weight: 0.34,
                    normalization: Normalization::MinMax {
                        min: 0.0,
                        max: 40.0,
                    },
                    invert: false,
                },
                WeightTerm {
                    input: RiskInput::WindSpeed,
                    weight: 0.33,
                    normalization: Normalization::MinMax {
                        min: 0.0,
                        max: 15.0,
                    },
                    invert: false,
                },
                WeightTerm {
                    input: RiskInput::RelativeHumidity,
                    weight: 0.33,
                    normalization: Normalization::MinMax {
                        min: 0.0,
                        max: 100.0,
                    },
                    invert: true,
                },
            ],
            output_range: (0.0, 1.0),
            missing_fallback: None,
            density_weight: 0.0,
        }
    }

    /// Every registry variable the configured terms need.
    pub fn required_variables(&self) -> Vec<VariableId> {
        let mut vars: Vec<VariableId> = self
            .terms
            .iter()
            .flat_map(|t| t.input.required_variables())
            .collect();
        vars.sort();
        vars.dedup();
        vars
    }

    /// Fail fast before any computation: weights must be consistent and
    /// every referenced variable must exist in the aligned dataset.
    pub fn validate(&self, aligned: &AlignedDataset) -> PipelineResult<()> {
        if self.terms.is_empty() {
            return Err(PipelineError::ScoringConfiguration(
                "weighting config has no terms".into(),
            ));
        }

        let sum: f64 = self.terms.iter().map(|t| t.weight).sum();
        if (sum - 1.0).abs() > 1e-3 {
            return Err(PipelineError::ScoringConfiguration(format!(
                "term weights sum to {sum:.4}, expected 1.0"
            )));
        }
        if !(0.0..=1.0).contains(&self.density_weight) {
            return Err(PipelineError::ScoringConfiguration(format!(
                "density_weight {} outside [0, 1]",
                self.density_weight
            )));
        }
        if self.output_range.0 >= self.output_range.1 {
            return Err(PipelineError::ScoringConfiguration(format!(
                "output range {:?} is empty",
                self.output_range
            )));
        }

        for term in &self.terms {
            for var in term.input.required_variables() {
                if !aligned.has_variable(var) {
                    return Err(PipelineError::ScoringConfiguration(format!(
                        "term '{}' needs variable '{}' which is not in the aligned dataset",
                        term.input.name(),
                        var.short_name()
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::io::Write;

    use risk_common::{BoundingBox, Region, TimeRange, YearMonth};

    fn aligned_with(vars: &[VariableId]) -> AlignedDataset {
        let region = Region::new(BoundingBox::new(0.0, 0.0, 1.0, 1.0), 1.0);
        let grid = region.grid();
        let times: Vec<YearMonth> = TimeRange::new(YearMonth::new(2024, 7), YearMonth::new(2024, 7))
            .months()
            .collect();
        let mut variables = BTreeMap::new();
        for v in vars {
            variables.insert(*v, vec![1.0f32; grid.len()]);
        }
        AlignedDataset {
            grid,
            times,
            variables,
        }
    }

    #[test]
    fn test_galicia_v1_validates() {
        let aligned = aligned_with(&[
            VariableId::Temperature2m,
            VariableId::Dewpoint2m,
            VariableId::WindU10,
            VariableId::WindV10,
        ]);
        WeightingConfig::galicia_v1().validate(&aligned).unwrap();
    }

    #[test]
    fn test_missing_variable_fails_fast() {
        // No dewpoint: relative humidity cannot be derived.
        let aligned = aligned_with(&[
            VariableId::Temperature2m,
            VariableId::WindU10,
            VariableId::WindV10,
        ]);
        let err = WeightingConfig::galicia_v1().validate(&aligned).unwrap_err();
        assert!(matches!(err, PipelineError::ScoringConfiguration(_)));
        assert!(err.to_string().contains("d2m"));
    }

    #[test]
    fn test_bad_weight_sum_rejected() {
        let mut cfg = WeightingConfig::galicia_v1();
        cfg.terms[0].weight = 0.9;
        let aligned = aligned_with(&cfg.required_variables());
        assert!(cfg.validate(&aligned).is_err());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let yaml = r#"
version: v2
output_range: [0.0, 1.0]
missing_fallback: nearest_valid
density_weight: 0.1
terms:
  - input: temperature_c
    weight: 0.4
    normalization:
      min_max: { min: 0.0, max: 40.0 }
  - input: wind_speed
    weight: 0.3
    normalization:
      min_max: { min: 0.0, max: 15.0 }
  - input: relative_humidity
    weight: 0.3
    normalization: z_score
    invert: true
"#;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(yaml.as_bytes()).unwrap();

        let cfg = WeightingConfig::load(f.path()).unwrap();
        assert_eq!(cfg.version, "v2");
        assert_eq!(cfg.terms.len(), 3);
        assert_eq!(cfg.missing_fallback, Some(MissingFallback::NearestValid));
        assert!(cfg.terms[2].invert);
        assert_eq!(cfg.terms[2].normalization, Normalization::ZScore);
    }

    #[test]
    fn test_raw_input_parses_by_variable_name() {
        let yaml = r#"
version: v3
terms:
  - input: soil_moisture_l1
    weight: 1.0
    normalization:
      min_max: { min: 0.0, max: 1.0 }
    invert: true
"#;
        let cfg: WeightingConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            cfg.terms[0].input,
            RiskInput::Raw(VariableId::SoilMoistureL1)
        );
    }
}
