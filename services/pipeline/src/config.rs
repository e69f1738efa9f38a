//! Pipeline service configuration, loaded from a YAML file.
//!
//! The API key never lives in the file; it is read from the environment at
//! startup (a `.env` file is honored in development).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Datelike, NaiveDate};
use serde::Deserialize;
use tracing::debug;

use aligner::SpatialMethod;
use archive_client::FetchConfig;
use risk_common::{BoundingBox, PipelineError, PipelineResult, Region, TimeRange, VariableId, YearMonth};

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub region: RegionConfig,
    /// Extra variables to fetch beyond what the weighting needs.
    #[serde(default)]
    pub variables: Vec<VariableId>,
    /// Explicit month range; absent means a trailing window ending with the
    /// last complete month.
    #[serde(default)]
    pub time_range: Option<TimeRange>,
    #[serde(default = "default_window_months")]
    pub window_months: usize,
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub fetch: FetchTuning,
    /// Weighting YAML; absent means the built-in Galicia weighting.
    #[serde(default)]
    pub weighting_file: Option<PathBuf>,
    #[serde(default)]
    pub fires: Option<FiresConfig>,
    pub cache_dir: PathBuf,
    pub publish_dir: PathBuf,
    #[serde(default = "default_run_deadline_secs")]
    pub run_deadline_secs: u64,
    /// Per-variable spatial method overrides (e.g. nearest for lsm).
    #[serde(default)]
    pub alignment_overrides: BTreeMap<VariableId, SpatialMethod>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegionConfig {
    pub bbox: BoundingBox,
    pub resolution: f64,
}

impl RegionConfig {
    pub fn region(&self) -> Region {
        Region::new(self.bbox, self.resolution)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveConfig {
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl ArchiveConfig {
    /// Resolve the API key from the environment.
    pub fn api_key(&self) -> PipelineResult<String> {
        std::env::var(&self.api_key_env).map_err(|_| {
            PipelineError::Config(format!(
                "archive API key not set (expected in ${})",
                self.api_key_env
            ))
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_api_key_env() -> String {
    "ARCHIVE_API_KEY".to_string()
}

fn default_request_timeout_secs() -> u64 {
    600
}

/// Retrieval knobs, all optional in the file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchTuning {
    pub max_span_months: usize,
    pub max_retries: u32,
    pub initial_retry_delay_secs: u64,
    pub max_retry_delay_secs: u64,
    pub poll_interval_secs: u64,
    pub poll_timeout_secs: u64,
    pub max_concurrent: usize,
}

impl Default for FetchTuning {
    fn default() -> Self {
        let d = FetchConfig::default();
        Self {
            max_span_months: d.max_span_months,
            max_retries: d.max_retries,
            initial_retry_delay_secs: d.initial_retry_delay.as_secs(),
            max_retry_delay_secs: d.max_retry_delay.as_secs(),
            poll_interval_secs: d.poll_interval.as_secs(),
            poll_timeout_secs: d.poll_timeout.as_secs(),
            max_concurrent: d.max_concurrent,
        }
    }
}

impl FetchTuning {
    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            max_span_months: self.max_span_months,
            max_retries: self.max_retries,
            initial_retry_delay: Duration::from_secs(self.initial_retry_delay_secs),
            max_retry_delay: Duration::from_secs(self.max_retry_delay_secs),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            poll_timeout: Duration::from_secs(self.poll_timeout_secs),
            max_concurrent: self.max_concurrent,
        }
    }
}

/// Historical fire records used for density calibration.
#[derive(Debug, Clone, Deserialize)]
pub struct FiresConfig {
    pub csv: PathBuf,
    #[serde(default = "default_min_area_ha")]
    pub min_area_ha: f64,
    /// Ignore records before this date.
    #[serde(default)]
    pub from: Option<NaiveDate>,
}

fn default_min_area_ha() -> f64 {
    10.0
}

fn default_window_months() -> usize {
    12
}

fn default_run_deadline_secs() -> u64 {
    3600
}

impl PipelineConfig {
    pub fn load(path: &Path) -> PipelineResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: PipelineConfig = serde_yaml::from_str(&content).map_err(|e| {
            PipelineError::Config(format!("cannot parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        debug!(path = %path.display(), "Loaded pipeline configuration");
        Ok(config)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        let bbox = &self.region.bbox;
        if bbox.min_lon >= bbox.max_lon || bbox.min_lat >= bbox.max_lat {
            return Err(PipelineError::Config(format!(
                "region bbox is empty: {bbox:?}"
            )));
        }
        if self.region.resolution <= 0.0 {
            return Err(PipelineError::Config(format!(
                "resolution must be positive, got {}",
                self.region.resolution
            )));
        }
        if self.time_range.is_none() && self.window_months == 0 {
            return Err(PipelineError::Config(
                "window_months must be at least 1".into(),
            ));
        }
        if let Some(r) = &self.time_range {
            if r.is_empty() {
                return Err(PipelineError::Config(format!("time range {r} is empty")));
            }
        }
        Ok(())
    }

    /// The month range to score: the configured range, or a trailing window
    /// ending with the last complete month before `today`.
    pub fn effective_time_range(&self, today: NaiveDate) -> TimeRange {
        if let Some(r) = self.time_range {
            return r;
        }
        // last complete month before today
        let end = if today.month() == 1 {
            YearMonth::new(today.year() - 1, 12)
        } else {
            YearMonth::new(today.year(), today.month() - 1)
        };
        let mut start = end;
        for _ in 1..self.window_months {
            start = if start.month == 1 {
                YearMonth::new(start.year - 1, 12)
            } else {
                YearMonth::new(start.year, start.month - 1)
            };
        }
        TimeRange::new(start, end)
    }
}
