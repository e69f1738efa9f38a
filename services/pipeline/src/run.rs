//! One pipeline run: fetch, align, score, publish.

use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use aligner::{align, registry_specs};
use archive_client::{ArchiveApi, Fetcher};
use fire_events::{load_csv, FireEventStore, LoadFilter};
use risk_common::{PipelineError, PipelineResult, Region, RiskGrid, TimeRange, VariableId};
use risk_storage::{FsCacheStore, GridPublisher};
use risk_engine::{score, ScoreContext, WeightingConfig};

use crate::config::PipelineConfig;

/// Outcome of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// Provenance signature of the grid this run produced (or matched).
    pub provenance: String,
    /// Published artifact filename, absent when the run was skipped.
    pub artifact: Option<String>,
    pub time_range: TimeRange,
    pub high_risk_cells: u64,
    pub indeterminate_cells: u64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Published,
    /// The current grid already has identical provenance.
    Skipped,
}

/// The assembled pipeline, generic over the archive protocol so tests can
/// run against an in-process archive.
pub struct Pipeline<A: ArchiveApi> {
    config: PipelineConfig,
    fetcher: Fetcher<A>,
    publisher: GridPublisher,
    weighting: WeightingConfig,
}

impl<A: ArchiveApi> Pipeline<A> {
    pub async fn new(config: PipelineConfig, api: A) -> PipelineResult<Self> {
        let cache = FsCacheStore::open(&config.cache_dir).await?;
        let publisher = GridPublisher::open(&config.publish_dir).await?;
        let weighting = match &config.weighting_file {
            Some(path) => WeightingConfig::load(path)?,
            None => WeightingConfig::galicia_v1(),
        };
        let fetcher = Fetcher::new(api, cache, config.fetch.fetch_config());
        Ok(Self {
            config,
            fetcher,
            publisher,
            weighting,
        })
    }

    pub fn publisher(&self) -> &GridPublisher {
        &self.publisher
    }

    /// Execute one run end to end. Retrieval and scoring run under the
    /// configured deadline; a grid that is ready in time is always
    /// published (or skipped as a duplicate), never abandoned mid-write.
    pub async fn run_once(&self) -> PipelineResult<RunReport> {
        let started = std::time::Instant::now();
        let time_range = self.config.effective_time_range(Utc::now().date_naive());
        info!(range = %time_range, "Starting pipeline run");

        let deadline = Duration::from_secs(self.config.run_deadline_secs);
        let grid = tokio::time::timeout(deadline, self.compute(time_range))
            .await
            .map_err(|_| {
                PipelineError::retrieval(
                    format!("run exceeded deadline of {}s", deadline.as_secs()),
                    Some(time_range),
                )
            })??;

        let provenance = grid.metadata.provenance_signature();
        if self.publisher.current_provenance().await?.as_deref() == Some(provenance.as_str()) {
            info!(provenance = %provenance, "Identical grid already published, skipping");
            return Ok(RunReport {
                outcome: RunOutcome::Skipped,
                provenance,
                artifact: None,
                time_range,
                high_risk_cells: high_risk(&grid),
                indeterminate_cells: grid.metadata.indeterminate_cells,
                duration_ms: started.elapsed().as_millis() as u64,
            });
        }

        let artifact = self.publisher.publish(&grid).await?;
        Ok(RunReport {
            outcome: RunOutcome::Published,
            provenance,
            artifact: Some(artifact),
            time_range,
            high_risk_cells: high_risk(&grid),
            indeterminate_cells: grid.metadata.indeterminate_cells,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn compute(&self, time_range: TimeRange) -> PipelineResult<RiskGrid> {
        let region = self.config.region.region();
        let variables = self.request_variables();

        let outcome = self.fetcher.fetch(&variables, &region, time_range).await?;

        let mut specs = registry_specs(&variables);
        for (variable, method) in &self.config.alignment_overrides {
            if let Some(spec) = specs.get_mut(variable) {
                spec.spatial = *method;
            }
        }
        let aligned = align(&outcome.fields, &region, time_range, &specs)?;

        let density = self.fire_density(&region, time_range)?;

        let ctx = ScoreContext {
            region_signature: region.signature(),
            resolution: region.resolution,
            time_range,
            source_signatures: outcome.source_signatures,
        };
        score(&aligned, &self.weighting, density.as_deref(), &ctx)
    }

    /// Variables to fetch: whatever the weighting needs, plus configured
    /// extras, plus the land-sea mask for statistics.
    fn request_variables(&self) -> Vec<VariableId> {
        let mut variables = self.weighting.required_variables();
        variables.extend(self.config.variables.iter().copied());
        variables.push(VariableId::LandSeaMask);
        variables.sort();
        variables.dedup();
        variables
    }

    /// Historical fire density on the region grid, when calibration is
    /// configured and carries weight.
    fn fire_density(
        &self,
        region: &Region,
        time_range: TimeRange,
    ) -> PipelineResult<Option<Vec<f32>>> {
        let fires = match &self.config.fires {
            Some(f) if self.weighting.density_weight > 0.0 => f,
            Some(_) => {
                warn!("Fire records configured but density_weight is zero, ignoring them");
                return Ok(None);
            }
            None => return Ok(None),
        };

        let filter = LoadFilter {
            bbox: Some(region.bbox),
            min_area_ha: fires.min_area_ha,
            from: fires.from,
        };
        let events = load_csv(&fires.csv, &filter)?;
        let store = FireEventStore::new(events);
        // Density is climatological: all retained history up to the end of
        // the scored range.
        let history = TimeRange::new(risk_common::YearMonth::new(1950, 1), time_range.end);
        info!(events = store.len(), "Loaded historical fire records");
        Ok(Some(store.density_grid(region, history)))
    }
}

fn high_risk(grid: &RiskGrid) -> u64 {
    grid.metadata
        .stats
        .as_ref()
        .map(|s| s.high_risk_cells)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use archive_client::{DataRequest, JobHandle, JobStatus};
    use risk_common::{VariableField, YearMonth};

    use crate::config::PipelineConfig;

    struct FakeArchive {
        /// Shared so tests keep a handle after the archive moves into the
        /// pipeline.
        submits: Arc<AtomicUsize>,
        jobs: Mutex<Vec<DataRequest>>,
    }

    impl FakeArchive {
        fn new() -> (Self, Arc<AtomicUsize>) {
            let submits = Arc::new(AtomicUsize::new(0));
            let archive = Self {
                submits: submits.clone(),
                jobs: Mutex::new(Vec::new()),
            };
            (archive, submits)
        }
    }

    fn value_for(v: VariableId) -> f32 {
        match v {
            VariableId::Temperature2m => 273.15 + 32.0,
            VariableId::Dewpoint2m => 273.15 + 5.0,
            VariableId::WindU10 | VariableId::WindV10 => 5.0,
            VariableId::LandSeaMask => 1.0,
            _ => 0.1,
        }
    }

    #[async_trait]
    impl ArchiveApi for FakeArchive {
        async fn submit(&self, request: &DataRequest) -> risk_common::PipelineResult<JobHandle> {
            self.submits.fetch_add(1, Ordering::SeqCst);
            let mut jobs = self.jobs.lock().await;
            jobs.push(request.clone());
            Ok(JobHandle {
                id: (jobs.len() - 1).to_string(),
            })
        }

        async fn poll(&self, job: &JobHandle) -> risk_common::PipelineResult<JobStatus> {
            Ok(JobStatus::Ready {
                location: job.id.clone(),
            })
        }

        async fn download(&self, location: &str) -> risk_common::PipelineResult<Vec<u8>> {
            let jobs = self.jobs.lock().await;
            let request = &jobs[location.parse::<usize>().unwrap()];
            let grid = request.region.grid();
            let times: Vec<_> = request.time_range.months().map(|m| m.first_day()).collect();
            let fields: Vec<VariableField> = request
                .variables
                .iter()
                .map(|v| {
                    VariableField::new(
                        *v,
                        grid.clone(),
                        times.clone(),
                        vec![value_for(*v); times.len() * grid.len()],
                    )
                })
                .collect();
            Ok(serde_json::to_vec(&fields).unwrap())
        }
    }

    fn config(root: &std::path::Path) -> PipelineConfig {
        let yaml = format!(
            r#"
region:
  bbox: {{ min_lon: -9.3, min_lat: 42.0, max_lon: -7.3, max_lat: 44.0 }}
  resolution: 0.5
time_range:
  start: {{ year: 2024, month: 5 }}
  end: {{ year: 2024, month: 7 }}
archive:
  base_url: "http://unused.example"
cache_dir: {cache}
publish_dir: {publish}
"#,
            cache = root.join("cache").display(),
            publish = root.join("published").display(),
        );
        let config: PipelineConfig = serde_yaml::from_str(&yaml).unwrap();
        config.validate().unwrap();
        config
    }

    #[tokio::test]
    async fn test_run_publishes_grid() {
        let dir = tempfile::tempdir().unwrap();
        let (archive, _submits) = FakeArchive::new();
        let pipeline = Pipeline::new(config(dir.path()), archive).await.unwrap();

        let report = pipeline.run_once().await.unwrap();
        assert_eq!(report.outcome, RunOutcome::Published);
        assert!(report.artifact.is_some());

        let grid = pipeline.publisher().current().await.unwrap().unwrap();
        assert_eq!(grid.times.len(), 3);
        assert_eq!(grid.metadata.weighting_version, "galicia-v1");
        assert!(grid.scores.iter().all(|s| !s.is_nan()));
    }

    #[tokio::test]
    async fn test_identical_rerun_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let (archive, submits) = FakeArchive::new();
        let pipeline = Pipeline::new(config(dir.path()), archive).await.unwrap();

        let first = pipeline.run_once().await.unwrap();
        let second = pipeline.run_once().await.unwrap();

        assert_eq!(second.outcome, RunOutcome::Skipped);
        assert_eq!(second.provenance, first.provenance);
        assert!(second.artifact.is_none());
        // The rerun was served entirely from the cache.
        assert_eq!(submits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_density_calibration_wired_through() {
        let dir = tempfile::tempdir().unwrap();

        let mut fires = tempfile::NamedTempFile::new().unwrap();
        writeln!(fires, "fecha,lat,lng,superficie").unwrap();
        writeln!(fires, "2018-08-04,43.0,-8.3,120.5").unwrap();
        writeln!(fires, "2019-07-11,43.0,-8.3,55.0").unwrap();

        let mut config = config(dir.path());
        config.fires = Some(crate::config::FiresConfig {
            csv: fires.path().to_path_buf(),
            min_area_ha: 10.0,
            from: None,
        });
        let mut weights_file = tempfile::NamedTempFile::new().unwrap();
        let mut weighting = risk_engine::WeightingConfig::galicia_v1();
        weighting.density_weight = 0.3;
        weights_file
            .write_all(serde_yaml::to_string(&weighting).unwrap().as_bytes())
            .unwrap();
        config.weighting_file = Some(weights_file.path().to_path_buf());

        let (archive, _submits) = FakeArchive::new();
        let pipeline = Pipeline::new(config, archive).await.unwrap();
        let report = pipeline.run_once().await.unwrap();
        assert_eq!(report.outcome, RunOutcome::Published);

        // Cells near the recorded fires score higher than the far corner.
        let grid = pipeline.publisher().current().await.unwrap().unwrap();
        let burn_cell = grid.grid.nearest_index(-8.3, 43.0).unwrap();
        let far_cell = grid.grid.nearest_index(-7.3, 44.0).unwrap();
        assert!(grid.get(burn_cell.0, burn_cell.1, 0) > grid.get(far_cell.0, far_cell.1, 0));
    }

    #[tokio::test]
    async fn test_deadline_exceeded_is_retrieval_error() {
        struct StallingArchive;

        #[async_trait]
        impl ArchiveApi for StallingArchive {
            async fn submit(&self, _request: &DataRequest) -> risk_common::PipelineResult<JobHandle> {
                Ok(JobHandle { id: "j".into() })
            }
            async fn poll(&self, _job: &JobHandle) -> risk_common::PipelineResult<JobStatus> {
                Ok(JobStatus::Running)
            }
            async fn download(&self, _location: &str) -> risk_common::PipelineResult<Vec<u8>> {
                unreachable!("job never becomes ready")
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.run_deadline_secs = 1;
        let pipeline = Pipeline::new(config, StallingArchive).await.unwrap();

        let err = pipeline.run_once().await.unwrap_err();
        assert!(matches!(err, PipelineError::Retrieval { .. }));
        // Nothing was published.
        assert!(!pipeline.publisher().is_published().await);
    }
}
