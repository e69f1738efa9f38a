//! Cache-first retrieval with chunking and retry.
//!
//! A fetch is split into month-range chunks no larger than the archive's
//! span limit. Each chunk is served from the cache when possible; misses
//! run the submit/poll/download protocol with exponential backoff. Chunks
//! are cached individually as they complete, so a failed run resumes from
//! the failing sub-range instead of starting over.

use std::collections::BTreeMap;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, instrument, warn};

use risk_common::{
    PipelineError, PipelineResult, Region, TimeRange, VariableField, VariableId,
};
use risk_storage::{CacheKey, FsCacheStore};

use crate::api::{ArchiveApi, DataRequest, JobStatus};

/// Retrieval tuning knobs.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Maximum months per archive request; larger ranges are chunked.
    pub max_span_months: usize,
    /// Retry attempts per chunk before giving up.
    pub max_retries: u32,
    /// Initial retry delay (doubles each retry).
    pub initial_retry_delay: Duration,
    pub max_retry_delay: Duration,
    /// Delay between job status polls.
    pub poll_interval: Duration,
    /// Give up on a job that is not ready within this window.
    pub poll_timeout: Duration,
    /// Chunks fetched from the archive in parallel.
    pub max_concurrent: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_span_months: 12,
            max_retries: 5,
            initial_retry_delay: Duration::from_secs(2),
            max_retry_delay: Duration::from_secs(120),
            poll_interval: Duration::from_secs(2),
            poll_timeout: Duration::from_secs(600),
            max_concurrent: 2,
        }
    }
}

/// Retrieved fields plus the cache signatures they came from, for
/// provenance metadata downstream.
#[derive(Debug)]
pub struct FetchOutcome {
    pub fields: Vec<VariableField>,
    /// One cache signature per chunk, in time order.
    pub source_signatures: Vec<String>,
}

/// Cache-first archive fetcher.
pub struct Fetcher<A: ArchiveApi> {
    api: A,
    cache: FsCacheStore,
    config: FetchConfig,
}

impl<A: ArchiveApi> Fetcher<A> {
    pub fn new(api: A, cache: FsCacheStore, config: FetchConfig) -> Self {
        Self { api, cache, config }
    }

    pub fn cache(&self) -> &FsCacheStore {
        &self.cache
    }

    /// Retrieve the variables over the region and range, merged along the
    /// time axis. Identical back-to-back calls hit only the cache.
    #[instrument(skip_all, fields(range = %time_range, variables = variables.len()))]
    pub async fn fetch(
        &self,
        variables: &[VariableId],
        region: &Region,
        time_range: TimeRange,
    ) -> PipelineResult<FetchOutcome> {
        if variables.is_empty() {
            return Err(PipelineError::Config("no variables requested".into()));
        }

        let chunks = time_range.chunks(self.config.max_span_months);
        debug!(range = %time_range, chunks = chunks.len(), "Planning fetch");

        let mut results: Vec<(usize, PipelineResult<Vec<VariableField>>)> =
            stream::iter(chunks.iter().copied().enumerate())
                .map(|(i, chunk)| {
                    let key = CacheKey::new(variables, region, chunk);
                    async move { (i, self.fetch_chunk(variables, region, chunk, &key).await) }
                })
                .buffer_unordered(self.config.max_concurrent.max(1))
                .collect()
                .await;
        results.sort_by_key(|(i, _)| *i);

        // Completed chunks are already cached; report the earliest failure
        // so the next run resumes there.
        let mut merged: BTreeMap<VariableId, VariableField> = BTreeMap::new();
        for (i, result) in results {
            let fields = result?;
            for field in fields {
                match merged.get_mut(&field.variable) {
                    Some(existing) => existing.extend_time(field),
                    None => {
                        if i > 0 {
                            return Err(PipelineError::retrieval(
                                format!("variable '{}' absent from earlier chunks", field.variable),
                                Some(chunks[i]),
                            ));
                        }
                        merged.insert(field.variable, field);
                    }
                }
            }
        }

        let source_signatures = chunks
            .iter()
            .map(|c| CacheKey::new(variables, region, *c).signature())
            .collect();

        Ok(FetchOutcome {
            fields: merged.into_values().collect(),
            source_signatures,
        })
    }

    /// One chunk: cache hit, or network with retry followed by a cache put.
    async fn fetch_chunk(
        &self,
        variables: &[VariableId],
        region: &Region,
        chunk: TimeRange,
        key: &CacheKey,
    ) -> PipelineResult<Vec<VariableField>> {
        match self.cache.get(key).await {
            Ok(Some(raw)) => match serde_json::from_slice::<Vec<VariableField>>(&raw) {
                Ok(fields) => {
                    debug!(range = %chunk, "Chunk served from cache");
                    return Ok(fields);
                }
                Err(e) => {
                    // Checksum was fine but the payload no longer parses;
                    // drop it and go back to the archive.
                    warn!(range = %chunk, error = %e, "Cached payload unreadable, purging");
                    self.cache.purge(key).await?;
                }
            },
            Ok(None) => {}
            Err(PipelineError::CacheCorruption(_)) => {
                // Entry already evicted; fall through to a re-fetch.
            }
            Err(e) => return Err(e),
        }

        let request = DataRequest {
            variables: variables.to_vec(),
            region: *region,
            time_range: chunk,
        };

        let mut attempt = 0u32;
        let mut delay = self.config.initial_retry_delay;
        let fields = loop {
            match self.retrieve_once(&request).await {
                Ok(fields) => break fields,
                Err(e) => {
                    attempt += 1;
                    if attempt > self.config.max_retries {
                        return Err(PipelineError::retrieval(
                            format!("gave up after {attempt} attempts: {e}"),
                            Some(chunk),
                        ));
                    }
                    warn!(
                        range = %chunk,
                        error = %e,
                        attempt,
                        max_retries = self.config.max_retries,
                        delay_secs = delay.as_secs_f64(),
                        "Chunk retrieval failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, self.config.max_retry_delay);
                }
            }
        };

        let raw = serde_json::to_vec(&fields)?;
        self.cache.put(key, &raw).await?;
        info!(range = %chunk, variables = variables.len(), "Chunk retrieved and cached");
        Ok(fields)
    }

    /// A single submit/poll/download pass, validated and range-masked.
    async fn retrieve_once(&self, request: &DataRequest) -> PipelineResult<Vec<VariableField>> {
        let job = self.api.submit(request).await?;

        let started = tokio::time::Instant::now();
        let location = loop {
            match self.api.poll(&job).await? {
                JobStatus::Ready { location } => break location,
                JobStatus::Failed { message } => {
                    return Err(PipelineError::retrieval(
                        format!("archive job failed: {message}"),
                        Some(request.time_range),
                    ));
                }
                JobStatus::Queued | JobStatus::Running => {
                    if started.elapsed() > self.config.poll_timeout {
                        return Err(PipelineError::retrieval(
                            "archive job not ready before poll timeout",
                            Some(request.time_range),
                        ));
                    }
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        };

        let raw = self.api.download(&location).await?;
        let mut fields: Vec<VariableField> = serde_json::from_slice(&raw)?;

        for variable in &request.variables {
            if !fields.iter().any(|f| f.variable == *variable) {
                return Err(PipelineError::retrieval(
                    format!("archive payload missing variable '{variable}'"),
                    Some(request.time_range),
                ));
            }
        }
        for field in &mut fields {
            field.mask_invalid();
        }
        Ok(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use crate::api::JobHandle;
    use risk_common::{BoundingBox, YearMonth};

    /// In-process archive that manufactures plausible monthly fields.
    #[derive(Default)]
    struct FakeArchive {
        submits: AtomicUsize,
        /// Fail this many submits before behaving.
        fail_next_submits: AtomicUsize,
        /// Permanently fail requests for this sub-range.
        fail_range: Mutex<Option<TimeRange>>,
        jobs: Mutex<HashMap<String, DataRequest>>,
        next_id: AtomicUsize,
    }

    fn plausible_value(v: VariableId) -> f32 {
        match v {
            VariableId::Temperature2m | VariableId::Dewpoint2m => 285.0,
            VariableId::WindU10 | VariableId::WindV10 => 3.0,
            VariableId::LandSeaMask => 1.0,
            _ => 0.1,
        }
    }

    #[async_trait]
    impl ArchiveApi for FakeArchive {
        async fn submit(&self, request: &DataRequest) -> PipelineResult<JobHandle> {
            self.submits.fetch_add(1, Ordering::SeqCst);
            if self
                .fail_next_submits
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(PipelineError::retrieval("simulated outage", None));
            }
            if *self.fail_range.lock().await == Some(request.time_range) {
                return Err(PipelineError::retrieval("simulated outage", None));
            }
            let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
            self.jobs.lock().await.insert(id.clone(), request.clone());
            Ok(JobHandle { id })
        }

        async fn poll(&self, job: &JobHandle) -> PipelineResult<JobStatus> {
            Ok(JobStatus::Ready {
                location: job.id.clone(),
            })
        }

        async fn download(&self, location: &str) -> PipelineResult<Vec<u8>> {
            let jobs = self.jobs.lock().await;
            let request = jobs
                .get(location)
                .ok_or_else(|| PipelineError::retrieval("unknown job", None))?;

            let grid = request.region.grid();
            let times: Vec<_> = request
                .time_range
                .months()
                .map(|m| m.first_day())
                .collect();
            let fields: Vec<VariableField> = request
                .variables
                .iter()
                .map(|v| {
                    VariableField::new(
                        *v,
                        grid.clone(),
                        times.clone(),
                        vec![plausible_value(*v); times.len() * grid.len()],
                    )
                })
                .collect();
            Ok(serde_json::to_vec(&fields).unwrap())
        }
    }

    fn region() -> Region {
        Region::new(BoundingBox::new(-9.3, 42.0, -7.3, 44.0), 0.25)
    }

    fn fast_config() -> FetchConfig {
        FetchConfig {
            max_span_months: 12,
            max_retries: 5,
            initial_retry_delay: Duration::from_millis(1),
            max_retry_delay: Duration::from_millis(5),
            poll_interval: Duration::from_millis(1),
            poll_timeout: Duration::from_secs(1),
            max_concurrent: 1,
        }
    }

    fn range(sy: i32, sm: u32, ey: i32, em: u32) -> TimeRange {
        TimeRange::new(YearMonth::new(sy, sm), YearMonth::new(ey, em))
    }

    async fn fetcher(config: FetchConfig) -> (Fetcher<FakeArchive>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let cache = FsCacheStore::open(dir.path()).await.unwrap();
        (Fetcher::new(FakeArchive::default(), cache, config), dir)
    }

    #[tokio::test]
    async fn test_second_fetch_hits_only_the_cache() {
        let (fetcher, _dir) = fetcher(fast_config()).await;
        let vars = [VariableId::Temperature2m, VariableId::WindU10];

        let first = fetcher
            .fetch(&vars, &region(), range(2024, 6, 2024, 8))
            .await
            .unwrap();
        assert_eq!(first.fields.len(), 2);
        assert_eq!(fetcher.api.submits.load(Ordering::SeqCst), 1);

        let second = fetcher
            .fetch(&vars, &region(), range(2024, 6, 2024, 8))
            .await
            .unwrap();
        assert_eq!(fetcher.api.submits.load(Ordering::SeqCst), 1);
        assert_eq!(second.fields, first.fields);
        assert_eq!(second.source_signatures, first.source_signatures);
    }

    #[tokio::test]
    async fn test_chunked_fetch_merges_time_axis_in_order() {
        let mut config = fast_config();
        config.max_span_months = 2;
        let (fetcher, _dir) = fetcher(config).await;

        let outcome = fetcher
            .fetch(&[VariableId::Temperature2m], &region(), range(2024, 1, 2024, 5))
            .await
            .unwrap();

        // 5 months at 2 per chunk is 3 archive jobs
        assert_eq!(fetcher.api.submits.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.source_signatures.len(), 3);

        let field = &outcome.fields[0];
        assert_eq!(field.times.len(), 5);
        assert!(field.times.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(field.values.len(), 5 * field.grid.len());
    }

    #[tokio::test]
    async fn test_transient_failures_retried() {
        let (fetcher, _dir) = fetcher(fast_config()).await;
        fetcher.api.fail_next_submits.store(2, Ordering::SeqCst);

        let outcome = fetcher
            .fetch(&[VariableId::Temperature2m], &region(), range(2024, 7, 2024, 7))
            .await
            .unwrap();
        assert_eq!(outcome.fields.len(), 1);
        assert_eq!(fetcher.api.submits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_report_failing_subrange() {
        let mut config = fast_config();
        config.max_span_months = 2;
        config.max_retries = 1;
        let (fetcher, _dir) = fetcher(config).await;

        let bad = range(2024, 3, 2024, 4);
        *fetcher.api.fail_range.lock().await = Some(bad);

        let err = fetcher
            .fetch(&[VariableId::Temperature2m], &region(), range(2024, 1, 2024, 5))
            .await
            .unwrap_err();
        match err {
            PipelineError::Retrieval { sub_range, .. } => assert_eq!(sub_range, Some(bad)),
            other => panic!("unexpected error: {other}"),
        }

        // Chunks around the outage are already cached.
        let first_key = CacheKey::new(&[VariableId::Temperature2m], &region(), range(2024, 1, 2024, 2));
        let last_key = CacheKey::new(&[VariableId::Temperature2m], &region(), range(2024, 5, 2024, 5));
        assert!(fetcher.cache().has(&first_key).await);
        assert!(fetcher.cache().has(&last_key).await);

        // Outage over: the rerun only fetches the failed sub-range.
        *fetcher.api.fail_range.lock().await = None;
        let submits_before = fetcher.api.submits.load(Ordering::SeqCst);
        fetcher
            .fetch(&[VariableId::Temperature2m], &region(), range(2024, 1, 2024, 5))
            .await
            .unwrap();
        let resumed = fetcher.api.submits.load(Ordering::SeqCst) - submits_before;
        assert_eq!(resumed, 1);
    }

    #[tokio::test]
    async fn test_corrupted_cache_entry_triggers_refetch() {
        let (fetcher, dir) = fetcher(fast_config()).await;
        let vars = [VariableId::Temperature2m];
        let r = range(2024, 7, 2024, 7);

        fetcher.fetch(&vars, &region(), r).await.unwrap();
        let key = CacheKey::new(&vars, &region(), r);
        risk_storage::cache::corrupt_blob_for_test(dir.path(), &key)
            .await
            .unwrap();

        let outcome = fetcher.fetch(&vars, &region(), r).await.unwrap();
        assert_eq!(outcome.fields.len(), 1);
        assert_eq!(fetcher.api.submits.load(Ordering::SeqCst), 2);
        // Repaired: subsequent fetches are cache hits again.
        fetcher.fetch(&vars, &region(), r).await.unwrap();
        assert_eq!(fetcher.api.submits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_variable_list_rejected() {
        let (fetcher, _dir) = fetcher(fast_config()).await;
        let err = fetcher
            .fetch(&[], &region(), range(2024, 7, 2024, 7))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[tokio::test]
    async fn test_out_of_range_values_masked() {
        let (fetcher, _dir) = fetcher(fast_config()).await;
        // LandSeaMask values come back as 1.0, inside range; craft a job
        // whose temperature is physically impossible by downloading directly.
        struct BadArchive;

        #[async_trait]
        impl ArchiveApi for BadArchive {
            async fn submit(&self, _request: &DataRequest) -> PipelineResult<JobHandle> {
                Ok(JobHandle { id: "j".into() })
            }
            async fn poll(&self, _job: &JobHandle) -> PipelineResult<JobStatus> {
                Ok(JobStatus::Ready {
                    location: "j".into(),
                })
            }
            async fn download(&self, _location: &str) -> PipelineResult<Vec<u8>> {
                let grid = region().grid();
                let field = VariableField::new(
                    VariableId::Temperature2m,
                    grid.clone(),
                    vec![YearMonth::new(2024, 7).first_day()],
                    vec![9999.0; grid.len()],
                );
                Ok(serde_json::to_vec(&vec![field]).unwrap())
            }
        }

        drop(fetcher);
        let dir = tempfile::tempdir().unwrap();
        let cache = FsCacheStore::open(dir.path()).await.unwrap();
        let fetcher = Fetcher::new(BadArchive, cache, fast_config());

        let outcome = fetcher
            .fetch(&[VariableId::Temperature2m], &region(), range(2024, 7, 2024, 7))
            .await
            .unwrap();
        assert!(outcome.fields[0].values.iter().all(|v| v.is_nan()));
    }
}
