//! The archive's batch-job protocol.
//!
//! Jobs go through submit, poll, download. The trait exists so the fetch
//! layer can be exercised against an in-process archive in tests.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use risk_common::{PipelineError, PipelineResult, Region, TimeRange, VariableId};

/// One batch request against the archive: a set of variables over a region
/// and an inclusive month range, on the region's resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct DataRequest {
    pub variables: Vec<VariableId>,
    pub region: Region,
    pub time_range: TimeRange,
}

/// Server-side identifier of a submitted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub id: String,
}

/// Lifecycle state of a submitted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Running,
    /// The result is staged at `location`, ready for download.
    Ready { location: String },
    Failed { message: String },
}

/// The archive's job protocol, abstracted for testing.
#[async_trait]
pub trait ArchiveApi: Send + Sync {
    async fn submit(&self, request: &DataRequest) -> PipelineResult<JobHandle>;
    async fn poll(&self, job: &JobHandle) -> PipelineResult<JobStatus>;
    async fn download(&self, location: &str) -> PipelineResult<Vec<u8>>;
}

/// HTTP client against the real archive.
pub struct HttpArchiveClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Serialize)]
struct SubmitBody<'a> {
    product: &'a str,
    variables: Vec<&'static str>,
    /// North, west, south, east.
    area: [f64; 4],
    grid: [f64; 2],
    months: Vec<String>,
}

#[derive(Deserialize)]
struct SubmitResponse {
    id: String,
}

#[derive(Deserialize)]
struct PollResponse {
    status: String,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl HttpArchiveClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        request_timeout: Duration,
    ) -> PipelineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PipelineError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }

    fn retrieval(e: reqwest::Error) -> PipelineError {
        PipelineError::retrieval(e.to_string(), None)
    }
}

#[async_trait]
impl ArchiveApi for HttpArchiveClient {
    async fn submit(&self, request: &DataRequest) -> PipelineResult<JobHandle> {
        let bbox = request.region.bbox;
        let body = SubmitBody {
            product: "reanalysis-monthly-means",
            variables: request
                .variables
                .iter()
                .map(|v| v.archive_name())
                .collect(),
            area: [bbox.max_lat, bbox.min_lon, bbox.min_lat, bbox.max_lon],
            grid: [request.region.resolution, request.region.resolution],
            months: request.time_range.months().map(|m| m.to_string()).collect(),
        };

        let response = self
            .client
            .post(format!("{}/jobs", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(Self::retrieval)?
            .error_for_status()
            .map_err(Self::retrieval)?;

        let submitted: SubmitResponse = response.json().await.map_err(Self::retrieval)?;
        debug!(job_id = %submitted.id, range = %request.time_range, "Submitted archive job");
        Ok(JobHandle { id: submitted.id })
    }

    async fn poll(&self, job: &JobHandle) -> PipelineResult<JobStatus> {
        let response = self
            .client
            .get(format!("{}/jobs/{}", self.base_url, job.id))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(Self::retrieval)?
            .error_for_status()
            .map_err(Self::retrieval)?;

        let poll: PollResponse = response.json().await.map_err(Self::retrieval)?;
        let status = match poll.status.as_str() {
            "queued" => JobStatus::Queued,
            "running" => JobStatus::Running,
            "ready" => JobStatus::Ready {
                location: poll.location.unwrap_or_else(|| {
                    format!("{}/jobs/{}/result", self.base_url, job.id)
                }),
            },
            "failed" => JobStatus::Failed {
                message: poll.error.unwrap_or_else(|| "unspecified".into()),
            },
            other => JobStatus::Failed {
                message: format!("unknown job status '{other}'"),
            },
        };
        Ok(status)
    }

    async fn download(&self, location: &str) -> PipelineResult<Vec<u8>> {
        let response = self
            .client
            .get(location)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(Self::retrieval)?
            .error_for_status()
            .map_err(Self::retrieval)?;

        let bytes = response.bytes().await.map_err(Self::retrieval)?;
        debug!(location, bytes = bytes.len(), "Downloaded archive result");
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use risk_common::{BoundingBox, YearMonth};

    #[test]
    fn test_submit_body_shape() {
        let request = DataRequest {
            variables: vec![VariableId::Temperature2m, VariableId::WindU10],
            region: Region::new(BoundingBox::new(-9.3, 42.0, -6.7, 43.8), 0.25),
            time_range: TimeRange::new(YearMonth::new(2024, 6), YearMonth::new(2024, 7)),
        };
        let bbox = request.region.bbox;
        let body = SubmitBody {
            product: "reanalysis-monthly-means",
            variables: request.variables.iter().map(|v| v.archive_name()).collect(),
            area: [bbox.max_lat, bbox.min_lon, bbox.min_lat, bbox.max_lon],
            grid: [0.25, 0.25],
            months: request.time_range.months().map(|m| m.to_string()).collect(),
        };

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["variables"][0], "2m_temperature");
        assert_eq!(json["area"][0], 43.8); // north first
        assert_eq!(json["months"][1], "2024-07");
    }

    #[test]
    fn test_poll_response_parsing() {
        let ready: PollResponse =
            serde_json::from_str(r#"{"status":"ready","location":"http://a/r"}"#).unwrap();
        assert_eq!(ready.status, "ready");
        assert_eq!(ready.location.as_deref(), Some("http://a/r"));

        let failed: PollResponse =
            serde_json::from_str(r#"{"status":"failed","error":"quota"}"#).unwrap();
        assert_eq!(failed.error.as_deref(), Some("quota"));
    }
}
