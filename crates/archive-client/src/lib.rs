//! Client for the remote gridded climate archive.
//!
//! The archive serves batch jobs: a request is submitted, polled until
//! ready, then downloaded. [`Fetcher`] layers chunking, retries and the
//! local cache on top so callers see one `fetch` call that touches the
//! network only for data it does not already hold.

pub mod api;
pub mod fetch;

pub use api::{ArchiveApi, DataRequest, HttpArchiveClient, JobHandle, JobStatus};
pub use fetch::{FetchConfig, FetchOutcome, Fetcher};
