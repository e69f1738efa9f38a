//! Durable storage for the wildfire-risk pipeline.
//!
//! Two concerns share the same atomic-publish discipline (write to a
//! temporary location, fsync, rename): the raw-dataset cache and the
//! published risk grid. A crash mid-write never leaves a partial entry
//! visible.

pub mod cache;
pub mod publisher;

pub use cache::{CacheEntry, CacheKey, FsCacheStore};
pub use publisher::GridPublisher;
