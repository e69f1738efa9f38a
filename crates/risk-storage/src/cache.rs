//! Filesystem cache for raw archive datasets.
//!
//! Entries are keyed by a deterministic signature over (sorted variable
//! names, region signature, time range, resolution). Blobs are published
//! atomically and validated by SHA-256 checksum on every read; a mismatch
//! evicts the entry instead of returning bad data. The cache is unbounded
//! by design, with `purge` for manual invalidation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use risk_common::{PipelineError, PipelineResult, Region, TimeRange, VariableId};

/// Deterministic cache key for one (variables, region, time range) request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub variables: Vec<VariableId>,
    pub region_signature: String,
    pub time_range: TimeRange,
    pub resolution: f64_bits::Resolution,
}

/// Resolution stored as raw bits so CacheKey can derive Eq/Hash.
mod f64_bits {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct Resolution(u64);

    impl Resolution {
        pub fn new(value: f64) -> Self {
            Self(value.to_bits())
        }

        pub fn value(self) -> f64 {
            f64::from_bits(self.0)
        }
    }
}

pub use f64_bits::Resolution;

impl CacheKey {
    /// Build a key; variable order does not matter.
    pub fn new(variables: &[VariableId], region: &Region, time_range: TimeRange) -> Self {
        let mut variables = variables.to_vec();
        variables.sort();
        variables.dedup();
        Self {
            variables,
            region_signature: region.signature(),
            time_range,
            resolution: Resolution::new(region.resolution),
        }
    }

    /// Hex signature identifying this key on disk.
    pub fn signature(&self) -> String {
        let mut hasher = Sha256::new();
        for v in &self.variables {
            hasher.update(v.short_name().as_bytes());
            hasher.update(b",");
        }
        hasher.update(self.region_signature.as_bytes());
        hasher.update(self.time_range.signature().as_bytes());
        hasher.update(format!("{:.6}", self.resolution.value()).as_bytes());
        hex::encode(&hasher.finalize()[..16])
    }
}

/// Immutable record of one cached dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    /// Blob filename relative to the cache root.
    pub file: String,
    /// SHA-256 of the blob contents.
    pub checksum: String,
    pub retrieved_at: DateTime<Utc>,
    pub size_bytes: u64,
}

/// Filesystem-backed cache store.
pub struct FsCacheStore {
    root: PathBuf,
    index: RwLock<HashMap<String, CacheEntry>>,
}

impl FsCacheStore {
    /// Open (or create) a cache rooted at `root`. The index is loaded from
    /// `index.json` if present; a missing index means an empty cache.
    pub async fn open(root: impl Into<PathBuf>) -> PipelineResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join("blobs")).await?;
        tokio::fs::create_dir_all(root.join("tmp")).await?;

        let index_path = root.join("index.json");
        let index = if index_path.exists() {
            let raw = tokio::fs::read(&index_path).await?;
            serde_json::from_slice(&raw)?
        } else {
            HashMap::new()
        };

        debug!(root = %root.display(), entries = index.len(), "Opened cache store");
        Ok(Self {
            root,
            index: RwLock::new(index),
        })
    }

    /// Whether a valid-looking entry exists for the key.
    pub async fn has(&self, key: &CacheKey) -> bool {
        let sig = key.signature();
        let index = self.index.read().await;
        match index.get(&sig) {
            Some(entry) => self.root.join(&entry.file).exists(),
            None => false,
        }
    }

    /// Fetch a cached blob, validating its checksum.
    ///
    /// Returns `Ok(None)` on a clean miss. A checksum mismatch evicts the
    /// entry and fails with `CacheCorruption`, forcing a re-fetch.
    pub async fn get(&self, key: &CacheKey) -> PipelineResult<Option<Vec<u8>>> {
        let sig = key.signature();
        let entry = {
            let index = self.index.read().await;
            match index.get(&sig) {
                Some(e) => e.clone(),
                None => return Ok(None),
            }
        };

        let path = self.root.join(&entry.file);
        let data = match tokio::fs::read(&path).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Blob vanished out from under the index; treat as a miss.
                warn!(signature = %sig, "Cache blob missing, evicting entry");
                self.evict(&sig).await?;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let checksum = hex::encode(Sha256::digest(&data));
        if checksum != entry.checksum {
            warn!(
                signature = %sig,
                expected = %entry.checksum,
                actual = %checksum,
                "Cache checksum mismatch, evicting entry"
            );
            self.evict(&sig).await?;
            return Err(PipelineError::CacheCorruption(format!(
                "checksum mismatch for {sig}"
            )));
        }

        debug!(signature = %sig, bytes = data.len(), "Cache hit");
        Ok(Some(data))
    }

    /// Store a blob atomically: temp write, fsync, rename, then index
    /// update. The entry only becomes visible once fully durable.
    pub async fn put(&self, key: &CacheKey, data: &[u8]) -> PipelineResult<CacheEntry> {
        let sig = key.signature();
        let file = format!("blobs/{sig}.json");
        let tmp_path = self.root.join("tmp").join(format!("{sig}.partial"));
        let final_path = self.root.join(&file);

        let mut f = tokio::fs::File::create(&tmp_path).await?;
        f.write_all(data).await?;
        f.sync_all().await?;
        drop(f);
        tokio::fs::rename(&tmp_path, &final_path).await?;

        let entry = CacheEntry {
            key: key.clone(),
            file,
            checksum: hex::encode(Sha256::digest(data)),
            retrieved_at: Utc::now(),
            size_bytes: data.len() as u64,
        };

        {
            let mut index = self.index.write().await;
            index.insert(sig.clone(), entry.clone());
            self.persist_index(&index).await?;
        }

        info!(signature = %sig, bytes = data.len(), "Cached dataset");
        Ok(entry)
    }

    /// Manually invalidate an entry.
    pub async fn purge(&self, key: &CacheKey) -> PipelineResult<bool> {
        let sig = key.signature();
        let existed = {
            let index = self.index.read().await;
            index.contains_key(&sig)
        };
        if existed {
            self.evict(&sig).await?;
        }
        Ok(existed)
    }

    /// Number of entries currently indexed.
    pub async fn len(&self) -> usize {
        self.index.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn evict(&self, sig: &str) -> PipelineResult<()> {
        let mut index = self.index.write().await;
        if let Some(entry) = index.remove(sig) {
            let path = self.root.join(&entry.file);
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    return Err(e.into());
                }
            }
            self.persist_index(&index).await?;
        }
        Ok(())
    }

    /// Rewrite the index with the same temp-then-rename discipline as blobs.
    async fn persist_index(&self, index: &HashMap<String, CacheEntry>) -> PipelineResult<()> {
        let tmp_path = self.root.join("tmp").join("index.partial");
        let final_path = self.root.join("index.json");

        let raw = serde_json::to_vec_pretty(index)?;
        let mut f = tokio::fs::File::create(&tmp_path).await?;
        f.write_all(&raw).await?;
        f.sync_all().await?;
        drop(f);
        tokio::fs::rename(&tmp_path, &final_path).await?;
        Ok(())
    }
}

/// Corrupt a cache blob in place. Test-support only.
#[doc(hidden)]
pub async fn corrupt_blob_for_test(root: &Path, key: &CacheKey) -> std::io::Result<()> {
    let path = root.join("blobs").join(format!("{}.json", key.signature()));
    tokio::fs::write(&path, b"garbage").await
}
