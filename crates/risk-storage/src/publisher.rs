//! Atomic publication of computed risk grids.
//!
//! Each run writes a new grid file; a `CURRENT` pointer names the latest
//! fully written one. The pointer is only rewritten after the grid file is
//! durable, so a failed publish leaves the prior grid authoritative.

use std::path::PathBuf;

use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use risk_common::{PipelineError, PipelineResult, RiskGrid};

const CURRENT_POINTER: &str = "CURRENT";

/// Publishes risk grids to durable storage and tracks the current one.
pub struct GridPublisher {
    root: PathBuf,
}

impl GridPublisher {
    /// Open (or create) a publish directory.
    pub async fn open(root: impl Into<PathBuf>) -> PipelineResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join("tmp")).await?;
        Ok(Self { root })
    }

    /// Publish a grid atomically. Returns the artifact filename.
    ///
    /// The grid file is written via temp-then-rename and fsynced before the
    /// `CURRENT` pointer is updated (also temp-then-rename).
    pub async fn publish(&self, grid: &RiskGrid) -> PipelineResult<String> {
        let filename = format!(
            "grid-{}-{}.json",
            grid.metadata.provenance_signature(),
            grid.metadata.computed_at.format("%Y%m%dT%H%M%SZ")
        );

        let raw = serde_json::to_vec(grid)
            .map_err(|e| PipelineError::Publish(format!("serialization failed: {e}")))?;

        self.write_atomic(&filename, &raw)
            .await
            .map_err(|e| PipelineError::Publish(format!("grid write failed: {e}")))?;

        self.write_atomic(CURRENT_POINTER, filename.as_bytes())
            .await
            .map_err(|e| PipelineError::Publish(format!("pointer update failed: {e}")))?;

        info!(
            artifact = %filename,
            time_steps = grid.times.len(),
            indeterminate = grid.metadata.indeterminate_cells,
            clamped = grid.metadata.clamped_cells,
            "Published risk grid"
        );
        Ok(filename)
    }

    /// Whether any grid has been published.
    pub async fn is_published(&self) -> bool {
        self.root.join(CURRENT_POINTER).exists()
    }

    /// Read the currently published grid, or `None` if nothing has been
    /// published yet (a normal state for consumers, not an error).
    pub async fn current(&self) -> PipelineResult<Option<RiskGrid>> {
        let pointer = self.root.join(CURRENT_POINTER);
        let filename = match tokio::fs::read_to_string(&pointer).await {
            Ok(s) => s.trim().to_string(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let raw = tokio::fs::read(self.root.join(&filename)).await?;
        let grid = serde_json::from_slice(&raw)?;
        debug!(artifact = %filename, "Loaded current risk grid");
        Ok(Some(grid))
    }

    /// Provenance signature of the currently published grid, if any.
    pub async fn current_provenance(&self) -> PipelineResult<Option<String>> {
        Ok(self
            .current()
            .await?
            .map(|g| g.metadata.provenance_signature()))
    }

    async fn write_atomic(&self, name: &str, data: &[u8]) -> std::io::Result<()> {
        let tmp_path = self.root.join("tmp").join(format!("{name}.partial"));
        let final_path = self.root.join(name);

        let mut f = tokio::fs::File::create(&tmp_path).await?;
        f.write_all(data).await?;
        f.sync_all().await?;
        drop(f);
        tokio::fs::rename(&tmp_path, &final_path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use risk_common::{BoundingBox, Region, RiskGridMetadata, TimeRange, YearMonth};

    fn sample_grid(source: &str) -> RiskGrid {
        let region = Region::new(BoundingBox::new(-9.3, 42.0, -8.3, 43.0), 0.5);
        let grid = region.grid();
        let n = grid.len();
        RiskGrid {
            grid: grid.clone(),
            times: vec![YearMonth::new(2024, 7)],
            scores: vec![0.5; n],
            metadata: RiskGridMetadata {
                region_signature: region.signature(),
                resolution: 0.5,
                time_range: TimeRange::new(YearMonth::new(2024, 7), YearMonth::new(2024, 7)),
                variables: vec![],
                weighting_version: "v1".into(),
                computed_at: Utc::now(),
                source_signatures: vec![source.into()],
                missing_cells: 0,
                indeterminate_cells: 0,
                clamped_cells: 0,
                fallback: None,
                stats: None,
            },
        }
    }

    #[tokio::test]
    async fn test_publish_and_read_current() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = GridPublisher::open(dir.path()).await.unwrap();

        assert!(!publisher.is_published().await);
        assert!(publisher.current().await.unwrap().is_none());

        publisher.publish(&sample_grid("a")).await.unwrap();
        assert!(publisher.is_published().await);

        let current = publisher.current().await.unwrap().unwrap();
        assert_eq!(current.metadata.source_signatures, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_new_publish_supersedes() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = GridPublisher::open(dir.path()).await.unwrap();

        publisher.publish(&sample_grid("a")).await.unwrap();
        publisher.publish(&sample_grid("b")).await.unwrap();

        let current = publisher.current().await.unwrap().unwrap();
        assert_eq!(current.metadata.source_signatures, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_publish_keeps_prior_grid() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = GridPublisher::open(dir.path()).await.unwrap();
        publisher.publish(&sample_grid("a")).await.unwrap();

        // Sabotage the temp directory so the next grid write fails before
        // the pointer is touched.
        tokio::fs::remove_dir_all(dir.path().join("tmp"))
            .await
            .unwrap();
        let err = publisher.publish(&sample_grid("b")).await.unwrap_err();
        assert!(matches!(err, PipelineError::Publish(_)));

        // Prior grid still retrievable and unchanged.
        let current = publisher.current().await.unwrap().unwrap();
        assert_eq!(current.metadata.source_signatures, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_scores_roundtrip_with_indeterminate() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = GridPublisher::open(dir.path()).await.unwrap();

        let mut grid = sample_grid("a");
        grid.scores[0] = f32::NAN;
        grid.metadata.indeterminate_cells = 1;
        publisher.publish(&grid).await.unwrap();

        let current = publisher.current().await.unwrap().unwrap();
        assert!(current.scores[0].is_nan());
        assert_eq!(current.scores[1], 0.5);
    }

}
