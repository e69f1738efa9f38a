//! Error taxonomy for the pipeline.

use thiserror::Error;

use crate::TimeRange;

/// Result type alias using PipelineError.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Primary error type for pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    // === Transient, recoverable ===
    /// Upstream archive failure. Carries the failing sub-range so a later
    /// run can resume from that point; earlier sub-requests are cached.
    #[error("retrieval failed for {sub_range:?}: {message}")]
    Retrieval {
        message: String,
        sub_range: Option<TimeRange>,
    },

    /// Cache checksum mismatch. The entry is evicted; the caller re-fetches.
    #[error("cache entry corrupt: {0}")]
    CacheCorruption(String),

    // === Structural, fatal for the run ===
    /// A native dataset does not cover the configured region.
    #[error("alignment failed for '{variable}': {message}")]
    Alignment { variable: String, message: String },

    /// The weighting configuration references an unavailable variable or is
    /// otherwise inconsistent. Fails fast before any computation.
    #[error("scoring configuration invalid: {0}")]
    ScoringConfiguration(String),

    /// Durable write of a risk grid failed. The previously published grid
    /// remains authoritative.
    #[error("publish failed: {0}")]
    Publish(String),

    // === Supporting variants ===
    #[error("unknown variable: {0}")]
    UnknownVariable(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    /// Convenience constructor for retrieval failures.
    pub fn retrieval(message: impl Into<String>, sub_range: Option<TimeRange>) -> Self {
        Self::Retrieval {
            message: message.into(),
            sub_range,
        }
    }

    /// Convenience constructor for alignment failures.
    pub fn alignment(variable: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Alignment {
            variable: variable.into(),
            message: message.into(),
        }
    }

    /// Whether a retry at the same inputs could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PipelineError::Retrieval { .. } | PipelineError::CacheCorruption(_)
        )
    }
}
