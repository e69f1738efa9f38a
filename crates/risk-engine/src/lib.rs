//! Composite fire-risk scoring.
//!
//! The engine applies a fixed, versioned weighting configuration to the
//! aligned dataset; no model fitting happens at scoring time. The method is
//! a pluggable configuration artifact precisely because the "right" formula
//! is calibrated offline against historical fire density.

pub mod config;
pub mod derive;
pub mod score;

pub use config::{MissingFallback, Normalization, RiskInput, WeightTerm, WeightingConfig};
pub use score::{score, ScoreContext};
