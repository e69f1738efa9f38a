//! Shared types for the wildfire-risk pipeline.
//!
//! Everything that crosses a crate boundary lives here: the region and its
//! canonical grid, time ranges, the climate-variable registry, the raw
//! per-variable field, the published risk grid, and the error taxonomy.

pub mod bbox;
pub mod error;
pub mod field;
pub mod region;
pub mod risk_grid;
pub mod serde_nan;
pub mod time;
pub mod variable;

pub use bbox::BoundingBox;
pub use error::{PipelineError, PipelineResult};
pub use field::VariableField;
pub use region::{GridSpec, Region};
pub use risk_grid::{RiskGrid, RiskGridMetadata, RiskStats, VariableProvenance};
pub use time::{Cadence, TimeRange, YearMonth};
pub use variable::{TemporalReducer, VariableId};
