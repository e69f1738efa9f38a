//! Historical wildfire occurrence records.
//!
//! Point events are kept separate from gridded climate data; the two meet
//! only at density aggregation onto the canonical region grid.

pub mod loader;
pub mod store;

pub use loader::{load_csv, LoadFilter};
pub use store::{FireEvent, FireEventStore};
