//! Variable alignment: heterogeneous native grids and time steps onto one
//! canonical region grid and cadence.
//!
//! Resampling is explicit configuration per variable (spatial method plus
//! temporal reducer); cells outside a variable's native coverage are marked
//! missing, never zero-filled. Whether a gap propagates or is interpolated
//! is the risk engine's decision, not the aligner's.

pub mod align;
pub mod dataset;
pub mod interpolation;

pub use align::{align, registry_specs};
pub use dataset::{AlignedDataset, AlignmentSpec, SpatialMethod};
