//! Region definition and its canonical grid.
//!
//! Every variable is resampled onto exactly one region grid before scoring.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::BoundingBox;

/// Configured geographic area plus canonical resolution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub bbox: BoundingBox,
    /// Grid cell size in degrees.
    pub resolution: f64,
}

impl Region {
    pub fn new(bbox: BoundingBox, resolution: f64) -> Self {
        Self { bbox, resolution }
    }

    /// The canonical grid for this region.
    pub fn grid(&self) -> GridSpec {
        GridSpec::from_region(self.bbox, self.resolution)
    }

    /// Deterministic signature over bounds and resolution.
    pub fn signature(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.bbox.signature().as_bytes());
        hasher.update(format!("@{:.6}", self.resolution).as_bytes());
        hex::encode(&hasher.finalize()[..8])
    }
}

/// A regular lat/lon grid. Row 0 is the northernmost latitude, matching the
/// scan order of the reanalysis archive; data referencing this spec is
/// row-major `[row * nx + col]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    /// Number of points in the longitude direction.
    pub nx: usize,
    /// Number of points in the latitude direction.
    pub ny: usize,
    /// Cell size in degrees.
    pub resolution: f64,
    /// Longitude of column 0 (west edge).
    pub min_lon: f64,
    /// Latitude of row 0 (north edge).
    pub max_lat: f64,
}

impl GridSpec {
    /// Build the grid covering a bounding box at the given resolution.
    /// Both edges are grid points, so an exact multiple spans n+1 points.
    pub fn from_region(bbox: BoundingBox, resolution: f64) -> Self {
        let nx = (bbox.width() / resolution).round() as usize + 1;
        let ny = (bbox.height() / resolution).round() as usize + 1;
        Self {
            nx,
            ny,
            resolution,
            min_lon: bbox.min_lon,
            max_lat: bbox.max_lat,
        }
    }

    /// Longitude of column `i`.
    pub fn lon(&self, i: usize) -> f64 {
        self.min_lon + i as f64 * self.resolution
    }

    /// Latitude of row `j` (decreasing from the north edge).
    pub fn lat(&self, j: usize) -> f64 {
        self.max_lat - j as f64 * self.resolution
    }

    /// All latitudes, north to south.
    pub fn lats(&self) -> Vec<f64> {
        (0..self.ny).map(|j| self.lat(j)).collect()
    }

    /// All longitudes, west to east.
    pub fn lons(&self) -> Vec<f64> {
        (0..self.nx).map(|i| self.lon(i)).collect()
    }

    /// Fractional (col, row) position of a coordinate on this grid, or
    /// `None` when it falls outside the grid's coverage.
    pub fn frac_index(&self, lon: f64, lat: f64) -> Option<(f64, f64)> {
        let col = (lon - self.min_lon) / self.resolution;
        let row = (self.max_lat - lat) / self.resolution;
        let eps = 1e-9;
        if col < -eps
            || row < -eps
            || col > (self.nx - 1) as f64 + eps
            || row > (self.ny - 1) as f64 + eps
        {
            return None;
        }
        Some((
            col.clamp(0.0, (self.nx - 1) as f64),
            row.clamp(0.0, (self.ny - 1) as f64),
        ))
    }

    /// Nearest grid indices for a coordinate, or `None` outside coverage.
    pub fn nearest_index(&self, lon: f64, lat: f64) -> Option<(usize, usize)> {
        let (col, row) = self.frac_index(lon, lat)?;
        Some((col.round() as usize, row.round() as usize))
    }

    /// Flat array index for a grid position.
    pub fn flat_index(&self, col: usize, row: usize) -> usize {
        row * self.nx + col
    }

    /// Geographic bounds of the grid.
    pub fn bbox(&self) -> BoundingBox {
        BoundingBox::new(
            self.min_lon,
            self.lat(self.ny - 1),
            self.lon(self.nx - 1),
            self.max_lat,
        )
    }

    /// Points per time step.
    pub fn len(&self) -> usize {
        self.nx * self.ny
    }

    pub fn is_empty(&self) -> bool {
        self.nx == 0 || self.ny == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn galicia() -> Region {
        Region::new(BoundingBox::new(-9.3, 42.0, -7.3, 44.0), 0.25)
    }

    #[test]
    fn test_grid_shape() {
        // 2 degrees at 0.25 deg spans 9 points per axis
        let grid = galicia().grid();
        assert_eq!(grid.nx, 9);
        assert_eq!(grid.ny, 9);
        assert_eq!(grid.len(), 81);
    }

    #[test]
    fn test_axes_orientation() {
        let grid = galicia().grid();
        assert!((grid.lat(0) - 44.0).abs() < 1e-9);
        assert!((grid.lat(8) - 42.0).abs() < 1e-9);
        assert!((grid.lon(0) - -9.3).abs() < 1e-9);
        assert!((grid.lon(8) - -7.3).abs() < 1e-9);
    }

    #[test]
    fn test_nearest_index() {
        let grid = galicia().grid();
        assert_eq!(grid.nearest_index(-9.3, 44.0), Some((0, 0)));
        assert_eq!(grid.nearest_index(-7.3, 42.0), Some((8, 8)));
        // Just outside coverage
        assert_eq!(grid.nearest_index(-9.6, 44.0), None);
        assert_eq!(grid.nearest_index(-9.3, 44.5), None);
    }

    #[test]
    fn test_signature_sensitive_to_resolution() {
        let a = galicia();
        let b = Region::new(a.bbox, 0.5);
        assert_ne!(a.signature(), b.signature());
    }

    #[test]
    fn test_grid_bbox_roundtrip() {
        let region = galicia();
        let bbox = region.grid().bbox();
        assert!((bbox.min_lon - region.bbox.min_lon).abs() < 1e-9);
        assert!((bbox.max_lat - region.bbox.max_lat).abs() < 1e-9);
    }
}
