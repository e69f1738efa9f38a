//! Spatially indexed store of fire events.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use risk_common::{BoundingBox, Region, TimeRange};

/// One historical fire occurrence. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FireEvent {
    pub lat: f64,
    pub lon: f64,
    pub date: NaiveDate,
    /// Burned area in hectares.
    pub area_ha: f64,
}

/// Cell size of the spatial bucket index, in degrees. Coarser than any
/// practical region resolution so a range query touches few buckets.
const BUCKET_DEG: f64 = 0.5;

/// Fire event store with a bucketed spatial index for range queries.
///
/// The historical record may span decades and a broad area; queries only
/// visit the buckets overlapping the requested bounds.
pub struct FireEventStore {
    events: Vec<FireEvent>,
    buckets: HashMap<(i32, i32), Vec<usize>>,
}

impl FireEventStore {
    /// Build a store (and its index) from loaded events.
    pub fn new(events: Vec<FireEvent>) -> Self {
        let mut buckets: HashMap<(i32, i32), Vec<usize>> = HashMap::new();
        for (i, event) in events.iter().enumerate() {
            buckets.entry(bucket_of(event.lon, event.lat)).or_default().push(i);
        }
        debug!(
            events = events.len(),
            buckets = buckets.len(),
            "Indexed fire events"
        );
        Self { events, buckets }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events inside the bounds and time range, in no particular order.
    pub fn events_in(&self, bbox: &BoundingBox, time_range: TimeRange) -> Vec<&FireEvent> {
        let (min_bx, min_by) = bucket_of(bbox.min_lon, bbox.min_lat);
        let (max_bx, max_by) = bucket_of(bbox.max_lon, bbox.max_lat);

        let mut out = Vec::new();
        for bx in min_bx..=max_bx {
            for by in min_by..=max_by {
                let Some(indices) = self.buckets.get(&(bx, by)) else {
                    continue;
                };
                for &i in indices {
                    let e = &self.events[i];
                    if bbox.contains(e.lon, e.lat) && time_range.contains_date(e.date) {
                        out.push(e);
                    }
                }
            }
        }
        out
    }

    /// Aggregate event counts onto the region's canonical grid.
    ///
    /// Returns a row-major 2-D array matching the grid the aligner uses, so
    /// correlation and calibration run on matching cells. Events outside
    /// the grid are ignored.
    pub fn density_grid(&self, region: &Region, time_range: TimeRange) -> Vec<f32> {
        let grid = region.grid();
        let mut counts = vec![0.0f32; grid.len()];

        for event in self.events_in(&region.bbox, time_range) {
            if let Some((col, row)) = grid.nearest_index(event.lon, event.lat) {
                counts[grid.flat_index(col, row)] += 1.0;
            }
        }
        counts
    }
}

fn bucket_of(lon: f64, lat: f64) -> (i32, i32) {
    (
        (lon / BUCKET_DEG).floor() as i32,
        (lat / BUCKET_DEG).floor() as i32,
    )
}
