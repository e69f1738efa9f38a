//! CSV loader for the historical fire record.
//!
//! The record ships as a flat CSV with `fecha,lat,lng,superficie` columns
//! (date, latitude, longitude, burned hectares). Column order is taken
//! from the header, so extra columns are tolerated. Malformed rows are
//! skipped and counted, never fatal: the record is decades of manually
//! curated data and a few bad rows are expected.

use std::path::Path;

use chrono::NaiveDate;
use tracing::{info, warn};

use risk_common::{BoundingBox, PipelineError, PipelineResult};

use crate::store::FireEvent;

/// Filter applied while loading, mirroring how the record is curated for a
/// region: small fires and out-of-bounds points are dropped at the door.
#[derive(Debug, Clone)]
pub struct LoadFilter {
    pub bbox: Option<BoundingBox>,
    /// Keep only fires with at least this burned area (hectares).
    pub min_area_ha: f64,
    /// Keep only fires on or after this date.
    pub from: Option<NaiveDate>,
}

impl Default for LoadFilter {
    fn default() -> Self {
        Self {
            bbox: None,
            min_area_ha: 0.0,
            from: None,
        }
    }
}

/// Load fire events from a CSV file, applying the filter.
pub fn load_csv(path: &Path, filter: &LoadFilter) -> PipelineResult<Vec<FireEvent>> {
    let content = std::fs::read_to_string(path)?;
    let mut lines = content.lines();

    let header = lines
        .next()
        .ok_or_else(|| PipelineError::Config(format!("empty fire record: {}", path.display())))?;
    let columns = parse_header(header)?;

    let mut events = Vec::new();
    let mut skipped = 0usize;

    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        match parse_row(line, &columns) {
            Some(event) => {
                if keep(&event, filter) {
                    events.push(event);
                }
            }
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        warn!(skipped, path = %path.display(), "Skipped malformed fire record rows");
    }
    info!(
        events = events.len(),
        path = %path.display(),
        "Loaded fire events"
    );
    Ok(events)
}

struct Columns {
    date: usize,
    lat: usize,
    lon: usize,
    area: usize,
}

fn parse_header(header: &str) -> PipelineResult<Columns> {
    let names: Vec<&str> = header.split(',').map(str::trim).collect();
    let find = |name: &str| -> PipelineResult<usize> {
        names
            .iter()
            .position(|n| *n == name)
            .ok_or_else(|| PipelineError::Config(format!("fire record missing column '{name}'")))
    };
    Ok(Columns {
        date: find("fecha")?,
        lat: find("lat")?,
        lon: find("lng")?,
        area: find("superficie")?,
    })
}

fn parse_row(line: &str, columns: &Columns) -> Option<FireEvent> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    let get = |i: usize| fields.get(i).copied();

    let date = NaiveDate::parse_from_str(get(columns.date)?, "%Y-%m-%d").ok()?;
    let lat: f64 = get(columns.lat)?.parse().ok()?;
    let lon: f64 = get(columns.lon)?.parse().ok()?;
    let area_ha: f64 = get(columns.area)?.parse().ok()?;

    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return None;
    }

    Some(FireEvent {
        lat,
        lon,
        date,
        area_ha,
    })
}

fn keep(event: &FireEvent, filter: &LoadFilter) -> bool {
    if event.area_ha < filter.min_area_ha {
        return false;
    }
    if let Some(bbox) = &filter.bbox {
        if !bbox.contains(event.lon, event.lat) {
            return false;
        }
    }
    if let Some(from) = filter.from {
        if event.date < from {
            return false;
        }
    }
    true
}
