// src/catalog/mod.rs
//
// Earthquake catalogs: events, binning against a space-magnitude region, and
// the human-readable summary stored as provenance in evaluation results.
//
// Submodules:
// - filter:   filter expressions (origin_time / magnitude comparisons)
// - observed: CSV loader for the observed catalog
// - ucerf3:   binary reader for UCERF3-ETAS stochastic event sets

pub mod filter;
pub mod observed;
pub mod ucerf3;

use std::fmt;

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::region::SpaceMagnitudeRegion;

pub use filter::{Comparison, Filter, FilterError, FilterField, FilterSet, FilterValue};
pub use observed::{load_catalog, read_catalog, CatalogError};
pub use ucerf3::Ucerf3Reader;

/// A single seismic event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Source identifier (observed catalogs only).
    pub event_id: Option<String>,
    /// Origin time in milliseconds since the Unix epoch.
    pub origin_time: i64,
    pub latitude: f64,
    pub longitude: f64,
    /// Hypocentral depth in km.
    pub depth: f64,
    pub magnitude: f64,
}

/// Named, ordered set of events.
#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    name: String,
    events: Vec<Event>,
}

impl Catalog {
    pub fn new(name: impl Into<String>, events: Vec<Event>) -> Self {
        Self {
            name: name.into(),
            events,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Event counts per spatial cell. Events outside the grid are ignored.
    pub fn spatial_counts(&self, region: &SpaceMagnitudeRegion) -> Vec<u64> {
        let mut counts = vec![0u64; region.num_cells()];
        for cell in self.events.iter().filter_map(|e| region.get_cell(e)) {
            counts[cell] += 1;
        }
        counts
    }

    /// Event counts per magnitude bin. Events below the first edge are
    /// ignored; events above the last edge land in the last bin.
    pub fn magnitude_counts(&self, region: &SpaceMagnitudeRegion) -> Vec<u64> {
        let mut counts = vec![0u64; region.num_mag_bins()];
        for bin in self
            .events
            .iter()
            .filter_map(|e| region.get_magnitude_index(e.magnitude))
        {
            counts[bin] += 1;
        }
        counts
    }

    /// Flat cells x magnitudes counts (see `SpaceMagnitudeRegion::flat_index`).
    pub fn spatial_magnitude_counts(&self, region: &SpaceMagnitudeRegion) -> Vec<u64> {
        let mut counts = vec![0u64; region.num_cells() * region.num_mag_bins()];
        for (cell, mag) in self.events.iter().filter_map(|e| region.bin_event(e)) {
            counts[region.flat_index(cell, mag)] += 1;
        }
        counts
    }

    /// Earliest and latest origin times.
    pub fn time_range(&self) -> Option<(i64, i64)> {
        let min = self.events.iter().map(|e| e.origin_time).min()?;
        let max = self.events.iter().map(|e| e.origin_time).max()?;
        Some((min, max))
    }

    pub fn magnitude_range(&self) -> Option<(f64, f64)> {
        min_max(self.events.iter().map(|e| e.magnitude))
    }

    /// Multi-line summary: name, date range, extent, magnitude range, count.
    pub fn summary(&self) -> String {
        let (start, end) = match self.time_range() {
            Some((a, b)) => (format_epoch_millis(a), format_epoch_millis(b)),
            None => ("None".to_string(), "None".to_string()),
        };
        let lat = format_range(min_max(self.events.iter().map(|e| e.latitude)));
        let lon = format_range(min_max(self.events.iter().map(|e| e.longitude)));
        let (min_mw, max_mw) = match self.magnitude_range() {
            Some((a, b)) => (format!("{:?}", a), format!("{:?}", b)),
            None => ("None".to_string(), "None".to_string()),
        };

        format!(
            "Name: {}\n\n\
             Start Date: {}\nEnd Date: {}\n\n\
             Latitude: {}\nLongitude: {}\n\n\
             Min Mw: {}\nMax Mw: {}\n\n\
             Event Count: {}\n",
            self.name,
            start,
            end,
            lat,
            lon,
            min_mw,
            max_mw,
            self.event_count()
        )
    }
}

impl fmt::Display for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

/// Render epoch milliseconds as a UTC timestamp.
pub fn format_epoch_millis(ms: i64) -> String {
    match Utc.timestamp_millis_opt(ms).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S%.3f+00:00").to_string(),
        None => ms.to_string(),
    }
}

fn min_max(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    values.fold(None, |acc, v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })
}

fn format_range(range: Option<(f64, f64)>) -> String {
    match range {
        Some((lo, hi)) => format!("({:?}, {:?})", lo, hi),
        None => "None".to_string(),
    }
}
