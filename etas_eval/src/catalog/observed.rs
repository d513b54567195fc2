// src/catalog/observed.rs
//
// Observed catalog loader.
//
// Reads a header-driven CSV. Both the CSEP ascii layout
// (lon, lat, mag, origin_time, depth, catalog_id, event_id) and the ComCat
// export layout (time, latitude, longitude, depth, mag, ..., id) are accepted;
// columns are located by name, not position. Filters and the spatial mask of
// the region are applied while reading.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use csv::{ReaderBuilder, StringRecord, Trim};
use tracing::{debug, info};

use super::{Catalog, Event, FilterSet};
use crate::region::SpaceMagnitudeRegion;

const LON_COLUMNS: &[&str] = &["lon", "longitude"];
const LAT_COLUMNS: &[&str] = &["lat", "latitude"];
const MAG_COLUMNS: &[&str] = &["mag", "magnitude"];
const TIME_COLUMNS: &[&str] = &["origin_time", "time"];
const DEPTH_COLUMNS: &[&str] = &["depth"];
const ID_COLUMNS: &[&str] = &["event_id", "id"];

const NAIVE_TIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
];

/// Errors raised while loading an observed catalog.
#[derive(Debug)]
pub enum CatalogError {
    Io { path: String, source: io::Error },
    Csv { path: String, source: csv::Error },
    MissingColumn { path: String, column: String },
    InvalidRow { path: String, line: u64, message: String },
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogError::Io { path, source } => {
                write!(f, "Failed to read catalog '{}': {}", path, source)
            }
            CatalogError::Csv { path, source } => {
                write!(f, "Failed to parse catalog CSV '{}': {}", path, source)
            }
            CatalogError::MissingColumn { path, column } => {
                write!(f, "Catalog '{}' has no '{}' column", path, column)
            }
            CatalogError::InvalidRow {
                path,
                line,
                message,
            } => write!(f, "Catalog '{}' line {}: {}", path, line, message),
        }
    }
}

impl std::error::Error for CatalogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CatalogError::Io { source, .. } => Some(source),
            CatalogError::Csv { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Column positions resolved from the header row.
#[derive(Debug, Clone, Copy)]
struct Columns {
    lon: usize,
    lat: usize,
    mag: usize,
    time: usize,
    depth: Option<usize>,
    id: Option<usize>,
}

impl Columns {
    fn resolve(headers: &StringRecord, path: &str) -> Result<Self, CatalogError> {
        let find = |aliases: &[&str]| {
            headers
                .iter()
                .position(|h| aliases.contains(&h.trim().to_ascii_lowercase().as_str()))
        };
        let require = |aliases: &[&str]| {
            find(aliases).ok_or_else(|| CatalogError::MissingColumn {
                path: path.to_string(),
                column: aliases[0].to_string(),
            })
        };

        Ok(Self {
            lon: require(LON_COLUMNS)?,
            lat: require(LAT_COLUMNS)?,
            mag: require(MAG_COLUMNS)?,
            time: require(TIME_COLUMNS)?,
            depth: find(DEPTH_COLUMNS),
            id: find(ID_COLUMNS),
        })
    }
}

/// Parse an origin time as epoch milliseconds or an ISO 8601 timestamp.
/// Timestamps without an offset are taken as UTC.
pub fn parse_origin_time(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(ms) = raw.parse::<i64>() {
        return Some(ms);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp_millis());
    }
    NAIVE_TIME_FORMATS.iter().find_map(|fmt| {
        NaiveDateTime::parse_from_str(raw, fmt)
            .ok()
            .map(|naive| Utc.from_utc_datetime(&naive).timestamp_millis())
    })
}

/// Load the observed catalog at `path`, keeping events that pass `filters`
/// and fall inside `region`.
pub fn load_catalog(
    path: &Path,
    name: &str,
    region: &SpaceMagnitudeRegion,
    filters: &FilterSet,
) -> Result<Catalog, CatalogError> {
    let label = path.display().to_string();
    let file = File::open(path).map_err(|source| CatalogError::Io {
        path: label.clone(),
        source,
    })?;
    let catalog = read_catalog_labeled(file, &label, name, region, filters)?;
    info!(
        path = %label,
        events = catalog.event_count(),
        "Loaded observed catalog '{}'",
        name
    );
    Ok(catalog)
}

/// Read an observed catalog from any CSV source.
pub fn read_catalog<R: Read>(
    reader: R,
    name: &str,
    region: &SpaceMagnitudeRegion,
    filters: &FilterSet,
) -> Result<Catalog, CatalogError> {
    read_catalog_labeled(reader, "<reader>", name, region, filters)
}

fn read_catalog_labeled<R: Read>(
    reader: R,
    label: &str,
    name: &str,
    region: &SpaceMagnitudeRegion,
    filters: &FilterSet,
) -> Result<Catalog, CatalogError> {
    let csv_err = |source| CatalogError::Csv {
        path: label.to_string(),
        source,
    };

    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers = rdr.headers().map_err(csv_err)?.clone();
    let columns = Columns::resolve(&headers, label)?;

    let mut events = Vec::new();
    let mut rows = 0usize;
    for record in rdr.records() {
        let record = record.map_err(csv_err)?;
        rows += 1;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let event = parse_row(&record, &columns).map_err(|message| CatalogError::InvalidRow {
            path: label.to_string(),
            line,
            message,
        })?;
        if filters.matches(&event) && region.contains(&event) {
            events.push(event);
        }
    }

    debug!(
        path = %label,
        rows,
        kept = events.len(),
        "Applied filters to observed catalog"
    );
    Ok(Catalog::new(name, events))
}

fn parse_row(record: &StringRecord, columns: &Columns) -> Result<Event, String> {
    let field = |idx: usize, what: &str| -> Result<&str, String> {
        record
            .get(idx)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| format!("missing {}", what))
    };
    let number = |idx: usize, what: &str| -> Result<f64, String> {
        let raw = field(idx, what)?;
        raw.parse::<f64>()
            .map_err(|_| format!("invalid {} '{}'", what, raw))
    };

    let raw_time = field(columns.time, "origin_time")?;
    let origin_time = parse_origin_time(raw_time)
        .ok_or_else(|| format!("invalid origin_time '{}'", raw_time))?;

    let depth = match columns.depth {
        Some(idx) => match record.get(idx).filter(|s| !s.is_empty()) {
            Some(raw) => raw
                .parse::<f64>()
                .map_err(|_| format!("invalid depth '{}'", raw))?,
            None => f64::NAN,
        },
        None => f64::NAN,
    };

    Ok(Event {
        event_id: columns
            .id
            .and_then(|idx| record.get(idx))
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        origin_time,
        latitude: number(columns.lat, "latitude")?,
        longitude: number(columns.lon, "longitude")?,
        depth,
        magnitude: number(columns.mag, "magnitude")?,
    })
}
