// src/region.rs
//
// Space-magnitude regions.
//
// A region is a fixed spatial grid of square lon/lat cells crossed with a
// sequence of magnitude bin edges. Spatial presets are resolved by name
// through a RegionRegistry that maps identifiers to pure constructor
// functions, so adding a region never touches the lookup code.

use std::collections::BTreeMap;
use std::fmt;

use crate::catalog::Event;

/// Tolerance used when snapping coordinates and magnitudes onto bin edges.
const BIN_TOL: f64 = 1e-9;

/// Name of the only built-in spatial preset.
pub const CALIFORNIA_RELM_REGION: &str = "california_relm_region";

/// Cell size of the RELM testing grid in degrees.
pub const RELM_DH: f64 = 0.1;

/// Upper bound on the number of magnitude bins in one region.
pub const MAX_MAGNITUDE_BINS: usize = 10_000;

/// RELM testing region polygon as (lon, lat) vertices.
pub const RELM_TESTING_POLYGON: &[(f64, f64)] = &[
    (-125.2, 43.0),
    (-119.0, 43.0),
    (-119.0, 39.4),
    (-114.0, 35.7),
    (-113.1, 34.3),
    (-113.5, 32.9),
    (-113.6, 32.2),
    (-114.5, 31.7),
    (-117.1, 31.5),
    (-117.9, 31.9),
    (-118.4, 32.8),
    (-121.0, 33.7),
    (-121.6, 34.2),
    (-123.8, 37.7),
    (-125.4, 40.2),
    (-125.4, 40.5),
];

// =============================================================================
// Errors
// =============================================================================

/// Errors raised while building regions.
#[derive(Debug, Clone, PartialEq)]
pub enum RegionError {
    UnknownRegion { name: String, available: Vec<String> },
    InvalidPolygon { name: String, message: String },
    EmptyGrid { name: String },
    InvalidMagnitudes { message: String },
}

impl fmt::Display for RegionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionError::UnknownRegion { name, available } => write!(
                f,
                "Unknown region '{}' (available: {})",
                name,
                available.join(", ")
            ),
            RegionError::InvalidPolygon { name, message } => {
                write!(f, "Invalid polygon for region '{}': {}", name, message)
            }
            RegionError::EmptyGrid { name } => {
                write!(f, "Region '{}' contains no grid cells", name)
            }
            RegionError::InvalidMagnitudes { message } => {
                write!(f, "Invalid magnitude bins: {}", message)
            }
        }
    }
}

impl std::error::Error for RegionError {}

// =============================================================================
// Spatial grid
// =============================================================================

/// Regular lon/lat grid restricted to the cells whose centers fall inside a
/// polygon.
#[derive(Debug, Clone)]
pub struct CartesianGrid2D {
    name: String,
    dh: f64,
    /// Lower-left (lon, lat) corner of each cell, in cell-index order.
    origins: Vec<(f64, f64)>,
    /// Lattice offset of the bounding box, in units of `dh`.
    ix0: i64,
    iy0: i64,
    nx: usize,
    ny: usize,
    /// Dense bounding-box lattice -> cell index.
    lookup: Vec<Option<usize>>,
}

impl CartesianGrid2D {
    /// Build a grid of `dh`-sized cells covering `vertices`.
    ///
    /// A lattice cell belongs to the grid when its center lies inside the
    /// polygon. Cells are ordered south to north, then west to east.
    pub fn from_polygon(
        name: &str,
        vertices: &[(f64, f64)],
        dh: f64,
    ) -> Result<Self, RegionError> {
        if vertices.len() < 3 {
            return Err(RegionError::InvalidPolygon {
                name: name.to_string(),
                message: format!("need at least 3 vertices, got {}", vertices.len()),
            });
        }
        if !(dh > 0.0) || !dh.is_finite() {
            return Err(RegionError::InvalidPolygon {
                name: name.to_string(),
                message: format!("cell size must be positive, got {}", dh),
            });
        }
        if vertices
            .iter()
            .any(|(lon, lat)| !lon.is_finite() || !lat.is_finite())
        {
            return Err(RegionError::InvalidPolygon {
                name: name.to_string(),
                message: "vertices must be finite".to_string(),
            });
        }

        let (mut min_lon, mut max_lon) = (f64::INFINITY, f64::NEG_INFINITY);
        let (mut min_lat, mut max_lat) = (f64::INFINITY, f64::NEG_INFINITY);
        for &(lon, lat) in vertices {
            min_lon = min_lon.min(lon);
            max_lon = max_lon.max(lon);
            min_lat = min_lat.min(lat);
            max_lat = max_lat.max(lat);
        }

        let ix0 = (min_lon / dh + BIN_TOL).floor() as i64;
        let ix1 = (max_lon / dh - BIN_TOL).ceil() as i64;
        let iy0 = (min_lat / dh + BIN_TOL).floor() as i64;
        let iy1 = (max_lat / dh - BIN_TOL).ceil() as i64;
        let nx = (ix1 - ix0).max(0) as usize;
        let ny = (iy1 - iy0).max(0) as usize;

        let mut origins = Vec::new();
        let mut lookup = vec![None; nx * ny];
        for iy in 0..ny {
            let lat = round_coord((iy0 + iy as i64) as f64 * dh);
            for ix in 0..nx {
                let lon = round_coord((ix0 + ix as i64) as f64 * dh);
                if point_in_polygon(lon + dh / 2.0, lat + dh / 2.0, vertices) {
                    lookup[iy * nx + ix] = Some(origins.len());
                    origins.push((lon, lat));
                }
            }
        }

        if origins.is_empty() {
            return Err(RegionError::EmptyGrid {
                name: name.to_string(),
            });
        }

        Ok(Self {
            name: name.to_string(),
            dh,
            origins,
            ix0,
            iy0,
            nx,
            ny,
            lookup,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cell size in degrees.
    pub fn dh(&self) -> f64 {
        self.dh
    }

    pub fn num_cells(&self) -> usize {
        self.origins.len()
    }

    /// Lower-left corners of the cells, indexed by cell.
    pub fn origins(&self) -> &[(f64, f64)] {
        &self.origins
    }

    /// Index of the cell containing (lon, lat). Cells are closed on their
    /// west and south edges.
    pub fn get_index_of(&self, lon: f64, lat: f64) -> Option<usize> {
        if !lon.is_finite() || !lat.is_finite() {
            return None;
        }
        let gx = (lon / self.dh + BIN_TOL).floor() as i64 - self.ix0;
        let gy = (lat / self.dh + BIN_TOL).floor() as i64 - self.iy0;
        if gx < 0 || gy < 0 || gx as usize >= self.nx || gy as usize >= self.ny {
            return None;
        }
        self.lookup[gy as usize * self.nx + gx as usize]
    }
}

fn round_coord(x: f64) -> f64 {
    (x * 1e6).round() / 1e6
}

/// Even-odd ray casting.
fn point_in_polygon(x: f64, y: f64, vertices: &[(f64, f64)]) -> bool {
    let mut inside = false;
    let mut j = vertices.len() - 1;
    for i in 0..vertices.len() {
        let (xi, yi) = vertices[i];
        let (xj, yj) = vertices[j];
        if (yi > y) != (yj > y) {
            let x_cross = xi + (y - yi) * (xj - xi) / (yj - yi);
            if x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// RELM testing region at 0.1 degree resolution.
pub fn california_relm_region() -> Result<CartesianGrid2D, RegionError> {
    CartesianGrid2D::from_polygon(CALIFORNIA_RELM_REGION, RELM_TESTING_POLYGON, RELM_DH)
}

// =============================================================================
// Magnitude bins
// =============================================================================

/// Number of bins `magnitude_bins` produces for the range, or `None` when
/// the range is degenerate or would need more than [`MAX_MAGNITUDE_BINS`].
pub fn magnitude_bin_count(min_mw: f64, max_mw: f64, dmw: f64) -> Option<usize> {
    if !(dmw > 0.0) || !(max_mw > min_mw) || !min_mw.is_finite() || !max_mw.is_finite() {
        return None;
    }
    let steps = (max_mw - min_mw) / dmw;
    let n = if (steps - steps.round()).abs() < 1e-9 {
        steps.round()
    } else {
        steps.ceil()
    };
    if !n.is_finite() || n > MAX_MAGNITUDE_BINS as f64 {
        return None;
    }
    Some(n as usize)
}

/// Magnitude bin edges `[min_mw, max_mw)` stepped by `dmw`.
///
/// Edges are rounded to ten decimals so that `2.95 + 3 * 0.2` reads back as
/// `3.55`. There is no divisibility check: when `dmw` does not divide the
/// range, the last bin is partial. Inputs rejected by
/// [`magnitude_bin_count`] produce no edges.
pub fn magnitude_bins(min_mw: f64, max_mw: f64, dmw: f64) -> Vec<f64> {
    let Some(n) = magnitude_bin_count(min_mw, max_mw, dmw) else {
        return Vec::new();
    };
    (0..n)
        .map(|i| round_edge(min_mw + i as f64 * dmw))
        .collect()
}

fn round_edge(x: f64) -> f64 {
    (x * 1e10).round() / 1e10
}

// =============================================================================
// Space-magnitude region
// =============================================================================

/// Spatial grid crossed with magnitude bins.
#[derive(Debug, Clone)]
pub struct SpaceMagnitudeRegion {
    grid: CartesianGrid2D,
    magnitudes: Vec<f64>,
}

impl SpaceMagnitudeRegion {
    pub fn new(grid: CartesianGrid2D, magnitudes: Vec<f64>) -> Result<Self, RegionError> {
        if magnitudes.is_empty() {
            return Err(RegionError::InvalidMagnitudes {
                message: "at least one magnitude bin is required".to_string(),
            });
        }
        if magnitudes.windows(2).any(|w| !(w[1] > w[0])) {
            return Err(RegionError::InvalidMagnitudes {
                message: "magnitude edges must be strictly increasing".to_string(),
            });
        }
        Ok(Self { grid, magnitudes })
    }

    pub fn name(&self) -> &str {
        self.grid.name()
    }

    pub fn grid(&self) -> &CartesianGrid2D {
        &self.grid
    }

    /// Lower edges of the magnitude bins.
    pub fn magnitudes(&self) -> &[f64] {
        &self.magnitudes
    }

    pub fn num_cells(&self) -> usize {
        self.grid.num_cells()
    }

    pub fn num_mag_bins(&self) -> usize {
        self.magnitudes.len()
    }

    /// First magnitude edge; the minimum magnitude used for filtering.
    pub fn min_magnitude(&self) -> f64 {
        self.magnitudes[0]
    }

    /// Magnitude bin of `mw`. Values below the first edge have no bin; values
    /// at or above the last edge fall in the last bin.
    pub fn get_magnitude_index(&self, mw: f64) -> Option<usize> {
        if mw.is_nan() || mw < self.magnitudes[0] - BIN_TOL {
            return None;
        }
        let count = self.magnitudes.partition_point(|edge| *edge <= mw + BIN_TOL);
        count.checked_sub(1)
    }

    pub fn get_cell(&self, event: &Event) -> Option<usize> {
        self.grid.get_index_of(event.longitude, event.latitude)
    }

    /// Whether the event's epicenter lies inside the spatial grid.
    pub fn contains(&self, event: &Event) -> bool {
        self.get_cell(event).is_some()
    }

    /// (cell, magnitude bin) of an event, if it falls inside the region.
    pub fn bin_event(&self, event: &Event) -> Option<(usize, usize)> {
        let cell = self.get_cell(event)?;
        let mag = self.get_magnitude_index(event.magnitude)?;
        Some((cell, mag))
    }

    /// Flat offset into a cells x magnitudes array.
    pub fn flat_index(&self, cell: usize, mag: usize) -> usize {
        cell * self.magnitudes.len() + mag
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Pure constructor of a named spatial grid.
pub type RegionConstructor = fn() -> Result<CartesianGrid2D, RegionError>;

/// Identifier -> spatial grid constructor.
#[derive(Debug, Clone, Default)]
pub struct RegionRegistry {
    entries: BTreeMap<String, RegionConstructor>,
}

impl RegionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in presets.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(CALIFORNIA_RELM_REGION, california_relm_region);
        registry
    }

    /// Register (or replace) a spatial preset.
    pub fn register(&mut self, name: &str, constructor: RegionConstructor) -> &mut Self {
        self.entries.insert(name.to_string(), constructor);
        self
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Build the spatial grid registered under `name`.
    pub fn grid(&self, name: &str) -> Result<CartesianGrid2D, RegionError> {
        let constructor = self
            .entries
            .get(name)
            .ok_or_else(|| RegionError::UnknownRegion {
                name: name.to_string(),
                available: self.names(),
            })?;
        constructor()
    }

    /// Cross the named spatial grid with `magnitude_bins(min_mw, max_mw, dmw)`.
    pub fn create_space_magnitude_region(
        &self,
        name: &str,
        min_mw: f64,
        max_mw: f64,
        dmw: f64,
    ) -> Result<SpaceMagnitudeRegion, RegionError> {
        let grid = self.grid(name)?;
        SpaceMagnitudeRegion::new(grid, magnitude_bins(min_mw, max_mw, dmw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_square() -> Vec<(f64, f64)> {
        vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)]
    }

    fn event_at(lon: f64, lat: f64, mw: f64) -> Event {
        Event {
            event_id: None,
            origin_time: 0,
            latitude: lat,
            longitude: lon,
            depth: 10.0,
            magnitude: mw,
        }
    }

    #[test]
    fn test_magnitude_bins_relm_defaults() {
        let bins = magnitude_bins(2.5, 8.0, 0.1);
        assert_eq!(bins.len(), 55);
        assert_eq!(bins[0], 2.5);
        assert_eq!(bins[1], 2.6);
        assert_eq!(bins[54], 7.9);
    }

    #[test]
    fn test_magnitude_bins_partial_trailing_bin() {
        let bins = magnitude_bins(2.95, 8.0, 0.2);
        assert_eq!(bins.len(), 26);
        assert_eq!(bins[3], 3.55);
        assert_eq!(*bins.last().unwrap(), 7.95);
    }

    #[test]
    fn test_magnitude_bins_degenerate() {
        assert!(magnitude_bins(3.0, 3.0, 0.1).is_empty());
        assert!(magnitude_bins(3.0, 4.0, 0.0).is_empty());
        assert!(magnitude_bins(4.0, 3.0, 0.1).is_empty());
        assert!(magnitude_bins(2.5, 8.0, 1e-20).is_empty());
        assert!(magnitude_bins(2.5, 8.0, f64::MIN_POSITIVE).is_empty());
        assert_eq!(magnitude_bins(0.0, 1.0, 1e-4).len(), MAX_MAGNITUDE_BINS);
        assert_eq!(magnitude_bin_count(0.0, 1.0, 0.99e-4), None);
        assert_eq!(magnitude_bin_count(2.5, 8.0, 0.1), Some(55));
    }

    #[test]
    fn test_unit_square_grid() {
        let grid = CartesianGrid2D::from_polygon("box", &unit_square(), 0.1).unwrap();
        assert_eq!(grid.num_cells(), 100);
        assert_eq!(grid.origins()[0], (0.0, 0.0));
        assert_eq!(grid.get_index_of(0.05, 0.05), Some(0));
        assert_eq!(grid.get_index_of(0.15, 0.05), Some(1));
        assert_eq!(grid.get_index_of(0.05, 0.15), Some(10));
        // West/south edges are closed.
        assert_eq!(grid.get_index_of(0.1, 0.0), Some(1));
        assert_eq!(grid.get_index_of(1.0, 0.5), None);
        assert_eq!(grid.get_index_of(-0.01, 0.5), None);
        assert_eq!(grid.get_index_of(f64::NAN, 0.5), None);
    }

    #[test]
    fn test_polygon_validation() {
        let err = CartesianGrid2D::from_polygon("line", &[(0.0, 0.0), (1.0, 1.0)], 0.1);
        assert!(matches!(err, Err(RegionError::InvalidPolygon { .. })));
        let err = CartesianGrid2D::from_polygon("box", &unit_square(), 0.0);
        assert!(matches!(err, Err(RegionError::InvalidPolygon { .. })));
    }

    #[test]
    fn test_relm_region_membership() {
        let grid = california_relm_region().unwrap();
        // Five cell centers sit on polygon edges; three of them land inside.
        assert_eq!(grid.num_cells(), 7683);
        assert_eq!(grid.origins()[0].1, 31.5);
        assert!(grid.get_index_of(-116.45, 31.55).is_some());
        assert!(grid.get_index_of(-118.15, 32.35).is_some());
        assert!(grid.get_index_of(-113.55, 32.55).is_none());
        // Los Angeles, San Francisco
        assert!(grid.get_index_of(-118.25, 34.05).is_some());
        assert!(grid.get_index_of(-122.42, 37.77).is_some());
        // Far offshore, New York
        assert!(grid.get_index_of(-127.0, 35.0).is_none());
        assert!(grid.get_index_of(-74.0, 40.7).is_none());
    }

    #[test]
    fn test_magnitude_index_is_right_continuous() {
        let grid = CartesianGrid2D::from_polygon("box", &unit_square(), 0.5).unwrap();
        let region = SpaceMagnitudeRegion::new(grid, magnitude_bins(2.5, 4.0, 0.5)).unwrap();
        assert_eq!(region.magnitudes(), &[2.5, 3.0, 3.5]);
        assert_eq!(region.get_magnitude_index(2.4), None);
        assert_eq!(region.get_magnitude_index(2.5), Some(0));
        assert_eq!(region.get_magnitude_index(2.99), Some(0));
        assert_eq!(region.get_magnitude_index(3.0), Some(1));
        assert_eq!(region.get_magnitude_index(7.2), Some(2));
        assert_eq!(region.get_magnitude_index(f64::NAN), None);
    }

    #[test]
    fn test_bin_event() {
        let grid = CartesianGrid2D::from_polygon("box", &unit_square(), 0.5).unwrap();
        let region = SpaceMagnitudeRegion::new(grid, magnitude_bins(2.5, 4.0, 0.5)).unwrap();
        assert_eq!(region.num_cells(), 4);
        assert_eq!(region.bin_event(&event_at(0.75, 0.25, 3.2)), Some((1, 1)));
        assert_eq!(region.flat_index(1, 1), 4);
        assert_eq!(region.bin_event(&event_at(1.75, 0.25, 3.2)), None);
        assert!(!region.contains(&event_at(1.75, 0.25, 3.2)));
    }

    #[test]
    fn test_registry_resolves_defaults() {
        let registry = RegionRegistry::with_defaults();
        assert_eq!(registry.names(), vec![CALIFORNIA_RELM_REGION.to_string()]);
        let region = registry
            .create_space_magnitude_region(CALIFORNIA_RELM_REGION, 2.5, 8.0, 0.1)
            .unwrap();
        assert_eq!(region.num_mag_bins(), 55);
        assert_eq!(region.min_magnitude(), 2.5);
    }

    #[test]
    fn test_registry_unknown_region() {
        let registry = RegionRegistry::with_defaults();
        let err = registry
            .create_space_magnitude_region("atlantis", 2.5, 8.0, 0.1)
            .unwrap_err();
        assert!(matches!(err, RegionError::UnknownRegion { .. }));
        assert!(err.to_string().contains("california_relm_region"));
    }

    #[test]
    fn test_registry_custom_entry() {
        fn tiny() -> Result<CartesianGrid2D, RegionError> {
            CartesianGrid2D::from_polygon(
                "tiny",
                &[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)],
                0.5,
            )
        }
        let mut registry = RegionRegistry::new();
        registry.register("tiny", tiny);
        let region = registry
            .create_space_magnitude_region("tiny", 3.0, 4.0, 0.5)
            .unwrap();
        assert_eq!(region.num_cells(), 4);
        assert_eq!(region.name(), "tiny");
    }

    #[test]
    fn test_empty_magnitudes_rejected() {
        let registry = RegionRegistry::with_defaults();
        let err = registry
            .create_space_magnitude_region(CALIFORNIA_RELM_REGION, 3.0, 3.0, 0.1)
            .unwrap_err();
        assert!(matches!(err, RegionError::InvalidMagnitudes { .. }));

        let err = registry
            .create_space_magnitude_region(CALIFORNIA_RELM_REGION, 2.5, 8.0, 1e-20)
            .unwrap_err();
        assert!(matches!(err, RegionError::InvalidMagnitudes { .. }));
    }
}
