// src/forecast.rs
//
// Catalog-based forecasts: an ensemble of simulated catalogs over one
// space-magnitude region, loaded with the evaluation filters applied.

use std::fmt;
use std::io;
use std::path::Path;

use tracing::{debug, info};

use crate::catalog::{Catalog, FilterSet, Ucerf3Reader};
use crate::region::SpaceMagnitudeRegion;

/// Errors raised while loading a forecast.
#[derive(Debug)]
pub enum ForecastError {
    Io { path: String, source: io::Error },
    InvalidHeader { message: String },
    Truncated { catalog: usize, detail: String },
    UnsupportedVersion { catalog: usize, version: i16 },
    Empty { path: String },
}

impl fmt::Display for ForecastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForecastError::Io { path, source } => {
                write!(f, "Failed to open forecast '{}': {}", path, source)
            }
            ForecastError::InvalidHeader { message } => {
                write!(f, "Invalid forecast header: {}", message)
            }
            ForecastError::Truncated { catalog, detail } => {
                write!(f, "Forecast truncated in catalog {}: {}", catalog, detail)
            }
            ForecastError::UnsupportedVersion { catalog, version } => write!(
                f,
                "Unsupported record version {} in catalog {}",
                version, catalog
            ),
            ForecastError::Empty { path } => {
                write!(f, "Forecast '{}' contains no catalogs", path)
            }
        }
    }
}

impl std::error::Error for ForecastError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ForecastError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Mean space-magnitude event counts over the catalogs of a forecast.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpectedRates {
    n_cells: usize,
    n_mags: usize,
    /// cells x magnitudes, row-major by cell.
    data: Vec<f64>,
}

impl ExpectedRates {
    /// Average the binned counts of `catalogs` over `region`.
    pub fn from_catalogs(region: &SpaceMagnitudeRegion, catalogs: &[Catalog]) -> Self {
        let n_cells = region.num_cells();
        let n_mags = region.num_mag_bins();
        let mut data = vec![0.0; n_cells * n_mags];
        for catalog in catalogs {
            for (cell, mag) in catalog.events().iter().filter_map(|e| region.bin_event(e)) {
                data[region.flat_index(cell, mag)] += 1.0;
            }
        }
        if !catalogs.is_empty() {
            let n = catalogs.len() as f64;
            data.iter_mut().for_each(|v| *v /= n);
        }
        Self {
            n_cells,
            n_mags,
            data,
        }
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn n_cells(&self) -> usize {
        self.n_cells
    }

    pub fn n_mags(&self) -> usize {
        self.n_mags
    }

    /// Expected number of events over the whole region.
    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }

    /// Expected events per spatial cell (summed over magnitudes).
    pub fn spatial_counts(&self) -> Vec<f64> {
        if self.n_mags == 0 {
            return vec![0.0; self.n_cells];
        }
        self.data
            .chunks(self.n_mags)
            .map(|row| row.iter().sum())
            .collect()
    }

    /// Expected events per magnitude bin (summed over cells).
    pub fn magnitude_counts(&self) -> Vec<f64> {
        let mut counts = vec![0.0; self.n_mags];
        if self.n_mags == 0 {
            return counts;
        }
        for row in self.data.chunks(self.n_mags) {
            for (acc, v) in counts.iter_mut().zip(row) {
                *acc += v;
            }
        }
        counts
    }
}

/// Ensemble of simulated catalogs sharing one region and filter set.
#[derive(Debug, Clone)]
pub struct CatalogForecast {
    name: String,
    region: SpaceMagnitudeRegion,
    filters: FilterSet,
    catalogs: Vec<Catalog>,
    expected_rates: Option<ExpectedRates>,
}

impl CatalogForecast {
    /// Build a forecast from catalogs that already satisfy `filters`.
    pub fn from_catalogs(
        name: impl Into<String>,
        region: SpaceMagnitudeRegion,
        filters: FilterSet,
        catalogs: Vec<Catalog>,
    ) -> Self {
        Self {
            name: name.into(),
            region,
            filters,
            catalogs,
            expected_rates: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn region(&self) -> &SpaceMagnitudeRegion {
        &self.region
    }

    pub fn filters(&self) -> &FilterSet {
        &self.filters
    }

    pub fn catalogs(&self) -> &[Catalog] {
        &self.catalogs
    }

    /// Number of simulated catalogs, including empty ones.
    pub fn n_cat(&self) -> usize {
        self.catalogs.len()
    }

    pub fn min_magnitude(&self) -> f64 {
        self.region.min_magnitude()
    }

    /// Compute (once) and return the expected space-magnitude rates.
    pub fn get_expected_rates(&mut self) -> &ExpectedRates {
        let region = &self.region;
        let catalogs = &self.catalogs;
        self.expected_rates
            .get_or_insert_with(|| ExpectedRates::from_catalogs(region, catalogs))
    }

    /// Expected rates, if already computed.
    pub fn expected_rates(&self) -> Option<&ExpectedRates> {
        self.expected_rates.as_ref()
    }
}

/// Load a UCERF3-ETAS forecast, keeping only events that pass `filters` and
/// fall inside `region`. Catalogs emptied by filtering are kept so that the
/// ensemble size is unchanged.
pub fn load_catalog_forecast(
    path: &Path,
    name: &str,
    region: SpaceMagnitudeRegion,
    filters: FilterSet,
) -> Result<CatalogForecast, ForecastError> {
    let reader = Ucerf3Reader::open(path)?;
    let declared = reader.num_catalogs();
    info!(path = %path.display(), catalogs = declared, "Loading forecast '{}'", name);

    // The header count is untrusted until the catalogs are actually read.
    let mut catalogs = Vec::with_capacity(declared.min(1 << 16));
    let mut total_events = 0usize;
    for (idx, events) in reader.enumerate() {
        let kept: Vec<_> = events?
            .into_iter()
            .filter(|e| filters.matches(e) && region.contains(e))
            .collect();
        total_events += kept.len();
        catalogs.push(Catalog::new(format!("{}-{}", name, idx), kept));
        if (idx + 1) % 10_000 == 0 {
            debug!("Loaded {} of {} catalogs", idx + 1, declared);
        }
    }

    if catalogs.is_empty() {
        return Err(ForecastError::Empty {
            path: path.display().to_string(),
        });
    }

    info!(
        catalogs = catalogs.len(),
        events = total_events,
        "Filtered forecast with [{}]",
        filters.to_strings().join(", ")
    );
    Ok(CatalogForecast::from_catalogs(name, region, filters, catalogs))
}
