// src/evaluations.rs
//
// Catalog-based consistency tests of a stochastic forecast against an
// observed catalog:
// - number_test:    simulated event counts vs observed count
// - magnitude_test: simulated magnitude histograms vs observed histogram
// - spatial_test:   normalized spatial pseudo-likelihood
// - number_test_multiple_mag: number test at several magnitude cutoffs from a
//   single binning pass
//
// Every test returns an EvaluationResult whose JSON form is the on-disk
// result record.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::forecast::{CatalogForecast, ExpectedRates};

pub const NUMBER_TEST_NAME: &str = "Catalog N-Test";
pub const MAGNITUDE_TEST_NAME: &str = "M-Test";
pub const SPATIAL_TEST_NAME: &str = "S-Test";

/// Magnitude thresholds of the multi-magnitude number test.
pub const DEFAULT_MULTI_MAG_THRESHOLDS: [f64; 6] = [2.6, 3.0, 3.5, 4.0, 4.5, 5.0];

const EDGE_TOL: f64 = 1e-9;

/// Evaluation status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestStatus {
    #[serde(rename = "normal")]
    Normal,
    /// Observed events fell in cells the forecast never populated.
    #[serde(rename = "undersampled")]
    Undersampled,
    #[serde(rename = "not-valid")]
    NotValid,
}

/// Result record type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultKind {
    CatalogNumberTestResult,
    CatalogMagnitudeTestResult,
    CatalogSpatialTestResult,
}

/// Quantile score: two-sided pair for the number test, single otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Quantile {
    Pair(f64, f64),
    Single(f64),
}

/// Outcome of one consistency test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub name: String,
    pub sim_name: String,
    pub obs_name: String,
    pub obs_catalog_repr: String,
    pub quantile: Option<Quantile>,
    pub observed_statistic: Option<f64>,
    pub test_distribution: Vec<f64>,
    pub status: TestStatus,
    pub min_mw: f64,
    #[serde(rename = "type")]
    pub kind: ResultKind,
}

impl EvaluationResult {
    fn new(
        kind: ResultKind,
        name: &str,
        forecast: &CatalogForecast,
        observed: &Catalog,
        min_mw: f64,
    ) -> Self {
        Self {
            name: name.to_string(),
            sim_name: forecast.name().to_string(),
            obs_name: observed.name().to_string(),
            obs_catalog_repr: observed.summary(),
            quantile: None,
            observed_statistic: None,
            test_distribution: Vec::new(),
            status: TestStatus::Normal,
            min_mw,
            kind,
        }
    }
}

/// Empirical quantiles of `obs` within `dist`: (P(X >= obs), P(X <= obs)).
/// An empty distribution yields (NaN, NaN).
pub fn get_quantiles(dist: &[f64], obs: f64) -> (f64, f64) {
    if dist.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    let n = dist.len() as f64;
    let ge = dist.iter().filter(|&&x| x >= obs).count() as f64;
    let le = dist.iter().filter(|&&x| x <= obs).count() as f64;
    (ge / n, le / n)
}

fn rates_of(forecast: &CatalogForecast) -> Cow<'_, ExpectedRates> {
    match forecast.expected_rates() {
        Some(rates) => Cow::Borrowed(rates),
        None => Cow::Owned(ExpectedRates::from_catalogs(
            forecast.region(),
            forecast.catalogs(),
        )),
    }
}

/// Number test: distribution of simulated event counts against the observed
/// count; quantile is the (δ1, δ2) pair.
pub fn number_test(forecast: &CatalogForecast, observed: &Catalog) -> EvaluationResult {
    let dist: Vec<f64> = forecast
        .catalogs()
        .iter()
        .map(|c| c.event_count() as f64)
        .collect();
    let obs = observed.event_count() as f64;
    let (delta_1, delta_2) = get_quantiles(&dist, obs);
    info!(
        observed = obs,
        delta_1, delta_2, "Number test over {} catalogs", dist.len()
    );

    let mut result = EvaluationResult::new(
        ResultKind::CatalogNumberTestResult,
        NUMBER_TEST_NAME,
        forecast,
        observed,
        forecast.min_magnitude(),
    );
    result.test_distribution = dist;
    result.observed_statistic = Some(obs);
    result.quantile = Some(Quantile::Pair(delta_1, delta_2));
    result
}

fn log_histogram_distance(hist: &[f64], reference: &[f64]) -> f64 {
    hist.iter()
        .zip(reference)
        .map(|(h, r)| {
            let d = (h + 1.0).log10() - (r + 1.0).log10();
            d * d
        })
        .sum()
}

fn to_f64(counts: &[u64]) -> Vec<f64> {
    counts.iter().map(|&c| c as f64).collect()
}

/// Magnitude test: sum of squared log-histogram differences to the
/// ensemble's union histogram, all scaled to the observed count.
/// Quantile is δ1 = P(D >= D_obs).
pub fn magnitude_test(forecast: &CatalogForecast, observed: &Catalog) -> EvaluationResult {
    let region = forecast.region();
    let mut result = EvaluationResult::new(
        ResultKind::CatalogMagnitudeTestResult,
        MAGNITUDE_TEST_NAME,
        forecast,
        observed,
        forecast.min_magnitude(),
    );

    if observed.event_count() == 0 {
        warn!("Cannot perform magnitude test when observed event count is zero.");
        result.status = TestStatus::NotValid;
        return result;
    }

    let histograms: Vec<Vec<f64>> = forecast
        .catalogs()
        .iter()
        .map(|c| to_f64(&c.magnitude_counts(region)))
        .collect();

    let mut union = vec![0.0; region.num_mag_bins()];
    for hist in &histograms {
        for (acc, v) in union.iter_mut().zip(hist) {
            *acc += v;
        }
    }
    let union_total: f64 = union.iter().sum();
    if union_total == 0.0 {
        warn!("Cannot perform magnitude test when the forecast contains no events.");
        result.status = TestStatus::NotValid;
        return result;
    }

    let obs_hist = to_f64(&observed.magnitude_counts(region));
    let n_obs: f64 = obs_hist.iter().sum();
    let scaled_union: Vec<f64> = union.iter().map(|u| u * n_obs / union_total).collect();

    let mut dist = Vec::with_capacity(histograms.len());
    for hist in &histograms {
        let n_cat: f64 = hist.iter().sum();
        if n_cat == 0.0 {
            continue;
        }
        let scaled: Vec<f64> = hist.iter().map(|h| h * n_obs / n_cat).collect();
        dist.push(log_histogram_distance(&scaled, &scaled_union));
    }

    let d_obs = log_histogram_distance(&obs_hist, &scaled_union);
    let (delta_1, _) = get_quantiles(&dist, d_obs);
    info!(
        observed = d_obs,
        delta_1,
        skipped = histograms.len() - dist.len(),
        "Magnitude test"
    );

    result.test_distribution = dist;
    result.observed_statistic = Some(d_obs);
    result.quantile = Some(Quantile::Single(delta_1));
    result
}

/// Mean log of the normalized spatial rate at the cells of the given events.
/// Events in zero-rate cells either contribute -inf or, when
/// `skip_zero_rate`, are dropped. No events yields NaN.
fn normalized_pseudo_likelihood(
    cells: impl Iterator<Item = usize>,
    spatial_rates: &[f64],
    total_rate: f64,
    skip_zero_rate: bool,
) -> f64 {
    let mut n = 0u64;
    let mut acc = 0.0;
    for cell in cells {
        let rate = spatial_rates[cell];
        if skip_zero_rate && rate == 0.0 {
            continue;
        }
        acc += (rate / total_rate).ln();
        n += 1;
    }
    if n == 0 {
        f64::NAN
    } else {
        acc / n as f64
    }
}

/// Spatial test: normalized pseudo-likelihood of each simulated catalog and
/// of the observation under the ensemble-mean spatial rates.
/// Quantile is δ2 = P(L <= L_obs).
pub fn spatial_test(forecast: &CatalogForecast, observed: &Catalog) -> EvaluationResult {
    let region = forecast.region();
    let rates = rates_of(forecast);
    let spatial_rates = rates.spatial_counts();
    let total_rate: f64 = spatial_rates.iter().sum();

    let mut dist: Vec<f64> = forecast
        .catalogs()
        .iter()
        .map(|c| {
            normalized_pseudo_likelihood(
                c.events().iter().filter_map(|e| region.get_cell(e)),
                &spatial_rates,
                total_rate,
                false,
            )
        })
        .collect();

    let obs_cells: Vec<usize> = observed
        .events()
        .iter()
        .filter_map(|e| region.get_cell(e))
        .collect();
    let n_obs = obs_cells.len();

    let mut status = TestStatus::Normal;
    let mut obs_lh = normalized_pseudo_likelihood(
        obs_cells.iter().copied(),
        &spatial_rates,
        total_rate,
        false,
    );
    if obs_lh == f64::NEG_INFINITY {
        let retained = obs_cells
            .iter()
            .filter(|&&c| spatial_rates[c] != 0.0)
            .count();
        warn!(
            "Found -inf as the observed likelihood score. Assuming event(s) occurred in \
             undersampled region of forecast. Recomputing with {} events after removing {} events.",
            retained,
            n_obs - retained
        );
        obs_lh = normalized_pseudo_likelihood(
            obs_cells.iter().copied(),
            &spatial_rates,
            total_rate,
            true,
        );
        status = TestStatus::Undersampled;
    }

    let before = dist.len();
    dist.retain(|v| !v.is_nan());
    if dist.len() != before {
        debug!("Dropped {} NaN scores from spatial distribution", before - dist.len());
    }

    let quantile = if n_obs == 0 || obs_lh.is_nan() {
        status = TestStatus::NotValid;
        -1.0
    } else {
        get_quantiles(&dist, obs_lh).1
    };
    info!(observed = obs_lh, delta_2 = quantile, ?status, "Spatial test");

    let mut result = EvaluationResult::new(
        ResultKind::CatalogSpatialTestResult,
        SPATIAL_TEST_NAME,
        forecast,
        observed,
        forecast.min_magnitude(),
    );
    result.test_distribution = dist;
    result.observed_statistic = Some(obs_lh);
    result.quantile = Some(Quantile::Single(quantile));
    result.status = status;
    result
}

/// Number test at several minimum magnitudes.
///
/// Each catalog is binned once; the count above a threshold is the sum over
/// magnitude bins whose lower edge is at or above it. Thresholds between
/// edges therefore round up to the next edge.
pub fn number_test_multiple_mag(
    forecast: &CatalogForecast,
    observed: &Catalog,
    thresholds: &[f64],
) -> Vec<EvaluationResult> {
    let region = forecast.region();
    let masks: Vec<Vec<bool>> = thresholds
        .iter()
        .map(|&t| {
            region
                .magnitudes()
                .iter()
                .map(|&edge| edge >= t - EDGE_TOL)
                .collect()
        })
        .collect();
    let count_above = |hist: &[u64], mask: &[bool]| -> f64 {
        hist.iter()
            .zip(mask)
            .filter(|(_, &keep)| keep)
            .map(|(&c, _)| c as f64)
            .sum()
    };

    // catalogs x thresholds
    let per_catalog: Vec<Vec<f64>> = forecast
        .catalogs()
        .iter()
        .map(|c| {
            let hist = c.magnitude_counts(region);
            masks.iter().map(|m| count_above(&hist, m)).collect()
        })
        .collect();
    let obs_hist = observed.magnitude_counts(region);

    thresholds
        .iter()
        .enumerate()
        .map(|(idx, &threshold)| {
            let dist: Vec<f64> = per_catalog.iter().map(|row| row[idx]).collect();
            let obs = count_above(&obs_hist, &masks[idx]);
            let (delta_1, delta_2) = get_quantiles(&dist, obs);
            debug!(threshold, observed = obs, delta_1, delta_2, "Multi-magnitude number test");

            let mut result = EvaluationResult::new(
                ResultKind::CatalogNumberTestResult,
                NUMBER_TEST_NAME,
                forecast,
                observed,
                threshold,
            );
            result.test_distribution = dist;
            result.observed_statistic = Some(obs);
            result.quantile = Some(Quantile::Pair(delta_1, delta_2));
            result
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Event, FilterSet};
    use crate::region::{magnitude_bins, CartesianGrid2D, SpaceMagnitudeRegion};

    fn region() -> SpaceMagnitudeRegion {
        let grid = CartesianGrid2D::from_polygon(
            "box",
            &[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)],
            0.5,
        )
        .unwrap();
        SpaceMagnitudeRegion::new(grid, magnitude_bins(2.5, 4.0, 0.5)).unwrap()
    }

    fn ev(lon: f64, lat: f64, mw: f64) -> Event {
        Event {
            event_id: None,
            origin_time: 0,
            latitude: lat,
            longitude: lon,
            depth: 5.0,
            magnitude: mw,
        }
    }

    fn forecast(catalogs: Vec<Vec<Event>>) -> CatalogForecast {
        let catalogs = catalogs
            .into_iter()
            .enumerate()
            .map(|(i, events)| Catalog::new(format!("sim-{i}"), events))
            .collect();
        CatalogForecast::from_catalogs("ucerf3-test", region(), FilterSet::default(), catalogs)
    }

    #[test]
    fn test_get_quantiles() {
        let dist = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(get_quantiles(&dist, 2.0), (0.75, 0.5));
        assert_eq!(get_quantiles(&dist, 0.0), (1.0, 0.0));
        assert_eq!(get_quantiles(&dist, 9.0), (0.0, 1.0));
        let (a, b) = get_quantiles(&[], 1.0);
        assert!(a.is_nan() && b.is_nan());
    }

    #[test]
    fn test_number_test() {
        let f = forecast(vec![
            vec![ev(0.25, 0.25, 3.0)],
            vec![ev(0.25, 0.25, 3.0), ev(0.75, 0.25, 2.6)],
            vec![],
            vec![ev(0.25, 0.25, 3.0), ev(0.25, 0.75, 2.6), ev(0.75, 0.75, 3.9)],
        ]);
        let obs = Catalog::new("comcat", vec![ev(0.25, 0.25, 3.0), ev(0.75, 0.75, 2.9)]);
        let result = number_test(&f, &obs);
        assert_eq!(result.name, NUMBER_TEST_NAME);
        assert_eq!(result.kind, ResultKind::CatalogNumberTestResult);
        assert_eq!(result.test_distribution, vec![1.0, 2.0, 0.0, 3.0]);
        assert_eq!(result.observed_statistic, Some(2.0));
        assert_eq!(result.quantile, Some(Quantile::Pair(0.5, 0.75)));
        assert_eq!(result.sim_name, "ucerf3-test");
        assert_eq!(result.obs_name, "comcat");
        assert_eq!(result.min_mw, 2.5);
        assert!(result.obs_catalog_repr.contains("Event Count: 2"));
    }

    #[test]
    fn test_magnitude_test_identical_shapes_score_zero() {
        let f = forecast(vec![
            vec![ev(0.25, 0.25, 2.6), ev(0.25, 0.25, 3.1)],
            vec![ev(0.25, 0.25, 2.7), ev(0.25, 0.25, 3.2)],
            vec![],
        ]);
        let obs = Catalog::new("comcat", vec![ev(0.25, 0.25, 2.9), ev(0.75, 0.75, 3.4)]);
        let result = magnitude_test(&f, &obs);
        assert_eq!(result.status, TestStatus::Normal);
        // The empty catalog is skipped.
        assert_eq!(result.test_distribution.len(), 2);
        assert!(result.test_distribution.iter().all(|d| d.abs() < 1e-12));
        assert!(result.observed_statistic.unwrap().abs() < 1e-12);
        assert_eq!(result.quantile, Some(Quantile::Single(1.0)));
    }

    #[test]
    fn test_magnitude_test_detects_shifted_distribution() {
        let f = forecast(vec![
            vec![ev(0.25, 0.25, 2.6), ev(0.25, 0.25, 2.6), ev(0.25, 0.25, 3.1)],
            vec![ev(0.25, 0.25, 2.7), ev(0.25, 0.25, 2.8), ev(0.25, 0.25, 3.2)],
        ]);
        let obs = Catalog::new(
            "comcat",
            vec![ev(0.25, 0.25, 3.8), ev(0.25, 0.25, 3.9), ev(0.25, 0.25, 3.7)],
        );
        let result = magnitude_test(&f, &obs);
        let d_obs = result.observed_statistic.unwrap();
        assert!(result.test_distribution.iter().all(|&d| d < d_obs));
        assert_eq!(result.quantile, Some(Quantile::Single(0.0)));
    }

    #[test]
    fn test_magnitude_test_without_observations() {
        let f = forecast(vec![vec![ev(0.25, 0.25, 2.6)]]);
        let obs = Catalog::new("comcat", vec![]);
        let result = magnitude_test(&f, &obs);
        assert_eq!(result.status, TestStatus::NotValid);
        assert_eq!(result.observed_statistic, None);
        assert_eq!(result.quantile, None);
        assert!(result.test_distribution.is_empty());
    }

    #[test]
    fn test_spatial_test_normal() {
        let f = forecast(vec![
            vec![ev(0.25, 0.25, 2.6), ev(0.75, 0.25, 2.6)],
            vec![ev(0.75, 0.25, 2.6), ev(0.25, 0.25, 2.6)],
            vec![],
        ]);
        let obs = Catalog::new("comcat", vec![ev(0.25, 0.25, 3.0)]);
        let result = spatial_test(&f, &obs);
        assert_eq!(result.status, TestStatus::Normal);
        // Empty catalog scores NaN and is dropped.
        assert_eq!(result.test_distribution.len(), 2);
        // Both cells carry half the rate.
        let expected = 0.5f64.ln();
        assert!((result.observed_statistic.unwrap() - expected).abs() < 1e-12);
        for score in &result.test_distribution {
            assert!((score - expected).abs() < 1e-12);
        }
        assert_eq!(result.quantile, Some(Quantile::Single(1.0)));
    }

    #[test]
    fn test_spatial_test_undersampled() {
        let f = forecast(vec![
            vec![ev(0.25, 0.25, 2.6)],
            vec![ev(0.25, 0.25, 2.6), ev(0.75, 0.25, 2.6), ev(0.75, 0.25, 2.6)],
        ]);
        // One event lands in a cell without forecast rate.
        let obs = Catalog::new("comcat", vec![ev(0.25, 0.25, 3.0), ev(0.25, 0.75, 3.0)]);
        let result = spatial_test(&f, &obs);
        assert_eq!(result.status, TestStatus::Undersampled);
        let expected = 0.5f64.ln();
        assert!((result.observed_statistic.unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_spatial_test_without_observations() {
        let f = forecast(vec![vec![ev(0.25, 0.25, 2.6)]]);
        let obs = Catalog::new("comcat", vec![]);
        let result = spatial_test(&f, &obs);
        assert_eq!(result.status, TestStatus::NotValid);
        assert_eq!(result.quantile, Some(Quantile::Single(-1.0)));
    }

    #[test]
    fn test_spatial_test_uses_cached_rates() {
        let mut f = forecast(vec![vec![ev(0.25, 0.25, 2.6), ev(0.75, 0.75, 2.6)]]);
        let obs = Catalog::new("comcat", vec![ev(0.75, 0.75, 3.0)]);
        let uncached = spatial_test(&f, &obs);
        f.get_expected_rates();
        let cached = spatial_test(&f, &obs);
        assert_eq!(uncached, cached);
    }

    #[test]
    fn test_number_test_multiple_mag() {
        let f = forecast(vec![
            vec![ev(0.25, 0.25, 2.6), ev(0.25, 0.25, 3.1), ev(0.25, 0.25, 3.7)],
            vec![ev(0.25, 0.25, 3.6)],
        ]);
        let obs = Catalog::new("comcat", vec![ev(0.25, 0.25, 3.05), ev(0.25, 0.25, 2.7)]);
        let results = number_test_multiple_mag(&f, &obs, &[2.5, 3.0, 3.5]);
        assert_eq!(results.len(), 3);

        assert_eq!(results[0].test_distribution, vec![3.0, 1.0]);
        assert_eq!(results[0].observed_statistic, Some(2.0));
        assert_eq!(results[0].min_mw, 2.5);

        assert_eq!(results[1].test_distribution, vec![2.0, 1.0]);
        assert_eq!(results[1].observed_statistic, Some(1.0));
        assert_eq!(results[1].min_mw, 3.0);

        assert_eq!(results[2].test_distribution, vec![1.0, 1.0]);
        assert_eq!(results[2].observed_statistic, Some(0.0));
        assert_eq!(results[2].quantile, Some(Quantile::Pair(1.0, 0.0)));
    }

    #[test]
    fn test_result_json_shape() {
        let f = forecast(vec![vec![ev(0.25, 0.25, 2.6)]]);
        let obs = Catalog::new("comcat", vec![ev(0.25, 0.25, 2.6)]);
        let value = serde_json::to_value(number_test(&f, &obs)).unwrap();
        assert_eq!(value["type"], "CatalogNumberTestResult");
        assert_eq!(value["status"], "normal");
        assert_eq!(value["quantile"], serde_json::json!([1.0, 1.0]));
        assert_eq!(value["test_distribution"], serde_json::json!([1.0]));

        let empty = Catalog::new("comcat", vec![]);
        let value = serde_json::to_value(spatial_test(&f, &empty)).unwrap();
        assert_eq!(value["status"], "not-valid");
        assert_eq!(value["quantile"], serde_json::json!(-1.0));
    }
}
