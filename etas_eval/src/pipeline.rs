// src/pipeline.rs
//
// One evaluation job, start to finish:
//   a. manifest entry -> simulation directory -> forecast file
//   b. config.json startTimeMillis -> [start, start + duration)
//   c. space-magnitude region, minimum magnitude
//   d. shared filter set
//   e. forecast + expected rates
//   f. observed catalog
//   g. N/M/S tests (and optional multi-magnitude N tests), each written on
//      its own
//   h. meta.json
//
// Nothing here exits the process; the binary maps outcomes and errors to exit
// codes.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::info;

use crate::catalog::{load_catalog, CatalogError, FilterSet};
use crate::config::{ConfigError, RunConfig, SimulationConfig};
use crate::evaluations::{
    magnitude_test, number_test, number_test_multiple_mag, spatial_test, EvaluationResult,
};
use crate::forecast::{load_catalog_forecast, ForecastError};
use crate::manifest::{get_forecast_filepath, ManifestError, ManifestLookup};
use crate::output::{
    compute_checksum, multi_mag_ntest_suffix, DeterminismInfo, ResultWriter, RunDerived,
    RunMetadata, META_SUFFIX, MTEST_SUFFIX, NTEST_SUFFIX, SPATIAL_COUNTS_SUFFIX, STEST_SUFFIX,
};
use crate::paths::{locate_forecast, sim_basename, LocateError};
use crate::region::{RegionError, RegionRegistry};

/// Exit status when no forecast file exists in the simulation directory.
pub const EXIT_NO_FORECAST: i32 = 255;
/// Exit status for every other fatal error.
pub const EXIT_FAILURE: i32 = 1;

#[derive(Debug)]
pub enum PipelineError {
    Manifest(ManifestError),
    ForecastNotFound(LocateError),
    Config(ConfigError),
    Region(RegionError),
    Forecast(ForecastError),
    Catalog(CatalogError),
    Io { path: String, source: io::Error },
}

impl PipelineError {
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::ForecastNotFound(_) => EXIT_NO_FORECAST,
            _ => EXIT_FAILURE,
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Manifest(e) => write!(f, "{}", e),
            PipelineError::ForecastNotFound(e) => {
                write!(f, "Unable to find uncompressed forecast. Aborting. {}", e)
            }
            PipelineError::Config(e) => write!(f, "{}", e),
            PipelineError::Region(e) => write!(f, "{}", e),
            PipelineError::Forecast(e) => write!(f, "{}", e),
            PipelineError::Catalog(e) => write!(f, "{}", e),
            PipelineError::Io { path, source } => write!(f, "I/O error on '{}': {}", path, source),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Manifest(e) => Some(e),
            PipelineError::ForecastNotFound(e) => Some(e),
            PipelineError::Config(e) => Some(e),
            PipelineError::Region(e) => Some(e),
            PipelineError::Forecast(e) => Some(e),
            PipelineError::Catalog(e) => Some(e),
            PipelineError::Io { source, .. } => Some(source),
        }
    }
}

impl From<ManifestError> for PipelineError {
    fn from(e: ManifestError) -> Self {
        PipelineError::Manifest(e)
    }
}

impl From<LocateError> for PipelineError {
    fn from(e: LocateError) -> Self {
        PipelineError::ForecastNotFound(e)
    }
}

impl From<ConfigError> for PipelineError {
    fn from(e: ConfigError) -> Self {
        PipelineError::Config(e)
    }
}

impl From<RegionError> for PipelineError {
    fn from(e: RegionError) -> Self {
        PipelineError::Region(e)
    }
}

impl From<ForecastError> for PipelineError {
    fn from(e: ForecastError) -> Self {
        PipelineError::Forecast(e)
    }
}

impl From<CatalogError> for PipelineError {
    fn from(e: CatalogError) -> Self {
        PipelineError::Catalog(e)
    }
}

/// Results of a completed job.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub metadata: RunMetadata,
    pub meta_path: PathBuf,
    pub ntest: EvaluationResult,
    pub mtest: EvaluationResult,
    pub stest: EvaluationResult,
    /// Empty unless the multi-magnitude number test is enabled.
    pub multi_mag_ntests: Vec<EvaluationResult>,
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed(Box<RunReport>),
    /// The job index is past the end of the manifest.
    NoWork { job_idx: usize, manifest_len: usize },
}

/// Run the evaluation job selected by `config.job_idx`.
pub fn run_job(
    config: &RunConfig,
    registry: &RegionRegistry,
) -> Result<RunOutcome, PipelineError> {
    let t0 = Instant::now();
    let settings = &config.settings;

    // a. Simulation directory and forecast file.
    let forecast_dir = match get_forecast_filepath(&config.simulation_list, config.job_idx)? {
        ManifestLookup::Found(dir) => dir,
        ManifestLookup::OutOfRange { index, len } => {
            return Ok(RunOutcome::NoWork {
                job_idx: index,
                manifest_len: len,
            })
        }
    };
    info!("Working on forecast in {}.", forecast_dir);
    let forecast_file = locate_forecast(Path::new(&forecast_dir))?;

    fs::create_dir_all(&config.output_dir).map_err(|source| PipelineError::Io {
        path: config.output_dir.display().to_string(),
        source,
    })?;
    info!("Processing forecast at {}.", forecast_file.path().display());

    // b. Evaluation window.
    let sim_config = SimulationConfig::from_dir(Path::new(&forecast_dir))?;
    let (start_epoch, end_epoch) = sim_config.window(settings.forecast_duration_millis);

    // c. Region.
    let region_info = &settings.region_information;
    let region = registry.create_space_magnitude_region(
        &region_info.name,
        region_info.min_mw,
        region_info.max_mw,
        region_info.dmw,
    )?;
    let min_magnitude = region.min_magnitude();

    // d. Filters shared by forecast and observation.
    let filters = FilterSet::for_window(start_epoch, end_epoch, min_magnitude);

    // e. Forecast.
    let forecast_name = format!("ucerf3-{}", sim_basename(&forecast_dir));
    let mut forecast =
        load_catalog_forecast(forecast_file.path(), &forecast_name, region, filters.clone())?;
    let spatial_rates = forecast.get_expected_rates().spatial_counts();

    // f. Observed catalog.
    let observed = load_catalog(
        &settings.catalog_path,
        &settings.observed_catalog_name,
        forecast.region(),
        &filters,
    )?;

    // g. Tests, each output written independently.
    let mut writer = ResultWriter::new(&config.output_dir, forecast_dir.as_str());

    info!("Computing number-test on forecast.");
    let ntest = number_test(&forecast, &observed);
    let ntest_path = writer.write_json(NTEST_SUFFIX, &ntest);

    info!("Computing magnitude-test on forecast.");
    let mtest = magnitude_test(&forecast, &observed);
    let mtest_path = writer.write_json(MTEST_SUFFIX, &mtest);

    info!("Computing spatial test on forecast.");
    let stest = spatial_test(&forecast, &observed);
    let stest_path = writer.write_json(STEST_SUFFIX, &stest);

    let spatial_counts_path = writer.write_spatial_counts(SPATIAL_COUNTS_SUFFIX, &spatial_rates);

    let mut multi_mag_ntests = Vec::new();
    let mut multi_mag_ntest_paths = std::collections::BTreeMap::new();
    if settings.multi_magnitude_ntest.enabled {
        info!(
            "Computing number-test at magnitudes {:?}.",
            settings.multi_magnitude_ntest.magnitudes
        );
        multi_mag_ntests = number_test_multiple_mag(
            &forecast,
            &observed,
            &settings.multi_magnitude_ntest.magnitudes,
        );
        for result in &multi_mag_ntests {
            if let Some(path) = writer.write_json(&multi_mag_ntest_suffix(result.min_mw), result) {
                multi_mag_ntest_paths.insert(format!("{:?}", result.min_mw), path);
            }
        }
    }

    // h. Run metadata.
    let mut checked: Vec<&EvaluationResult> = vec![&ntest, &mtest, &stest];
    checked.extend(multi_mag_ntests.iter());
    let filter_strings = filters.to_strings();
    let checksum = compute_checksum(&filter_strings, &checked, &spatial_rates);

    let meta_path = writer.output_path(META_SUFFIX);
    let derived = RunDerived {
        forecast_dir: forecast_dir.clone(),
        forecast_path: forecast_file.path().display().to_string(),
        start_epoch,
        end_epoch,
        min_magnitude,
        filters: filter_strings,
        n_catalogs: forecast.n_cat(),
        observed_event_count: observed.event_count(),
        ntest_path,
        mtest_path,
        stest_path,
        spatial_counts_path,
        multi_mag_ntest_paths,
        write_failures: writer.into_failures(),
        determinism: DeterminismInfo { checksum },
        elapsed_seconds: t0.elapsed().as_secs_f64(),
    };
    let metadata = RunMetadata {
        config: config.clone(),
        derived,
    };

    info!("Saving run-time configuration to {}.", meta_path.display());
    metadata
        .write_to_file(&meta_path)
        .map_err(|source| PipelineError::Io {
            path: meta_path.display().to_string(),
            source,
        })?;

    Ok(RunOutcome::Completed(Box::new(RunReport {
        metadata,
        meta_path,
        ntest,
        mtest,
        stest,
        multi_mag_ntests,
    })))
}
