// src/config.rs
//
// Run configuration for a single evaluation job.
//
// Layering (lowest to highest precedence):
// - built-in defaults (one-week window, RELM region, 2.5 <= Mw < 8.0 by 0.1)
// - optional YAML settings file
// - ETAS_EVAL_* environment variables
// - CLI flags (applied by the binary)
//
// RunConfig is built once and passed by reference; everything computed while
// running lives in output::RunDerived.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::evaluations::DEFAULT_MULTI_MAG_THRESHOLDS;
use crate::paths::SIM_CONFIG_FILE;
use crate::region::{magnitude_bin_count, CALIFORNIA_RELM_REGION, MAX_MAGNITUDE_BINS};

/// Current run configuration schema version.
pub const CONFIG_SCHEMA_VERSION: u32 = 2;

pub const SECONDS_PER_WEEK: i64 = 7 * 24 * 60 * 60;

pub const DEFAULT_CATALOG_PATH: &str = "comcat-2021-02-12-unfiltered.csv";
pub const DEFAULT_OBSERVED_CATALOG_NAME: &str = "comcat";

pub const ENV_CATALOG_PATH: &str = "ETAS_EVAL_CATALOG_PATH";
pub const ENV_FORECAST_DURATION_MILLIS: &str = "ETAS_EVAL_FORECAST_DURATION_MILLIS";
pub const ENV_MULTI_MAG: &str = "ETAS_EVAL_MULTI_MAG";

/// Error type for configuration loading.
#[derive(Debug, Clone)]
pub enum ConfigError {
    Io { path: String, source: String },
    Parse { source: String },
    Validation { field: String, message: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "Failed to read '{}': {}", path, source)
            }
            ConfigError::Parse { source } => write!(f, "Failed to parse config: {}", source),
            ConfigError::Validation { field, message } => {
                write!(f, "Validation error in '{}': {}", field, message)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Named spatial region plus magnitude binning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionInformation {
    pub name: String,
    pub min_mw: f64,
    pub max_mw: f64,
    pub dmw: f64,
}

impl Default for RegionInformation {
    fn default() -> Self {
        Self {
            name: CALIFORNIA_RELM_REGION.to_string(),
            min_mw: 2.5,
            max_mw: 8.0,
            dmw: 0.1,
        }
    }
}

/// Optional number test over several magnitude thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiMagnitudeConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_thresholds")]
    pub magnitudes: Vec<f64>,
}

fn default_thresholds() -> Vec<f64> {
    DEFAULT_MULTI_MAG_THRESHOLDS.to_vec()
}

impl Default for MultiMagnitudeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            magnitudes: default_thresholds(),
        }
    }
}

/// Settings shared by every job of a batch; the YAML file holds a subset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalSettings {
    /// Evaluation window length in milliseconds.
    pub forecast_duration_millis: i64,
    pub region_information: RegionInformation,
    /// Observed catalog CSV.
    pub catalog_path: PathBuf,
    pub observed_catalog_name: String,
    pub multi_magnitude_ntest: MultiMagnitudeConfig,
}

impl Default for EvalSettings {
    fn default() -> Self {
        Self {
            forecast_duration_millis: SECONDS_PER_WEEK * 1000,
            region_information: RegionInformation::default(),
            catalog_path: PathBuf::from(DEFAULT_CATALOG_PATH),
            observed_catalog_name: DEFAULT_OBSERVED_CATALOG_NAME.to_string(),
            multi_magnitude_ntest: MultiMagnitudeConfig::default(),
        }
    }
}

impl EvalSettings {
    /// Load settings from a YAML file; missing keys keep their defaults.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source: e.to_string(),
        })?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let settings: EvalSettings =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse {
                source: e.to_string(),
            })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &str, message: &str| ConfigError::Validation {
            field: field.to_string(),
            message: message.to_string(),
        };

        if self.forecast_duration_millis <= 0 {
            return Err(invalid(
                "forecast_duration_millis",
                "forecast_duration_millis must be > 0",
            ));
        }

        let region = &self.region_information;
        if region.name.is_empty() {
            return Err(invalid("region_information.name", "name cannot be empty"));
        }
        if region.dmw.is_nan() || region.dmw <= 0.0 {
            return Err(invalid("region_information.dmw", "dmw must be > 0"));
        }
        if region.max_mw.is_nan() || region.max_mw <= region.min_mw {
            return Err(invalid(
                "region_information.max_mw",
                "max_mw must be greater than min_mw",
            ));
        }
        if magnitude_bin_count(region.min_mw, region.max_mw, region.dmw).is_none() {
            return Err(invalid(
                "region_information.dmw",
                &format!(
                    "dmw {} over [{}, {}) needs more than {} magnitude bins",
                    region.dmw, region.min_mw, region.max_mw, MAX_MAGNITUDE_BINS
                ),
            ));
        }

        let multi = &self.multi_magnitude_ntest;
        if multi.enabled && multi.magnitudes.is_empty() {
            return Err(invalid(
                "multi_magnitude_ntest.magnitudes",
                "at least one magnitude threshold is required when enabled",
            ));
        }
        if multi.magnitudes.iter().any(|m| !m.is_finite()) {
            return Err(invalid(
                "multi_magnitude_ntest.magnitudes",
                "thresholds must be finite",
            ));
        }

        Ok(())
    }

    /// Apply ETAS_EVAL_* overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.override_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup. Values that fail to
    /// parse are ignored with a warning.
    pub fn override_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_CATALOG_PATH) {
            if raw.trim().is_empty() {
                warn!(
                    "[config] {} is empty; using {}",
                    ENV_CATALOG_PATH,
                    self.catalog_path.display()
                );
            } else {
                self.catalog_path = PathBuf::from(raw.trim());
                info!("[config] {} = {} (overrode default)", ENV_CATALOG_PATH, raw.trim());
            }
        }

        if let Some(raw) = lookup(ENV_FORECAST_DURATION_MILLIS) {
            match raw.trim().parse::<i64>() {
                Ok(v) if v > 0 => {
                    self.forecast_duration_millis = v;
                    info!(
                        "[config] {} = {} (overrode default)",
                        ENV_FORECAST_DURATION_MILLIS, v
                    );
                }
                _ => warn!(
                    "[config] could not parse {} = {:?} as a positive integer; using {}",
                    ENV_FORECAST_DURATION_MILLIS, raw, self.forecast_duration_millis
                ),
            }
        }

        if let Some(raw) = lookup(ENV_MULTI_MAG) {
            match parse_flag(&raw) {
                Some(v) => {
                    self.multi_magnitude_ntest.enabled = v;
                    info!("[config] {} = {} (overrode default)", ENV_MULTI_MAG, v);
                }
                None => warn!(
                    "[config] could not parse {} = {:?} as a flag; using {}",
                    ENV_MULTI_MAG, raw, self.multi_magnitude_ntest.enabled
                ),
            }
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

/// Immutable configuration of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub version: u32,
    /// Manifest of simulation directories.
    pub simulation_list: PathBuf,
    pub output_dir: PathBuf,
    /// Zero-based manifest line to process.
    pub job_idx: usize,
    #[serde(flatten)]
    pub settings: EvalSettings,
}

impl RunConfig {
    pub fn new(
        simulation_list: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        job_idx: usize,
        settings: EvalSettings,
    ) -> Self {
        Self {
            version: CONFIG_SCHEMA_VERSION,
            simulation_list: simulation_list.into(),
            output_dir: output_dir.into(),
            job_idx,
            settings,
        }
    }
}

/// The subset of a simulation's `config.json` that the evaluation needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Forecast start, epoch milliseconds.
    #[serde(rename = "startTimeMillis")]
    pub start_time_millis: i64,
}

impl SimulationConfig {
    /// Read `config.json` from a simulation directory.
    pub fn from_dir(sim_dir: &Path) -> Result<Self, ConfigError> {
        let path = sim_dir.join(SIM_CONFIG_FILE);
        let contents = fs::read_to_string(&path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e.to_string(),
        })?;
        Self::from_json_str(&contents)
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse {
            source: e.to_string(),
        })
    }

    /// Half-open evaluation window `[start, start + duration)`.
    pub fn window(&self, duration_millis: i64) -> (i64, i64) {
        (
            self.start_time_millis,
            self.start_time_millis.saturating_add(duration_millis),
        )
    }
}
