// src/paths.rs
//
// File naming inside simulation and output directories.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

pub const COMPRESSED_FORECAST: &str = "results_complete.bin.gz";
pub const UNCOMPRESSED_FORECAST: &str = "results_complete.bin";
/// Simulation configuration inside each simulation directory.
pub const SIM_CONFIG_FILE: &str = "config.json";

/// `<basename(sim_dir)>_<suffix>`.
pub fn create_output_filepath(sim_dir: &str, suffix: &str) -> String {
    let base = sim_basename(sim_dir);
    format!("{}_{}", base, suffix)
}

/// Final path component of a simulation directory; empty when the path ends
/// in a separator.
pub fn sim_basename(sim_dir: &str) -> &str {
    match sim_dir.rfind('/') {
        Some(pos) => &sim_dir[pos + 1..],
        None => sim_dir,
    }
}

/// Located forecast file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForecastFile {
    Compressed(PathBuf),
    Uncompressed(PathBuf),
}

impl ForecastFile {
    pub fn path(&self) -> &Path {
        match self {
            ForecastFile::Compressed(p) | ForecastFile::Uncompressed(p) => p,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocateError {
    NotFound { dir: String, tried: Vec<String> },
}

impl fmt::Display for LocateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocateError::NotFound { dir, tried } => write!(
                f,
                "No forecast found in '{}' (tried {})",
                dir,
                tried.join(", ")
            ),
        }
    }
}

impl std::error::Error for LocateError {}

/// Probe `sim_dir` for the compressed forecast, then the uncompressed one.
pub fn locate_forecast(sim_dir: &Path) -> Result<ForecastFile, LocateError> {
    let compressed = sim_dir.join(COMPRESSED_FORECAST);
    if compressed.is_file() {
        info!("Found forecast file at {}.", compressed.display());
        return Ok(ForecastFile::Compressed(compressed));
    }
    warn!(
        "Did not find a forecast at {}. Looking for uncompressed version.",
        compressed.display()
    );

    let uncompressed = sim_dir.join(UNCOMPRESSED_FORECAST);
    if uncompressed.is_file() {
        info!("Found forecast file at {}.", uncompressed.display());
        return Ok(ForecastFile::Uncompressed(uncompressed));
    }

    Err(LocateError::NotFound {
        dir: sim_dir.display().to_string(),
        tried: vec![
            compressed.display().to_string(),
            uncompressed.display().to_string(),
        ],
    })
}
