// src/manifest.rs
//
// Simulation manifest: a plain text file with one simulation directory per
// line. A job selects its directory by zero-based line index; an index past
// the end means the job array has no more work.

use std::fmt;
use std::fs;
use std::path::Path;

use tracing::info;

#[derive(Debug)]
pub enum ManifestError {
    Io { path: String, source: std::io::Error },
}

impl fmt::Display for ManifestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManifestError::Io { path, source } => {
                write!(f, "Failed to read manifest '{}': {}", path, source)
            }
        }
    }
}

impl std::error::Error for ManifestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ManifestError::Io { source, .. } => Some(source),
        }
    }
}

/// Result of looking up a job index in the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestLookup {
    /// Whitespace-stripped manifest line.
    Found(String),
    OutOfRange { index: usize, len: usize },
}

/// Read all manifest lines. A trailing newline does not add an entry; blank
/// lines in the middle do.
pub fn read_manifest(path: &Path) -> Result<Vec<String>, ManifestError> {
    let contents = fs::read_to_string(path).map_err(|source| ManifestError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(contents
        .split_inclusive('\n')
        .map(|line| line.trim().to_string())
        .collect())
}

/// Select the manifest entry for `job_idx`.
pub fn get_forecast_filepath(
    path: &Path,
    job_idx: usize,
) -> Result<ManifestLookup, ManifestError> {
    let mut lines = read_manifest(path)?;
    let len = lines.len();
    if job_idx >= len {
        info!("No directory in manifest for index {}.", job_idx);
        return Ok(ManifestLookup::OutOfRange {
            index: job_idx,
            len,
        });
    }
    Ok(ManifestLookup::Found(lines.swap_remove(job_idx)))
}
