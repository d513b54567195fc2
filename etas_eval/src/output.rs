// src/output.rs
//
// Output files of one evaluation job, all named `<sim-dir-basename>_<suffix>`
// under the output directory:
// - ntest_result.json / mtest_result.json / stest_result.json
// - ntest_result_mw<threshold>.json: optional multi-magnitude number tests
// - spatial_counts_arr-f8.bin: expected spatial rates, raw little-endian f64
// - meta.json: run configuration + derived values, 4-space indented
//
// Result writes are isolated: a failed write is logged and recorded in
// meta.json, and the remaining outputs are still attempted.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{error, info};

use crate::catalog::{FilterError, FilterSet};
use crate::config::RunConfig;
use crate::evaluations::{EvaluationResult, Quantile};
use crate::paths::create_output_filepath;

pub const NTEST_SUFFIX: &str = "ntest_result.json";
pub const MTEST_SUFFIX: &str = "mtest_result.json";
pub const STEST_SUFFIX: &str = "stest_result.json";
pub const SPATIAL_COUNTS_SUFFIX: &str = "spatial_counts_arr-f8.bin";
pub const META_SUFFIX: &str = "meta.json";

/// Suffix of the number test result at one magnitude threshold.
pub fn multi_mag_ntest_suffix(threshold: f64) -> String {
    format!("ntest_result_mw{:?}.json", threshold)
}

/// Write any serializable value as 4-space indented JSON.
pub fn write_json_result<T: Serialize + ?Sized, P: AsRef<Path>>(
    path: P,
    value: &T,
) -> io::Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut writer, formatter);
    value.serialize(&mut ser)?;
    writer.flush()
}

/// Write `values` as consecutive little-endian f64.
pub fn write_spatial_counts<P: AsRef<Path>>(path: P, values: &[f64]) -> io::Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    for v in values {
        writer.write_all(&v.to_le_bytes())?;
    }
    writer.flush()
}

/// An output that could not be written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteFailure {
    pub output: String,
    pub path: String,
    pub error: String,
}

/// Determinism information.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeterminismInfo {
    /// SHA-256 over filters, test statistics and expected spatial rates.
    pub checksum: String,
}

/// Everything computed while running a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunDerived {
    /// Simulation directory taken from the manifest.
    pub forecast_dir: String,
    pub forecast_path: String,
    pub start_epoch: i64,
    pub end_epoch: i64,
    pub min_magnitude: f64,
    /// Filter expressions applied to forecast and observed catalog.
    pub filters: Vec<String>,
    pub n_catalogs: usize,
    pub observed_event_count: usize,
    pub ntest_path: Option<String>,
    pub mtest_path: Option<String>,
    pub stest_path: Option<String>,
    pub spatial_counts_path: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub multi_mag_ntest_paths: BTreeMap<String, String>,
    #[serde(default)]
    pub write_failures: Vec<WriteFailure>,
    pub determinism: DeterminismInfo,
    pub elapsed_seconds: f64,
}

/// meta.json: the run configuration and derived values side by side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    #[serde(flatten)]
    pub config: RunConfig,
    #[serde(flatten)]
    pub derived: RunDerived,
}

impl RunMetadata {
    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        write_json_result(path, self)
    }

    pub fn read_from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        let meta = serde_json::from_reader(BufReader::new(file))?;
        Ok(meta)
    }

    /// Rebuild the filter set used by the run.
    pub fn filter_set(&self) -> Result<FilterSet, FilterError> {
        FilterSet::parse(&self.derived.filters)
    }
}

/// Fixed-precision encoding so checksums are stable across platforms.
fn hash_f64(hasher: &mut Sha256, v: f64) {
    if v.is_finite() {
        let rounded = (v * 1_000_000.0).round() as i64;
        hasher.update(rounded.to_le_bytes());
    } else {
        hasher.update(v.to_bits().to_le_bytes());
    }
}

/// Compute checksum from deterministic run data.
///
/// The checksum covers:
/// - filter strings
/// - per result: name, min_mw, observed statistic, quantile, status
/// - expected spatial rates
pub fn compute_checksum(
    filters: &[String],
    results: &[&EvaluationResult],
    spatial_rates: &[f64],
) -> String {
    let mut hasher = Sha256::new();

    for f in filters {
        hasher.update(f.as_bytes());
        hasher.update([0u8]);
    }

    for r in results {
        hasher.update(r.name.as_bytes());
        hash_f64(&mut hasher, r.min_mw);
        match r.observed_statistic {
            Some(v) => hash_f64(&mut hasher, v),
            None => hasher.update([0xffu8]),
        }
        match r.quantile {
            Some(Quantile::Pair(a, b)) => {
                hash_f64(&mut hasher, a);
                hash_f64(&mut hasher, b);
            }
            Some(Quantile::Single(q)) => hash_f64(&mut hasher, q),
            None => hasher.update([0xffu8]),
        }
        hasher.update([r.status as u8]);
    }

    hasher.update((spatial_rates.len() as u64).to_le_bytes());
    for v in spatial_rates {
        hash_f64(&mut hasher, *v);
    }

    hex_encode(&hasher.finalize())
}

/// Hex-encode bytes.
fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Writes the outputs of one job and keeps track of failed writes.
pub struct ResultWriter {
    output_dir: PathBuf,
    forecast_dir: String,
    failures: Vec<WriteFailure>,
}

impl ResultWriter {
    pub fn new(output_dir: impl Into<PathBuf>, forecast_dir: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            forecast_dir: forecast_dir.into(),
            failures: Vec::new(),
        }
    }

    /// Full path of the output with the given suffix.
    pub fn output_path(&self, suffix: &str) -> PathBuf {
        self.output_dir
            .join(create_output_filepath(&self.forecast_dir, suffix))
    }

    /// Write a result as JSON. Returns the path on success; failures are
    /// logged and recorded.
    pub fn write_json<T: Serialize + ?Sized>(
        &mut self,
        suffix: &str,
        value: &T,
    ) -> Option<String> {
        let path = self.output_path(suffix);
        let outcome = write_json_result(&path, value);
        self.record(suffix, path, outcome)
    }

    pub fn write_spatial_counts(&mut self, suffix: &str, values: &[f64]) -> Option<String> {
        let path = self.output_path(suffix);
        let outcome = write_spatial_counts(&path, values);
        self.record(suffix, path, outcome)
    }

    fn record(&mut self, suffix: &str, path: PathBuf, outcome: io::Result<()>) -> Option<String> {
        let path = path.display().to_string();
        match outcome {
            Ok(()) => {
                info!("Writing outputs to {}.", path);
                Some(path)
            }
            Err(e) => {
                error!("Failed to write {} to {}: {}", suffix, path, e);
                self.failures.push(WriteFailure {
                    output: suffix.to_string(),
                    path,
                    error: e.to_string(),
                });
                None
            }
        }
    }

    /// Failures recorded so far, consuming the writer.
    pub fn into_failures(self) -> Vec<WriteFailure> {
        self.failures
    }
}
