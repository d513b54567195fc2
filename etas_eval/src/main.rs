// src/main.rs
//
// Evaluate one UCERF3-ETAS forecast from a manifest of simulation directories.
//
// Usage:
//   etas_eval <JOB_IDX> <MANIFEST> <OUTPUT_DIR> [--config settings.yaml]
//
// Exit codes:
//   0    completed, or JOB_IDX past the end of the manifest
//   1    fatal error
//   2    usage error
//   255  no forecast file in the simulation directory

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use etas_eval::config::{EvalSettings, RunConfig};
use etas_eval::logging::init_logging;
use etas_eval::pipeline::{run_job, PipelineError, EXIT_FAILURE};
use etas_eval::region::RegionRegistry;
use etas_eval::RunOutcome;

#[derive(Debug, Parser)]
#[command(
    name = "etas_eval",
    about = "Consistency tests of a UCERF3-ETAS forecast against an observed catalog",
    version
)]
struct Args {
    /// Zero-based line of the manifest to process
    job_idx: usize,

    /// Text file with one simulation directory per line
    manifest: PathBuf,

    /// Directory receiving result files
    output_dir: PathBuf,

    /// YAML settings file (duration, region, catalog, multi-magnitude test)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Observed catalog CSV
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Evaluation window length in milliseconds
    #[arg(long)]
    duration_millis: Option<i64>,

    /// Also run the number test at several magnitude thresholds
    #[arg(long)]
    multi_mag: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn build_config(args: &Args) -> anyhow::Result<RunConfig> {
    let mut settings = match &args.config {
        Some(path) => EvalSettings::from_yaml_file(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => EvalSettings::default(),
    };
    settings.apply_env_overrides();

    if let Some(catalog) = &args.catalog {
        settings.catalog_path = catalog.clone();
    }
    if let Some(ms) = args.duration_millis {
        settings.forecast_duration_millis = ms;
    }
    if args.multi_mag {
        settings.multi_magnitude_ntest.enabled = true;
    }
    settings.validate().context("invalid settings")?;

    Ok(RunConfig::new(
        args.manifest.clone(),
        args.output_dir.clone(),
        args.job_idx,
        settings,
    ))
}

fn run(args: &Args) -> anyhow::Result<i32> {
    let config = build_config(args)?;
    let registry = RegionRegistry::with_defaults();

    match run_job(&config, &registry) {
        Ok(RunOutcome::Completed(report)) => {
            info!(
                checksum = %report.metadata.derived.determinism.checksum,
                failures = report.metadata.derived.write_failures.len(),
                "Wrote {}",
                report.meta_path.display()
            );
            Ok(0)
        }
        Ok(RunOutcome::NoWork {
            job_idx,
            manifest_len,
        }) => {
            info!(
                "Nothing to do: manifest has {} entries, job index {}.",
                manifest_len, job_idx
            );
            Ok(0)
        }
        Err(e @ PipelineError::ForecastNotFound(_)) => {
            error!("{}", e);
            Ok(e.exit_code())
        }
        Err(e) => Err(e).context("evaluation failed"),
    }
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    let t0 = Instant::now();
    let code = match run(&args) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            EXIT_FAILURE
        }
    };
    if code == 0 {
        info!(
            "Finished processing forecast in {:.2} seconds.",
            t0.elapsed().as_secs_f64()
        );
    }
    std::process::exit(code);
}
