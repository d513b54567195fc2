//! etas_eval: post-processing of UCERF3-ETAS stochastic-catalog forecasts.
//!
//! Each invocation processes one simulation directory, selected by index from
//! a manifest, and runs catalog-based consistency tests of the forecast
//! against an observed catalog:
//!
//! - **Number test**: simulated event counts vs the observed count.
//! - **Magnitude test**: shape of the magnitude distribution.
//! - **Spatial test**: normalized pseudo-likelihood of the observed epicenters.
//!
//! Results are written as JSON next to a `meta.json` snapshot of the run.
//!
//! # Layout
//!
//! - `region`: gridded spatial regions, magnitude bins, and the preset registry
//! - `catalog`: events, filters, the observed CSV loader and the UCERF3 reader
//! - `forecast`: ensembles of simulated catalogs and their expected rates
//! - `evaluations`: the statistical tests
//! - `config`, `manifest`, `paths`, `output`: job inputs and outputs
//! - `pipeline`: one job end to end

pub mod catalog;
pub mod config;
pub mod evaluations;
pub mod forecast;
pub mod logging;
pub mod manifest;
pub mod output;
pub mod paths;
pub mod pipeline;
pub mod region;

// --- Re-exports for ergonomic external use ---------------------------------

pub use catalog::{Catalog, Event, FilterSet};
pub use config::{EvalSettings, RunConfig, SimulationConfig};
pub use evaluations::{EvaluationResult, Quantile, TestStatus};
pub use forecast::CatalogForecast;
pub use output::{RunDerived, RunMetadata};
pub use pipeline::{run_job, PipelineError, RunOutcome, RunReport};
pub use region::{RegionRegistry, SpaceMagnitudeRegion};
