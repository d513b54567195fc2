// src/logging.rs
//
// Log subscriber setup for the binary. RUST_LOG takes precedence; otherwise
// the verbosity flag picks the level for this crate and other crates stay at
// warn.

use tracing_subscriber::{fmt, EnvFilter};

/// Default filter directive for a `-v` count.
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn,etas_eval=info",
        1 => "warn,etas_eval=debug",
        _ => "warn,etas_eval=trace",
    }
}

/// Install the global fmt subscriber. Returns false if one was already set.
pub fn init_logging(verbosity: u8) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}
