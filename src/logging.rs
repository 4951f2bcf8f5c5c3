//! Logging setup shared by both binaries.
//!
//! Everything goes to stderr. The engine's stdout carries the status
//! protocol and must never see a log line.

use tracing_subscriber::EnvFilter;

/// Filter directive for the given verbosity flags. `RUST_LOG` wins over both.
#[must_use]
pub const fn default_directive(verbose: bool, quiet: bool) -> &'static str {
    match (verbose, quiet) {
        (true, _) => "debug",
        (false, true) => "warn",
        (false, false) => "info",
    }
}

/// Install the global subscriber. Later calls are ignored.
pub fn init(verbose: bool, quiet: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose, quiet)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init();
}
