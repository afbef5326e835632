//! Observability and telemetry.
//!
//! Installs a `tracing-subscriber` fmt layer driven by `RUST_LOG` (or the
//! verbosity flag when the environment is silent). Metrics are emitted
//! through the `metrics` facade; wiring an exporter is the embedding
//! application's concern — without one, counters are no-ops.

use tracing_subscriber::EnvFilter;

/// Initializes logging for the process.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
