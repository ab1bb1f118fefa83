//! Tracing subscriber setup for binaries and integration harnesses.

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber with an `info` default.
///
/// `RUST_LOG` overrides the default filter. Calling this twice is a no-op,
/// so tests can call it freely.
pub fn init() {
    init_with_default("info");
}

/// Install the global tracing subscriber with the given default filter.
pub fn init_with_default(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
