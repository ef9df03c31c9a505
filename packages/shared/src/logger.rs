//! Logger setup based on `tracing-subscriber`.

use tracing_subscriber::{EnvFilter, fmt};

/// Build the default filter directive for a binary.
///
/// `RUST_LOG` takes precedence when it is set. The library and binary share
/// the `partyline_server` target, so one directive covers both.
pub fn default_directive(bin_name: &str, level: &str) -> String {
    let crate_name = bin_name.replace('-', "_");
    format!("{crate_name}={level},tower_http=info")
}

/// Initialize the global tracing subscriber.
///
/// Calling this more than once is harmless; later calls are ignored.
pub fn setup_logger(bin_name: &str, level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(bin_name, level)));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(true)
        .try_init();
}
