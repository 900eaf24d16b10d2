//! Logging setup for the command-line driver

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Initialize logging to stderr, defaulting `RUST_LOG` when unset
///
/// Snapshots go to stdout, so log lines never mix with them.
pub fn setup_logging() {
    if std::env::var("RUST_LOG").is_err() {
        // Safety: single-threaded at startup
        unsafe {
            if cfg!(debug_assertions) {
                std::env::set_var("RUST_LOG", "info,clustered_map_lib=debug");
            } else {
                std::env::set_var("RUST_LOG", "warn");
            }
        }
    }

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(fmt_layer).init();

    tracing::debug!(
        "Logging initialized with RUST_LOG={}",
        std::env::var("RUST_LOG").unwrap_or_default()
    );
}
