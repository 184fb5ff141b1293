//! Logging initialization.
//!
//! Uses `tracing` with `tracing-subscriber`; the level can be overridden via
//! the `RUST_LOG` environment variable.

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the logging subsystem.
///
/// Defaults to debug output for the app itself so the deliberately leaky log
/// lines (hardcoded token, stored credentials) are visible during a demo.
pub fn init() {
    let fmt_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);

    let filter_layer = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("vulnbank_lib=debug"))
        .expect("valid default filter directives");

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
