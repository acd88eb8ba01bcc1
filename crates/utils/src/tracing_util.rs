//! Helpers related to tracing, used by main entrypoints

use tracing_subscriber::prelude::*;

/// Initialize tracing with the default configuration: a compact stderr
/// layer driven by `RUST_LOG`.
pub fn initialize_tracing() {
    let format = tracing_subscriber::fmt::format()
        .without_time()
        .with_target(false)
        .compact();

    let fmt_layer = tracing_subscriber::fmt::layer()
        .event_format(format)
        .with_writer(std::io::stderr)
        .with_filter(tracing_subscriber::EnvFilter::from_default_env());

    tracing_subscriber::registry().with(fmt_layer).init();
}
