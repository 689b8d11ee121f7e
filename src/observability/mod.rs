//! Observability subsystem for planb
//!
//! - Structured logging through `tracing`, with a typed [`Event`] name on
//!   every lifecycle line
//! - Monotonic counters in a process-wide [`MetricsRegistry`]
//!
//! The library never installs a subscriber; binaries call [`init_logging`].

mod events;
mod metrics;

pub use events::Event;
pub use metrics::{MetricsRegistry, MetricsSnapshot};

use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;

/// Returns the process-wide metrics registry
pub fn metrics() -> &'static MetricsRegistry {
    static METRICS: OnceLock<MetricsRegistry> = OnceLock::new();
    METRICS.get_or_init(MetricsRegistry::new)
}

/// Install a `tracing` subscriber writing to stderr.
///
/// The filter comes from `RUST_LOG` and defaults to `info`. With `json`
/// set, each event is one JSON object per line.
pub fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    // A second install (tests, embedding hosts) is not an error.
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
