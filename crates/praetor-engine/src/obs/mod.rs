//! Observability: tracing setup and in-process metrics.

pub mod metrics;

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingSection;

/// Install a global `fmt` subscriber. `RUST_LOG` overrides the configured filter.
///
/// Safe to call more than once; later calls are no-ops when a subscriber is
/// already installed (embedding processes may have their own).
pub fn init_tracing(cfg: &LoggingSection) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if fmt().with_env_filter(filter).try_init().is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
