//! # Observability
//!
//! - `audit`: audit events, sinks and backends
//! - `metrics`: Prometheus metrics collection
//!
//! Logging goes through `tracing`; [`init_logging`] installs the subscriber.

pub mod audit;
pub mod metrics;

use anyhow::{bail, Result};
use audit::AUDIT_LOG_TARGET;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber
///
/// `RUST_LOG` wins over [`default_filter`] when set. `format` is `text` or `json`.
///
/// # Errors
/// Fails on an unknown format or when a subscriber is already installed.
pub fn init_logging(level: &str, format: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let installed = match format.to_lowercase().as_str() {
        "json" => builder.json().try_init(),
        "text" => builder.try_init(),
        other => bail!("unknown log format {other:?}, expected json or text"),
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}

/// Filter used when `RUST_LOG` is unset
///
/// Crate logs follow `level`; audit events always pass at `info`.
#[must_use]
pub fn default_filter(level: &str) -> EnvFilter {
    EnvFilter::new(format!(
        "secret_reconciler={},{AUDIT_LOG_TARGET}=info",
        level.to_lowercase()
    ))
}
