//! Log subscriber setup.
//!
//! Events from the `turnstile` library and the binary are printed through a
//! `tracing_subscriber::fmt` layer. Filtering follows `RUST_LOG` and defaults
//! to `info`; set `RUST_LOG=turnstile=debug` to see per-connection events.

use super::config::LogFormat;
use tracing_subscriber::{
    EnvFilter, fmt, fmt::time::ChronoLocal, layer::SubscriberExt, util::SubscriberInitExt,
};

pub fn init_telemetry(format: LogFormat) -> anyhow::Result<()> {
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()));

    let layer = fmt::layer()
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_line_number(true)
        .with_target(false)
        .with_timer(ChronoLocal::rfc_3339())
        .with_file(true);

    match format {
        LogFormat::Pretty => registry.with(layer.pretty()).try_init()?,
        LogFormat::Compact => registry.with(layer.compact()).try_init()?,
        LogFormat::Json => registry.with(layer.json()).try_init()?,
    }

    Ok(())
}
