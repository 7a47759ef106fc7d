//! Logging initialization.

use crate::config::LogFormat;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter for `level`, unless `RUST_LOG` is set.
pub fn log_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install the global subscriber.
///
/// Fails if a subscriber is already installed.
pub fn init_logging(level: &str, format: &LogFormat) -> Result<(), TryInitError> {
    let registry = tracing_subscriber::registry().with(log_filter(level));

    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(true).with_ansi(false))
            .try_init(),
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
    }
}
