//! Tracing setup shared by both binaries.
//!
//! `RUST_LOG` wins when set; otherwise the configured level applies to this crate
//! and everything else logs at `warn`.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogFormat;

pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("warn,tally={level}")))
}

/// Installs the global subscriber. A second call is a no-op.
pub fn init_logging(level: &str, format: LogFormat) {
    let registry = tracing_subscriber::registry().with(env_filter(level));
    let result = match format {
        LogFormat::Text => registry.with(fmt::layer().with_target(false).with_level(true)).try_init(),
        LogFormat::Json => registry.with(fmt::layer().json().with_current_span(false)).try_init(),
    };
    if result.is_err() {
        tracing::debug!("logging already initialised");
    }
}
