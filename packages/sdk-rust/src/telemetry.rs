//! Tracing subscriber setup for processes embedding the SDK.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Environment variable holding the filter directives.
pub const LOG_FILTER_ENV: &str = "SED_LOG";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Filter from `SED_LOG`, else `RUST_LOG`, else `default_directives`.
#[must_use]
pub fn env_filter(default_directives: &str) -> EnvFilter {
    std::env::var(LOG_FILTER_ENV)
        .ok()
        .and_then(|d| EnvFilter::try_new(d).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(default_directives))
}

/// Installs the global subscriber. Returns `false` when one is already set,
/// which is left in place.
pub fn init_tracing(format: LogFormat) -> bool {
    let filter = env_filter("info");
    let layer = match format {
        LogFormat::Text => fmt::layer().with_target(true).with_filter(filter).boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .with_filter(filter)
            .boxed(),
    };
    let installed = tracing_subscriber::registry().with(layer).try_init().is_ok();
    if installed {
        tracing::debug!(?format, "tracing initialized");
    }
    installed
}
