//! Tracing subscriber initialization.

use dial_core::{DialError, DialResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const DEFAULT_LOG_FILTER: &str = "dial_service=debug,dial_events=info,info";

/// Telemetry configuration from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
    /// Filter used when `RUST_LOG` is unset or invalid
    pub default_filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            json: true,
            default_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl TelemetryConfig {
    /// - `DIAL_LOG_JSON`: "true" or "false" (default: true)
    pub fn from_env() -> Self {
        let json = std::env::var("DIAL_LOG_JSON")
            .ok()
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(true);
        Self {
            json,
            ..Self::default()
        }
    }
}

/// Install the global tracing subscriber.
///
/// Call once at startup. A second call returns an error and leaves the
/// installed subscriber in place.
pub fn init_tracing(config: &TelemetryConfig) -> DialResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    installed.map_err(|e| {
        DialError::unavailable("telemetry", format!("failed to init subscriber: {e}"))
    })?;

    tracing::info!(json = config.json, "Telemetry initialized");
    Ok(())
}
