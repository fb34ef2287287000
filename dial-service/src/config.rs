//! Service Configuration Module
//!
//! Configuration is loaded from `DIAL_*` environment variables with
//! defaults suitable for local development.

use dial_events::ConsumerConfig;
use dial_storage::CacheConfig;
use std::time::Duration;

use crate::telemetry::TelemetryConfig;

pub const DEFAULT_CACHE_PREFIX: &str = "settings";
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;
pub const DEFAULT_CACHE_OP_TIMEOUT_MS: u64 = 250;
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 2000;
pub const DEFAULT_BUS_TIMEOUT_MS: u64 = 2000;

/// Everything a settings service instance needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub cache: CacheConfig,
    pub consumer: ConsumerConfig,
    pub telemetry: TelemetryConfig,

    /// Deadline for every store call.
    pub store_timeout: Duration,

    /// Deadline for every publish.
    pub bus_timeout: Duration,

    /// Refresh the writer's own cache entry after a write instead of
    /// evicting it.
    pub cache_write_through: bool,

    /// Publish a `FeatureFlagEvaluated` event for every evaluation.
    pub publish_evaluations: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            consumer: ConsumerConfig::default(),
            telemetry: TelemetryConfig::default(),
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
            bus_timeout: Duration::from_millis(DEFAULT_BUS_TIMEOUT_MS),
            cache_write_through: false,
            publish_evaluations: false,
        }
    }
}

impl ServiceConfig {
    /// Create ServiceConfig from environment variables.
    ///
    /// Environment variables:
    /// - `DIAL_CACHE_PREFIX`: Cache key prefix (default: settings)
    /// - `DIAL_CACHE_TTL_SECS`: Entry TTL (default: 3600)
    /// - `DIAL_CACHE_OP_TIMEOUT_MS`: Per-call cache deadline (default: 250)
    /// - `DIAL_STORE_TIMEOUT_MS`: Per-call store deadline (default: 2000)
    /// - `DIAL_BUS_TIMEOUT_MS`: Per-publish deadline (default: 2000)
    /// - `DIAL_CACHE_WRITE_THROUGH`: "true" or "false" (default: false)
    /// - `DIAL_PUBLISH_EVALUATIONS`: "true" or "false" (default: false)
    /// - `DIAL_CONSUMER_BATCH_SIZE`, `DIAL_CONSUMER_MAX_WAIT_MS`, `DIAL_CONSUMER_PREFIX`: see [`ConsumerConfig::from_env`]
    /// - `DIAL_LOG_JSON`: "true" or "false" (default: true)
    pub fn from_env() -> Self {
        let prefix = std::env::var("DIAL_CACHE_PREFIX")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CACHE_PREFIX.to_string());

        let ttl_secs = std::env::var("DIAL_CACHE_TTL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CACHE_TTL_SECS);

        let cache_op_timeout_ms = std::env::var("DIAL_CACHE_OP_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CACHE_OP_TIMEOUT_MS);

        let store_timeout_ms = std::env::var("DIAL_STORE_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_STORE_TIMEOUT_MS);

        let bus_timeout_ms = std::env::var("DIAL_BUS_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_BUS_TIMEOUT_MS);

        let cache_write_through = std::env::var("DIAL_CACHE_WRITE_THROUGH")
            .ok()
            .map(|s| s.to_lowercase() == "true")
            .unwrap_or(false);

        let publish_evaluations = std::env::var("DIAL_PUBLISH_EVALUATIONS")
            .ok()
            .map(|s| s.to_lowercase() == "true")
            .unwrap_or(false);

        Self {
            cache: CacheConfig::default()
                .with_prefix(prefix)
                .with_ttl(Duration::from_secs(ttl_secs))
                .with_op_timeout(Duration::from_millis(cache_op_timeout_ms)),
            consumer: ConsumerConfig::from_env(),
            telemetry: TelemetryConfig::from_env(),
            store_timeout: Duration::from_millis(store_timeout_ms),
            bus_timeout: Duration::from_millis(bus_timeout_ms),
            cache_write_through,
            publish_evaluations,
        }
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_consumer(mut self, consumer: ConsumerConfig) -> Self {
        self.consumer = consumer;
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn with_bus_timeout(mut self, timeout: Duration) -> Self {
        self.bus_timeout = timeout;
        self
    }

    pub fn with_write_through(mut self, enabled: bool) -> Self {
        self.cache_write_through = enabled;
        self
    }

    pub fn with_published_evaluations(mut self, enabled: bool) -> Self {
        self.publish_evaluations = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EnvVarGuard {
        key: &'static str,
        original: Option<String>,
    }

    impl EnvVarGuard {
        fn set(key: &'static str, value: Option<&str>) -> Self {
            let original = std::env::var(key).ok();
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
            Self { key, original }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            match self.original.as_deref() {
                Some(v) => std::env::set_var(self.key, v),
                None => std::env::remove_var(self.key),
            }
        }
    }

    #[test]
    fn test_default_config() {
        let config = ServiceConfig::default();
        assert_eq!(config.cache.prefix, "settings");
        assert_eq!(config.cache.entry_ttl, Duration::from_secs(3600));
        assert_eq!(config.cache.op_timeout, Duration::from_millis(250));
        assert_eq!(config.store_timeout, Duration::from_secs(2));
        assert_eq!(config.bus_timeout, Duration::from_secs(2));
        assert!(!config.cache_write_through);
        assert!(!config.publish_evaluations);
        assert_eq!(config.consumer.batch_size, 10);
    }

    #[test]
    fn test_from_env_overrides_and_falls_back() {
        let _prefix = EnvVarGuard::set("DIAL_CACHE_PREFIX", Some("tenant-a"));
        let _ttl = EnvVarGuard::set("DIAL_CACHE_TTL_SECS", Some("not-a-number"));
        let _store = EnvVarGuard::set("DIAL_STORE_TIMEOUT_MS", Some("500"));
        let _write = EnvVarGuard::set("DIAL_CACHE_WRITE_THROUGH", Some("TRUE"));
        let _eval = EnvVarGuard::set("DIAL_PUBLISH_EVALUATIONS", None);

        let config = ServiceConfig::from_env();
        assert_eq!(config.cache.prefix, "tenant-a");
        assert_eq!(config.cache.entry_ttl, Duration::from_secs(3600));
        assert_eq!(config.store_timeout, Duration::from_millis(500));
        assert!(config.cache_write_through);
        assert!(!config.publish_evaluations);
    }
}
