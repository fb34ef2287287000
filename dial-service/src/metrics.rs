//! Prometheus metrics sink.
//!
//! `ServiceMetrics` owns its registry. Handlers receive it as an
//! `Arc<ServiceMetrics>`; nothing is registered with the process-global
//! default registry, so several instances can live in one process.

use dial_core::{DialError, DialResult, Reason};
use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};

/// Store latency buckets (seconds)
const STORE_LATENCY_BUCKETS: &[f64] =
    &[0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0];

fn registration(name: &str, e: prometheus::Error) -> DialError {
    DialError::unavailable("metrics", format!("failed to register {name}: {e}"))
}

pub struct ServiceMetrics {
    registry: Registry,

    /// labels: aggregate, operation, status
    pub commands_total: CounterVec,

    /// labels: result (hit, miss, error)
    pub cache_requests_total: CounterVec,

    /// labels: status (success, failure)
    pub events_published_total: CounterVec,

    /// labels: reason
    pub flag_evaluations_total: CounterVec,

    /// labels: operation
    pub store_operation_duration_seconds: HistogramVec,
}

impl ServiceMetrics {
    pub fn new() -> DialResult<Self> {
        let registry = Registry::new();

        let commands_total = CounterVec::new(
            Opts::new("dial_commands_total", "Total number of setting commands"),
            &["aggregate", "operation", "status"],
        )
        .map_err(|e| registration("dial_commands_total", e))?;

        let cache_requests_total = CounterVec::new(
            Opts::new("dial_cache_requests_total", "Cache lookups by outcome"),
            &["result"],
        )
        .map_err(|e| registration("dial_cache_requests_total", e))?;

        let events_published_total = CounterVec::new(
            Opts::new("dial_events_published_total", "Domain events handed to the bus"),
            &["status"],
        )
        .map_err(|e| registration("dial_events_published_total", e))?;

        let flag_evaluations_total = CounterVec::new(
            Opts::new("dial_flag_evaluations_total", "Feature flag evaluations by reason"),
            &["reason"],
        )
        .map_err(|e| registration("dial_flag_evaluations_total", e))?;

        let store_operation_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "dial_store_operation_duration_seconds",
                "Store operation duration in seconds",
            )
            .buckets(STORE_LATENCY_BUCKETS.to_vec()),
            &["operation"],
        )
        .map_err(|e| registration("dial_store_operation_duration_seconds", e))?;

        registry
            .register(Box::new(commands_total.clone()))
            .map_err(|e| registration("dial_commands_total", e))?;
        registry
            .register(Box::new(cache_requests_total.clone()))
            .map_err(|e| registration("dial_cache_requests_total", e))?;
        registry
            .register(Box::new(events_published_total.clone()))
            .map_err(|e| registration("dial_events_published_total", e))?;
        registry
            .register(Box::new(flag_evaluations_total.clone()))
            .map_err(|e| registration("dial_flag_evaluations_total", e))?;
        registry
            .register(Box::new(store_operation_duration_seconds.clone()))
            .map_err(|e| registration("dial_store_operation_duration_seconds", e))?;

        Ok(Self {
            registry,
            commands_total,
            cache_requests_total,
            events_published_total,
            flag_evaluations_total,
            store_operation_duration_seconds,
        })
    }

    pub fn record_command(&self, aggregate: &str, operation: &str, success: bool) {
        let status = if success { "success" } else { "error" };
        self.commands_total
            .with_label_values(&[aggregate, operation, status])
            .inc();
    }

    /// `result` is one of `hit`, `miss` or `error`.
    pub fn record_cache_lookup(&self, result: &str) {
        self.cache_requests_total.with_label_values(&[result]).inc();
    }

    pub fn record_publish(&self, success: bool) {
        let status = if success { "success" } else { "failure" };
        self.events_published_total
            .with_label_values(&[status])
            .inc();
    }

    pub fn record_evaluation(&self, reason: &Reason) {
        self.flag_evaluations_total
            .with_label_values(&[reason.label()])
            .inc();
    }

    pub fn observe_store(&self, operation: &str, duration_secs: f64) {
        self.store_operation_duration_seconds
            .with_label_values(&[operation])
            .observe(duration_secs);
    }

    /// Encode the registry in Prometheus text format.
    pub fn gather_text(&self) -> DialResult<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| DialError::unavailable("metrics", format!("failed to encode: {e}")))?;
        String::from_utf8(buffer)
            .map_err(|e| DialError::unavailable("metrics", format!("non-utf8 output: {e}")))
    }
}

impl std::fmt::Debug for ServiceMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceMetrics").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instances_do_not_collide() {
        let a = ServiceMetrics::new().expect("first");
        let b = ServiceMetrics::new().expect("second");
        a.record_command("Configuration", "create", true);
        assert_eq!(
            a.commands_total
                .with_label_values(&["Configuration", "create", "success"])
                .get(),
            1.0
        );
        assert_eq!(
            b.commands_total
                .with_label_values(&["Configuration", "create", "success"])
                .get(),
            0.0
        );
    }

    #[test]
    fn test_gather_text() {
        let metrics = ServiceMetrics::new().expect("metrics");
        metrics.record_cache_lookup("hit");
        metrics.record_publish(false);
        metrics.record_evaluation(&Reason::TargetingRule("r1".into()));
        metrics.observe_store("update", 0.003);

        let text = metrics.gather_text().expect("encode");
        assert!(text.contains("dial_cache_requests_total{result=\"hit\"} 1"));
        assert!(text.contains("dial_events_published_total{status=\"failure\"} 1"));
        assert!(text.contains("dial_flag_evaluations_total{reason=\"targeting_rule\"} 1"));
        assert!(text.contains("dial_store_operation_duration_seconds_count{operation=\"update\"} 1"));
        assert!(!text.contains("r1"));
    }
}
