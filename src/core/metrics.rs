//! Prometheus metrics for monitoring the relay.
//!
//! The usage and error counters here are the side channel the alerting and
//! failover collaborators scrape; nothing in the transcoder calls out to them
//! directly.

use prometheus::{
    register_int_counter_vec, register_int_gauge, Encoder, IntCounterVec, IntGauge, TextEncoder,
};
use std::sync::OnceLock;

/// Container for all application metrics.
pub struct Metrics {
    /// Total number of requests by endpoint and status
    pub request_count: IntCounterVec,

    /// Total token usage by model and token type (input/output)
    pub token_usage: IntCounterVec,

    /// Sanitized upstream errors by upstream status code
    pub upstream_errors: IntCounterVec,

    /// Streams currently being transcoded
    pub active_streams: IntGauge,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Initialize the metrics registry.
///
/// Safe to call more than once; later calls return the same instance.
pub fn init_metrics() -> &'static Metrics {
    METRICS.get_or_init(|| {
        let request_count = register_int_counter_vec!(
            "llm_relay_requests_total",
            "Total number of requests",
            &["endpoint", "status_code"]
        )
        .expect("Failed to register request_count metric");

        let token_usage = register_int_counter_vec!(
            "llm_relay_token_usage_total",
            "Total number of tokens reported by the upstream",
            &["model", "type"]
        )
        .expect("Failed to register token_usage metric");

        let upstream_errors = register_int_counter_vec!(
            "llm_relay_upstream_errors_total",
            "Upstream responses with a non-2xx status",
            &["status"]
        )
        .expect("Failed to register upstream_errors metric");

        let active_streams = register_int_gauge!(
            "llm_relay_active_streams",
            "Number of streams currently being transcoded"
        )
        .expect("Failed to register active_streams metric");

        Metrics {
            request_count,
            token_usage,
            upstream_errors,
            active_streams,
        }
    })
}

/// Get the global metrics instance, initializing it on first use.
pub fn get_metrics() -> &'static Metrics {
    METRICS.get().unwrap_or_else(init_metrics)
}

/// Render all registered metrics in the prometheus text format.
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
