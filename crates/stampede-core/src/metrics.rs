//! Process-wide Prometheus metrics for load generation.
//!
//! Metrics are registered lazily on first access using once_cell::Lazy.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_int_counter_vec, register_int_gauge, Encoder, Histogram,
    IntCounterVec, IntGauge, TextEncoder,
};

/// Requests issued by virtual users, by outcome (success/failure)
pub static REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "stampede_requests_total",
        "Total number of requests issued by virtual users",
        &["outcome"]
    )
    .expect("Failed to register requests counter")
});

/// Latency of successful requests
pub static REQUEST_DURATION: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "stampede_request_duration_seconds",
        "Request latency in seconds",
        // Buckets: 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s, 30s
        vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .expect("Failed to register request duration histogram")
});

/// Virtual users currently active across all runs
pub static ACTIVE_VIRTUAL_USERS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "stampede_active_virtual_users",
        "Number of virtual users currently active"
    )
    .expect("Failed to register active virtual users gauge")
});

/// Threshold violations by metric and severity
pub static THRESHOLD_VIOLATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "stampede_threshold_violations_total",
        "Total number of threshold violations",
        &["metric", "severity"]
    )
    .expect("Failed to register threshold violations counter")
});

/// Finished test runs by final status
pub static TEST_RUNS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "stampede_test_runs_total",
        "Total number of finished test runs",
        &["status"]
    )
    .expect("Failed to register test runs counter")
});

/// Render every registered metric in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
