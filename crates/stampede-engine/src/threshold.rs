//! Threshold evaluation over a single metrics sample.

use stampede_core::{MetricsSample, Severity, ThresholdSet, ThresholdViolation};

fn violation(
    sample: &MetricsSample,
    metric: &str,
    actual: f64,
    threshold: f64,
    severity: Severity,
    description: String,
) -> ThresholdViolation {
    ThresholdViolation {
        timestamp: sample.timestamp,
        metric: metric.to_string(),
        actual_value: actual,
        threshold_value: threshold,
        severity,
        description,
    }
}

/// Compare `sample` against every configured threshold.
///
/// Checks are independent; unset categories are skipped. Latency and
/// throughput are only judged once at least one request has completed.
#[must_use]
pub fn evaluate(sample: &MetricsSample, thresholds: &ThresholdSet) -> Vec<ThresholdViolation> {
    let mut violations = Vec::new();
    let has_completions = sample.requests.completed > 0;

    if let (Some(rt), true) = (&thresholds.response_time, has_completions) {
        let stats = &sample.response_times;
        let checks = [
            ("average_response_time", "Average", stats.average, rt.average, Severity::Warning),
            ("p95_response_time", "P95", stats.p95, rt.p95, Severity::Critical),
            ("p99_response_time", "P99", stats.p99, rt.p99, Severity::Critical),
            ("max_response_time", "Max", stats.max, rt.max, Severity::Warning),
        ];

        for (metric, label, actual, ceiling, severity) in checks {
            if let Some(ceiling) = ceiling {
                if actual > ceiling {
                    violations.push(violation(
                        sample,
                        metric,
                        actual,
                        ceiling,
                        severity,
                        format!("{label} response time {actual:.2}ms exceeds {ceiling:.2}ms"),
                    ));
                }
            }
        }
    }

    if let Some(error_rate) = &thresholds.error_rate {
        if sample.errors.rate > error_rate.max {
            violations.push(violation(
                sample,
                "error_rate",
                sample.errors.rate,
                error_rate.max,
                Severity::Critical,
                format!(
                    "Error rate {:.2}% exceeds {:.2}%",
                    sample.errors.rate, error_rate.max
                ),
            ));
        }
    }

    if let (Some(throughput), true) = (&thresholds.throughput, has_completions) {
        let rps = sample.throughput.requests_per_second;
        if rps < throughput.min {
            violations.push(violation(
                sample,
                "throughput",
                rps,
                throughput.min,
                Severity::Warning,
                format!("Throughput {rps:.2} req/s below {:.2} req/s", throughput.min),
            ));
        }
    }

    if let (Some(resources), Some(system)) = (&thresholds.resources, &sample.system) {
        if let Some(cpu_max) = resources.cpu_max {
            if system.cpu_usage > cpu_max {
                violations.push(violation(
                    sample,
                    "cpu_usage",
                    system.cpu_usage,
                    cpu_max,
                    Severity::Warning,
                    format!("CPU usage {:.1}% exceeds {cpu_max:.1}%", system.cpu_usage),
                ));
            }
        }
        if let Some(memory_max) = resources.memory_max {
            if system.memory_mb > memory_max {
                violations.push(violation(
                    sample,
                    "memory_usage",
                    system.memory_mb,
                    memory_max,
                    Severity::Warning,
                    format!("Memory usage {:.1}MB exceeds {memory_max:.1}MB", system.memory_mb),
                ));
            }
        }
    }

    violations
}
