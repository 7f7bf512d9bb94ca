//! Periodic metrics sampling.

use crate::execution::TestExecution;
use crate::system::SystemSampler;
use crate::threshold;
use parking_lot::Mutex;
use stampede_core::metrics::THRESHOLD_VIOLATIONS;
use stampede_core::{ErrorSummary, MetricsSample, RequestCounts, Severity, Throughput};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Snapshots an execution's counters into [`MetricsSample`]s on a timer and
/// evaluates thresholds against each one.
pub struct MetricsAggregator {
    interval: Duration,
    system: Option<Mutex<SystemSampler>>,
}

impl MetricsAggregator {
    pub fn new(interval: Duration, collect_system: bool) -> Self {
        let system = if collect_system {
            SystemSampler::new().map(Mutex::new)
        } else {
            None
        };
        Self { interval, system }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Take one sample now, append it to the execution's history and record
    /// any threshold violations it triggers.
    pub fn record_sample(&self, execution: &TestExecution) -> MetricsSample {
        let snapshot = execution.accumulator().snapshot();
        let elapsed = execution.elapsed();
        let elapsed_secs = elapsed.as_secs_f64();
        let per_second = |value: f64| {
            if elapsed_secs > 0.0 {
                value / elapsed_secs
            } else {
                0.0
            }
        };

        let sample = MetricsSample {
            timestamp: execution.start_time()
                + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero()),
            elapsed_ms: elapsed.as_millis() as u64,
            virtual_users: execution.user_counts(),
            requests: RequestCounts {
                sent: snapshot.requests_sent,
                completed: snapshot.requests_completed,
                failed: snapshot.requests_failed,
                pending: snapshot.pending(),
            },
            response_times: snapshot.response_time_stats(),
            throughput: Throughput {
                requests_per_second: per_second(snapshot.requests_completed as f64),
                bytes_per_second: per_second(snapshot.bytes_transferred as f64),
            },
            errors: ErrorSummary {
                count: snapshot.requests_failed,
                rate: snapshot.error_rate(),
                by_type: snapshot.error_types.clone(),
            },
            system: self.system.as_ref().and_then(|s| s.lock().sample()),
        };
        let sample = execution.append_sample(sample);

        let violations = threshold::evaluate(&sample, &execution.scenario().thresholds);
        for v in &violations {
            THRESHOLD_VIOLATIONS
                .with_label_values(&[v.metric.as_str(), v.severity.as_str()])
                .inc();
            match v.severity {
                Severity::Critical => tracing::warn!(
                    test_id = %execution.id(),
                    metric = %v.metric,
                    actual = v.actual_value,
                    threshold = v.threshold_value,
                    "Critical threshold violation"
                ),
                Severity::Warning => tracing::debug!(
                    test_id = %execution.id(),
                    metric = %v.metric,
                    actual = v.actual_value,
                    threshold = v.threshold_value,
                    "Threshold violation"
                ),
            }
        }
        execution.record_violations(&violations);

        sample
    }

    /// Sample `execution` every interval until it is dropped or terminal.
    pub fn spawn(self: Arc<Self>, execution: &Arc<TestExecution>) -> JoinHandle<()> {
        let weak: Weak<TestExecution> = Arc::downgrade(execution);

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                let Some(execution) = weak.upgrade() else {
                    break;
                };
                if execution.status().is_terminal() {
                    break;
                }
                self.record_sample(&execution);
            }
        })
    }
}
