//! Shared per-execution request counters.
//!
//! Every virtual user of a run writes into one [`MetricsAccumulator`]; the
//! metrics aggregator reads it through [`MetricsAccumulator::snapshot`].
//! All mutation happens under a single mutex so the counters stay mutually
//! consistent: `completed + failed <= sent` holds for every snapshot.

use parking_lot::Mutex;
use stampede_core::ResponseTimeStats;
use std::collections::BTreeMap;
use std::time::Duration;

/// Copy of the accumulator state at one instant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccumulatorSnapshot {
    pub requests_sent: u64,
    pub requests_completed: u64,
    pub requests_failed: u64,
    /// Sum of successful response times in milliseconds.
    pub total_response_time: f64,
    pub min_response_time: Option<f64>,
    pub max_response_time: f64,
    /// Every successful response time in milliseconds, in arrival order.
    pub response_times: Vec<f64>,
    pub error_types: BTreeMap<String, u64>,
    pub bytes_transferred: u64,
}

impl AccumulatorSnapshot {
    /// Requests sent that have neither completed nor failed yet.
    #[must_use]
    pub fn pending(&self) -> u64 {
        self.requests_sent
            .saturating_sub(self.requests_completed + self.requests_failed)
    }

    /// Average of successful response times, 0 when nothing completed.
    #[must_use]
    pub fn average_response_time(&self) -> f64 {
        if self.requests_completed == 0 {
            return 0.0;
        }
        self.total_response_time / self.requests_completed as f64
    }

    /// Failed requests as a percentage of requests sent.
    #[must_use]
    pub fn error_rate(&self) -> f64 {
        if self.requests_sent == 0 {
            return 0.0;
        }
        self.requests_failed as f64 / self.requests_sent as f64 * 100.0
    }

    /// Full timing statistics over the accumulated history.
    #[must_use]
    pub fn response_time_stats(&self) -> ResponseTimeStats {
        let mut sorted = self.response_times.clone();
        sorted.sort_by(f64::total_cmp);

        ResponseTimeStats {
            average: self.average_response_time(),
            min: self.min_response_time.unwrap_or(0.0),
            max: self.max_response_time,
            p50: percentile(&sorted, 50.0),
            p95: percentile(&sorted, 95.0),
            p99: percentile(&sorted, 99.0),
        }
    }
}

/// Nearest-rank percentile over an ascending slice.
///
/// Indexes at `ceil(p / 100 * n) - 1`, clamped to the slice bounds; returns
/// 0 for an empty slice.
#[must_use]
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }

    let rank = (p / 100.0 * sorted.len() as f64).ceil() as i64 - 1;
    let index = rank.clamp(0, sorted.len() as i64 - 1) as usize;
    sorted[index]
}

/// Mutex-protected aggregate written by every virtual user of a run.
#[derive(Debug, Default)]
pub struct MetricsAccumulator {
    state: Mutex<AccumulatorSnapshot>,
}

impl MetricsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a request as sent. Must precede its success/failure record.
    pub fn record_sent(&self) {
        self.state.lock().requests_sent += 1;
    }

    /// Record a successful request.
    pub fn record_success(&self, latency: Duration, bytes: u64) {
        let latency_ms = latency.as_secs_f64() * 1000.0;
        let mut state = self.state.lock();

        state.requests_completed += 1;
        state.total_response_time += latency_ms;
        state.min_response_time = Some(
            state
                .min_response_time
                .map_or(latency_ms, |min| min.min(latency_ms)),
        );
        state.max_response_time = state.max_response_time.max(latency_ms);
        state.response_times.push(latency_ms);
        state.bytes_transferred += bytes;
    }

    /// Record a failed request under its error category.
    pub fn record_failure(&self, category: &str) {
        let mut state = self.state.lock();

        state.requests_failed += 1;
        *state.error_types.entry(category.to_string()).or_insert(0) += 1;
    }

    /// Get current accumulator snapshot.
    pub fn snapshot(&self) -> AccumulatorSnapshot {
        self.state.lock().clone()
    }

    /// `(sent, completed, failed)` without copying the latency history.
    pub fn counts(&self) -> (u64, u64, u64) {
        let state = self.state.lock();
        (
            state.requests_sent,
            state.requests_completed,
            state.requests_failed,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_percentile_nearest_rank() {
        let sorted: Vec<f64> = (1..=100).map(f64::from).collect();

        assert_eq!(percentile(&sorted, 50.0), 50.0);
        assert_eq!(percentile(&sorted, 95.0), 95.0);
        assert_eq!(percentile(&sorted, 99.0), 99.0);
        assert_eq!(percentile(&sorted, 0.0), 1.0); // clamped to first element
        assert_eq!(percentile(&[], 95.0), 0.0);
        assert_eq!(percentile(&[42.0], 99.0), 42.0);
    }

    #[test]
    fn test_percentiles_are_monotonic_and_idempotent() {
        let acc = MetricsAccumulator::new();
        for ms in [120, 3, 45, 45, 900, 18, 7, 260, 33, 1] {
            acc.record_sent();
            acc.record_success(Duration::from_millis(ms), 0);
        }

        let snapshot = acc.snapshot();
        let first = snapshot.response_time_stats();
        let second = snapshot.response_time_stats();

        assert_eq!(first, second);
        assert!(first.p50 <= first.p95);
        assert!(first.p95 <= first.p99);
        assert!(first.min <= first.p50);
        assert!(first.p99 <= first.max);
    }

    #[test]
    fn test_collector() {
        let acc = MetricsAccumulator::new();

        for _ in 0..3 {
            acc.record_sent();
        }
        acc.record_success(Duration::from_millis(10), 100);
        acc.record_success(Duration::from_millis(20), 50);
        acc.record_failure("timeout");

        let s = acc.snapshot();
        assert_eq!(s.requests_sent, 3);
        assert_eq!(s.requests_completed, 2);
        assert_eq!(s.requests_failed, 1);
        assert_eq!(s.pending(), 0);
        assert_eq!(s.bytes_transferred, 150);
        assert_eq!(s.min_response_time, Some(10.0));
        assert_eq!(s.max_response_time, 20.0);
        assert_eq!(s.average_response_time(), 15.0);
        assert_eq!(s.error_types.get("timeout"), Some(&1));
        assert!((s.error_rate() - 100.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_snapshot_has_zero_stats() {
        let s = MetricsAccumulator::new().snapshot();
        let stats = s.response_time_stats();
        assert_eq!(stats.average, 0.0);
        assert_eq!(stats.min, 0.0);
        assert_eq!(stats.p99, 0.0);
        assert_eq!(s.error_rate(), 0.0);
    }

    #[test]
    fn test_counts_never_exceed_sent_under_contention() {
        let acc = Arc::new(MetricsAccumulator::new());
        let writers: Vec<_> = (0..8)
            .map(|i| {
                let acc = Arc::clone(&acc);
                std::thread::spawn(move || {
                    for n in 0..500u64 {
                        acc.record_sent();
                        if (n + i) % 7 == 0 {
                            acc.record_failure("network");
                        } else {
                            acc.record_success(Duration::from_micros(n), 1);
                        }
                    }
                })
            })
            .collect();

        for _ in 0..200 {
            let (sent, completed, failed) = acc.counts();
            assert!(completed + failed <= sent);
        }

        for writer in writers {
            writer.join().unwrap();
        }

        let (sent, completed, failed) = acc.counts();
        assert_eq!(sent, 4000);
        assert_eq!(completed + failed, 4000);
    }
}
