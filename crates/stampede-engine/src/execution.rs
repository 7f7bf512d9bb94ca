//! The live record of one test run.
//!
//! A [`TestExecution`] is the aggregate root shared by the orchestrator, the
//! load pattern engine, the metrics aggregator and every virtual user. It owns
//! the request accumulator, the user list, the sample history and the
//! violation log, and gates every status change through
//! [`TestExecution::advance_status`].

use crate::accumulator::MetricsAccumulator;
use crate::virtual_user::VirtualUser;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use stampede_core::{
    MetricsSample, ScenarioConfig, Severity, SummaryStatistics, TestId, TestResult, TestStatus,
    ThresholdViolation, VirtualUserCounts, VirtualUserStatus,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct RunClock {
    wall: DateTime<Utc>,
    started_at: Instant,
}

impl RunClock {
    fn now() -> Self {
        Self {
            wall: Utc::now(),
            started_at: Instant::now(),
        }
    }
}

#[derive(Debug)]
pub struct TestExecution {
    id: TestId,
    scenario: Arc<ScenarioConfig>,
    /// Reset when the measured run starts, so warmup is not counted.
    clock: Mutex<RunClock>,
    status: RwLock<TestStatus>,
    accumulator: MetricsAccumulator,
    users: RwLock<Vec<Arc<VirtualUser>>>,
    samples: RwLock<Vec<MetricsSample>>,
    violations: RwLock<Vec<ThresholdViolation>>,
    result: RwLock<Option<TestResult>>,
    stop_signal: Notify,
}

impl TestExecution {
    pub fn new(id: TestId, scenario: Arc<ScenarioConfig>) -> Self {
        Self {
            id,
            scenario,
            clock: Mutex::new(RunClock::now()),
            status: RwLock::new(TestStatus::Initializing),
            accumulator: MetricsAccumulator::new(),
            users: RwLock::new(Vec::new()),
            samples: RwLock::new(Vec::new()),
            violations: RwLock::new(Vec::new()),
            result: RwLock::new(None),
            stop_signal: Notify::new(),
        }
    }

    pub fn id(&self) -> TestId {
        self.id
    }

    pub fn scenario(&self) -> &Arc<ScenarioConfig> {
        &self.scenario
    }

    pub fn accumulator(&self) -> &MetricsAccumulator {
        &self.accumulator
    }

    pub fn status(&self) -> TestStatus {
        *self.status.read()
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.clock.lock().wall
    }

    /// Time since the measured run started.
    pub fn elapsed(&self) -> Duration {
        self.clock.lock().started_at.elapsed()
    }

    /// Move the run forward to `next`.
    ///
    /// Returns false, leaving the status untouched, if the transition would
    /// revert or leave a terminal state. Entering `Running` restarts the run
    /// clock; entering `Stopping` wakes everything waiting on
    /// [`TestExecution::stop_requested`].
    pub fn advance_status(&self, next: TestStatus) -> bool {
        {
            let mut status = self.status.write();
            if !status.can_advance_to(next) {
                return false;
            }
            *status = next;
        }

        if next == TestStatus::Running {
            *self.clock.lock() = RunClock::now();
        }
        if next.is_stop_requested() || next.is_terminal() {
            self.stop_signal.notify_waiters();
        }
        tracing::debug!(test_id = %self.id, status = %next, "Test status changed");
        true
    }

    pub fn is_stop_requested(&self) -> bool {
        self.status().is_stop_requested()
    }

    /// Flip the run to `Stopping`. Returns false if it was already stopping
    /// or finished.
    pub fn request_stop(&self) -> bool {
        self.advance_status(TestStatus::Stopping)
    }

    /// Resolves once a stop has been requested (or the run is terminal).
    pub async fn stop_requested(&self) {
        loop {
            let notified = self.stop_signal.notified();
            let status = self.status();
            if status.is_stop_requested() || status.is_terminal() {
                return;
            }
            notified.await;
        }
    }

    pub fn add_user(&self, user: Arc<VirtualUser>) {
        self.users.write().push(user);
    }

    pub fn user_total(&self) -> usize {
        self.users.read().len()
    }

    /// Clone of the user list in spawn order.
    pub fn users_snapshot(&self) -> Vec<Arc<VirtualUser>> {
        self.users.read().clone()
    }

    pub fn active_user_count(&self) -> u32 {
        self.users.read().iter().filter(|u| u.is_active()).count() as u32
    }

    pub fn user_counts(&self) -> VirtualUserCounts {
        let users = self.users.read();
        let mut counts = VirtualUserCounts {
            total: users.len() as u32,
            ..Default::default()
        };
        for user in users.iter() {
            match user.status() {
                VirtualUserStatus::Active => counts.active += 1,
                VirtualUserStatus::Completed => counts.completed += 1,
                VirtualUserStatus::Failed => counts.failed += 1,
                VirtualUserStatus::Stopping => {}
            }
        }
        counts
    }

    /// Append a sample, forcing its timestamp strictly past the previous one.
    pub fn append_sample(&self, mut sample: MetricsSample) -> MetricsSample {
        let mut samples = self.samples.write();
        if let Some(last) = samples.last() {
            if sample.timestamp <= last.timestamp {
                sample.timestamp = last.timestamp + chrono::Duration::microseconds(1);
            }
        }
        samples.push(sample.clone());
        sample
    }

    pub fn latest_sample(&self) -> Option<MetricsSample> {
        self.samples.read().last().cloned()
    }

    pub fn samples(&self) -> Vec<MetricsSample> {
        self.samples.read().clone()
    }

    pub fn record_violations(&self, violations: &[ThresholdViolation]) {
        if violations.is_empty() {
            return;
        }
        self.violations.write().extend_from_slice(violations);
    }

    pub fn violations(&self) -> Vec<ThresholdViolation> {
        self.violations.read().clone()
    }

    pub fn set_result(&self, result: TestResult) {
        *self.result.write() = Some(result);
    }

    pub fn result(&self) -> Option<TestResult> {
        self.result.read().clone()
    }

    /// Build the final result from everything recorded so far.
    pub fn build_result(&self, status: TestStatus) -> TestResult {
        let snapshot = self.accumulator.snapshot();
        let stats = snapshot.response_time_stats();
        let samples = self.samples();
        let violations = self.violations();
        let users = self.users_snapshot();
        let elapsed = self.elapsed();
        let elapsed_secs = elapsed.as_secs_f64();

        let peak_virtual_users = samples
            .iter()
            .map(|s| s.virtual_users.active)
            .max()
            .unwrap_or(0);
        let average_virtual_users = if samples.is_empty() {
            0.0
        } else {
            samples
                .iter()
                .map(|s| f64::from(s.virtual_users.active))
                .sum::<f64>()
                / samples.len() as f64
        };
        let per_second = |value: f64| {
            if elapsed_secs > 0.0 {
                value / elapsed_secs
            } else {
                0.0
            }
        };

        let summary = SummaryStatistics {
            total_requests: snapshot.requests_sent,
            successful_requests: snapshot.requests_completed,
            failed_requests: snapshot.requests_failed,
            error_rate: snapshot.error_rate(),
            average_response_time: stats.average,
            min_response_time: stats.min,
            max_response_time: stats.max,
            p50_response_time: stats.p50,
            p95_response_time: stats.p95,
            p99_response_time: stats.p99,
            requests_per_second: per_second(snapshot.requests_completed as f64),
            bytes_transferred: snapshot.bytes_transferred,
            bytes_per_second: per_second(snapshot.bytes_transferred as f64),
            peak_virtual_users,
            average_virtual_users,
            total_virtual_users: users.len() as u32,
            efficiency: if snapshot.requests_sent == 0 {
                0.0
            } else {
                snapshot.requests_completed as f64 / snapshot.requests_sent as f64
            },
        };

        // A run that never sent a request has nothing to pass on
        let passed = status == TestStatus::Completed
            && snapshot.requests_sent > 0
            && !violations.iter().any(|v| v.severity == Severity::Critical);
        let start_time = self.start_time();

        TestResult {
            test_id: self.id,
            scenario_id: self.scenario.id.clone(),
            scenario_name: self.scenario.name.clone(),
            test_type: self.scenario.test_type,
            status,
            start_time,
            end_time: start_time
                + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero()),
            duration_ms: elapsed.as_millis() as u64,
            summary,
            error_breakdown: snapshot.error_types,
            metrics: samples,
            violations,
            virtual_users: users.iter().map(|u| u.summary()).collect(),
            passed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stampede_core::{ScenarioBuilder, TestType};

    fn execution() -> TestExecution {
        let scenario = ScenarioBuilder::new("exec", TestType::Load)
            .url("http://localhost/")
            .build()
            .unwrap();
        TestExecution::new(TestId::new(), Arc::new(scenario))
    }

    fn sample_at(timestamp: DateTime<Utc>) -> MetricsSample {
        MetricsSample {
            timestamp,
            elapsed_ms: 0,
            virtual_users: VirtualUserCounts::default(),
            requests: Default::default(),
            response_times: Default::default(),
            throughput: Default::default(),
            errors: Default::default(),
            system: None,
        }
    }

    #[test]
    fn test_status_only_moves_forward() {
        let exec = execution();
        assert!(exec.advance_status(TestStatus::Running));
        assert!(!exec.advance_status(TestStatus::Initializing));
        assert!(exec.request_stop());
        assert!(!exec.request_stop());
        assert!(exec.advance_status(TestStatus::Stopped));
        assert!(!exec.advance_status(TestStatus::Completed));
        assert_eq!(exec.status(), TestStatus::Stopped);
    }

    #[test]
    fn test_sample_timestamps_strictly_increase() {
        let exec = execution();
        let now = Utc::now();
        let first = exec.append_sample(sample_at(now));
        let second = exec.append_sample(sample_at(now));
        let third = exec.append_sample(sample_at(now - chrono::Duration::seconds(1)));

        assert!(second.timestamp > first.timestamp);
        assert!(third.timestamp > second.timestamp);
        assert_eq!(exec.samples().len(), 3);
        assert_eq!(exec.latest_sample().unwrap().timestamp, third.timestamp);
    }

    #[tokio::test]
    async fn test_stop_requested_wakes_waiters() {
        let exec = Arc::new(execution());
        exec.advance_status(TestStatus::Running);

        let waiter = {
            let exec = Arc::clone(&exec);
            tokio::spawn(async move { exec.stop_requested().await })
        };
        tokio::task::yield_now().await;
        exec.request_stop();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_user_counts() {
        let exec = execution();
        let users: Vec<_> = (0..4).map(|i| Arc::new(VirtualUser::new(i))).collect();
        for user in &users {
            exec.add_user(Arc::clone(user));
        }
        users[0].request_stop();
        users[1].transition(VirtualUserStatus::Completed);
        users[2].mark_failed();

        let counts = exec.user_counts();
        assert_eq!(counts.total, 4);
        assert_eq!(counts.active, 1);
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(exec.active_user_count(), 1);
    }

    #[test]
    fn test_build_result_passes_without_critical_violations() {
        let exec = execution();
        exec.advance_status(TestStatus::Running);
        exec.accumulator().record_sent();
        exec.accumulator()
            .record_success(Duration::from_millis(40), 512);
        exec.record_violations(&[ThresholdViolation {
            timestamp: Utc::now(),
            metric: "average_response_time".into(),
            actual_value: 40.0,
            threshold_value: 10.0,
            severity: Severity::Warning,
            description: String::new(),
        }]);

        let result = exec.build_result(TestStatus::Completed);
        assert!(result.passed);
        assert_eq!(result.summary.total_requests, 1);
        assert_eq!(result.summary.bytes_transferred, 512);
        assert_eq!(result.summary.efficiency, 1.0);

        assert!(!exec.build_result(TestStatus::Stopped).passed);
    }

    #[test]
    fn test_build_result_without_requests_does_not_pass() {
        let exec = execution();
        exec.advance_status(TestStatus::Running);
        let user = Arc::new(VirtualUser::new(0));
        exec.add_user(Arc::clone(&user));
        user.mark_failed();

        let result = exec.build_result(TestStatus::Completed);
        assert_eq!(result.summary.total_requests, 0);
        assert!(!result.passed);
    }
}
