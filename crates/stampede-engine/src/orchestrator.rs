//! Test run orchestrator
//!
//! Owns every live [`TestExecution`] and drives each one through its
//! lifecycle: validate, warm up, run the load pattern with periodic sampling,
//! cool down, take a final sample, build the result, and keep it queryable
//! for the retention window.

use crate::aggregator::MetricsAggregator;
use crate::execution::TestExecution;
use crate::pattern::LoadPatternEngine;
use crate::report::{ReportFormat, ReportGenerator};
use parking_lot::{Mutex, RwLock};
use stampede_core::metrics::TEST_RUNS;
use stampede_core::{
    EngineConfig, LoadConfig, MetricsSample, ReportSink, RequestExecutor, RequestTemplate,
    ScenarioConfig, StampedeError, StampedeResult, TestId, TestResult, TestStatus,
    VirtualUserStatus,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::Instrument;

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How a stop request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Every virtual user reached a terminal state in time.
    Quiesced,
    /// Some users were still running when the stop timeout expired; the run
    /// was marked stopped anyway.
    TimedOut,
}

/// Handle to a run started with [`TestRunOrchestrator::spawn_scenario`].
#[derive(Debug)]
pub struct RunHandle {
    test_id: TestId,
    handle: JoinHandle<StampedeResult<TestResult>>,
}

impl RunHandle {
    pub fn test_id(&self) -> TestId {
        self.test_id
    }

    /// Wait for the run to finish.
    ///
    /// # Errors
    ///
    /// Returns the run's own error, or an execution error if its task
    /// panicked or was cancelled.
    pub async fn join(self) -> StampedeResult<TestResult> {
        self.handle
            .await
            .map_err(|e| StampedeError::execution(format!("test run task failed: {e}")))?
    }
}

struct Inner {
    config: EngineConfig,
    executor: Arc<dyn RequestExecutor>,
    sink: Arc<dyn ReportSink>,
    reports: ReportGenerator,
    executions: RwLock<HashMap<TestId, Arc<TestExecution>>>,
    retention: Mutex<HashMap<TestId, JoinHandle<()>>>,
}

/// Entry point for running performance tests.
///
/// Cheap to clone; clones share the same set of executions.
#[derive(Clone)]
pub struct TestRunOrchestrator {
    inner: Arc<Inner>,
}

impl TestRunOrchestrator {
    pub fn new(
        config: EngineConfig,
        executor: Arc<dyn RequestExecutor>,
        sink: Arc<dyn ReportSink>,
    ) -> Self {
        let reports = ReportGenerator::new(config.report.output_dir.clone());
        Self {
            inner: Arc::new(Inner {
                config,
                executor,
                sink,
                reports,
                executions: RwLock::new(HashMap::new()),
                retention: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Run `scenario` to completion on the current task.
    ///
    /// # Errors
    ///
    /// Returns a validation error before anything starts, or the error that
    /// made the run fail (the run is then recorded as `failed`).
    pub async fn run_scenario(&self, scenario: ScenarioConfig) -> StampedeResult<TestResult> {
        let execution = self.register(scenario)?;
        Inner::drive(&self.inner, execution).await
    }

    /// Validate and register `scenario`, then run it on a background task.
    ///
    /// # Errors
    ///
    /// Returns a validation error synchronously; run errors surface through
    /// [`RunHandle::join`].
    pub fn spawn_scenario(&self, scenario: ScenarioConfig) -> StampedeResult<RunHandle> {
        let execution = self.register(scenario)?;
        let test_id = execution.id();
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move { Inner::drive(&inner, execution).await });

        Ok(RunHandle { test_id, handle })
    }

    fn register(&self, scenario: ScenarioConfig) -> StampedeResult<Arc<TestExecution>> {
        scenario.validate()?;

        let execution = Arc::new(TestExecution::new(TestId::new(), Arc::new(scenario)));
        let mut executions = self.inner.executions.write();
        if executions.contains_key(&execution.id()) {
            return Err(StampedeError::already_exists(
                "test",
                execution.id().to_string(),
            ));
        }
        executions.insert(execution.id(), Arc::clone(&execution));

        Ok(execution)
    }

    fn find(&self, test_id: TestId) -> StampedeResult<Arc<TestExecution>> {
        self.inner
            .executions
            .read()
            .get(&test_id)
            .cloned()
            .ok_or_else(|| StampedeError::not_found("test", test_id.to_string()))
    }

    /// Stop a running test.
    ///
    /// Flips the run and all of its users to stopping, waits up to
    /// `run.stop_timeout_secs` for the users to finish, then marks the run
    /// stopped either way.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown id and `InvalidState` if the run
    /// has already finished.
    pub async fn stop_test(&self, test_id: TestId) -> StampedeResult<StopOutcome> {
        let execution = self.find(test_id)?;
        if execution.status().is_terminal() {
            return Err(StampedeError::invalid_state(format!(
                "test {test_id} has already finished ({})",
                execution.status()
            )));
        }

        tracing::info!(test_id = %test_id, "Stopping test");
        execution.request_stop();
        for user in execution.users_snapshot() {
            user.request_stop();
        }

        let deadline = Instant::now() + self.inner.config.run.stop_timeout();
        let outcome = loop {
            // Deadline first: at that instant the engine may be aborting users
            if Instant::now() >= deadline {
                break StopOutcome::TimedOut;
            }
            let quiesced = execution
                .users_snapshot()
                .iter()
                .all(|u| u.status().is_terminal());
            if quiesced {
                break StopOutcome::Quiesced;
            }
            tokio::time::sleep(STOP_POLL_INTERVAL).await;
        };

        if outcome == StopOutcome::TimedOut {
            tracing::warn!(
                test_id = %test_id,
                timeout_secs = self.inner.config.run.stop_timeout_secs,
                "Virtual users did not quiesce before stop timeout"
            );
        }
        execution.advance_status(TestStatus::Stopped);

        Ok(outcome)
    }

    /// Latest sample of a running test; `None` when unknown or finished.
    pub fn get_real_time_metrics(&self, test_id: TestId) -> Option<MetricsSample> {
        let execution = self.find(test_id).ok()?;
        if execution.status().is_terminal() {
            return None;
        }
        execution.latest_sample()
    }

    /// Final result of a finished test still inside its retention window.
    pub fn get_result(&self, test_id: TestId) -> Option<TestResult> {
        self.find(test_id).ok()?.result()
    }

    pub fn status(&self, test_id: TestId) -> Option<TestStatus> {
        self.find(test_id).ok().map(|e| e.status())
    }

    /// Write the result of a finished test to the report directory.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown id, `InvalidState` while the test is
    /// still running, or the rendering/I/O error.
    pub fn export_results(&self, test_id: TestId, format: ReportFormat) -> StampedeResult<PathBuf> {
        let result = self.find(test_id)?.result().ok_or_else(|| {
            StampedeError::invalid_state(format!("test {test_id} has not finished yet"))
        })?;
        self.inner.reports.write(&result, format)
    }

    /// Dump the Prometheus registry alongside a finished test's reports.
    ///
    /// # Errors
    ///
    /// Same as [`Self::export_results`].
    pub fn export_metrics(&self, test_id: TestId) -> StampedeResult<PathBuf> {
        let result = self.find(test_id)?.result().ok_or_else(|| {
            StampedeError::invalid_state(format!("test {test_id} has not finished yet"))
        })?;
        self.inner.reports.write_metrics(&result)
    }

    /// Ids of tests that have not reached a terminal state.
    pub fn active_tests(&self) -> Vec<TestId> {
        self.inner
            .executions
            .read()
            .values()
            .filter(|e| !e.status().is_terminal())
            .map(|e| e.id())
            .collect()
    }

    /// Stop every running test and cancel pending retention timers.
    pub async fn shutdown(&self) {
        for test_id in self.active_tests() {
            if let Err(e) = self.stop_test(test_id).await {
                tracing::debug!(test_id = %test_id, error = %e, "Stop during shutdown failed");
            }
        }

        for (_, handle) in self.inner.retention.lock().drain() {
            handle.abort();
        }
        tracing::info!("Orchestrator shut down");
    }
}

impl Inner {
    async fn drive(
        inner: &Arc<Self>,
        execution: Arc<TestExecution>,
    ) -> StampedeResult<TestResult> {
        let span = tracing::info_span!(
            "test_run",
            test_id = %execution.id(),
            scenario = %execution.scenario().name
        );

        async {
            let test_id = execution.id();
            inner.sink.session_started(test_id, execution.scenario());

            // Run on its own task so a panic still finalizes the run
            let task = {
                let inner = Arc::clone(inner);
                let execution = Arc::clone(&execution);
                tokio::spawn(async move { inner.execute(&execution).await }.in_current_span())
            };
            let outcome = task.await.unwrap_or_else(|e| {
                Err(StampedeError::execution(format!("test run task failed: {e}")))
            });

            let status = match &outcome {
                Ok(()) if execution.is_stop_requested() => TestStatus::Stopped,
                Ok(()) => TestStatus::Completed,
                Err(e) => {
                    tracing::error!(error = %e, "Test run failed");
                    inner.sink.error(test_id, &e.to_string());
                    for user in execution.users_snapshot() {
                        if !user.status().is_terminal() {
                            user.mark_failed();
                        }
                    }
                    TestStatus::Failed
                }
            };
            // A concurrent stop may already have moved the run to stopped
            execution.advance_status(status);
            let status = execution.status();

            let result = execution.build_result(status);
            execution.set_result(result.clone());
            inner.sink.session_finished(&result);
            TEST_RUNS.with_label_values(&[status.as_str()]).inc();
            Self::schedule_retention(inner, test_id);

            outcome.map(|()| result)
        }
        .instrument(span)
        .await
    }

    async fn execute(&self, execution: &Arc<TestExecution>) -> StampedeResult<()> {
        let scenario = Arc::clone(execution.scenario());
        let template = scenario.request_or_default();
        let think_time = scenario
            .load
            .think_time_or(self.config.run.default_think_time_ms);

        if let Some(requests) = scenario.warmup_requests.filter(|n| *n > 0) {
            self.warmup(execution, requests, &template, think_time)
                .await?;
        }

        if !execution.advance_status(TestStatus::Running) {
            tracing::info!("Test stopped before the load phase");
            return Ok(());
        }
        self.sink.progress(execution.id(), "Load phase started");

        let aggregator = Arc::new(MetricsAggregator::new(
            self.config.metrics.sample_interval(),
            self.config.metrics.collect_system,
        ));
        let sampler = Arc::clone(&aggregator).spawn(execution);

        let engine = LoadPatternEngine::new(
            Arc::clone(execution),
            Arc::clone(&self.executor),
            template,
            think_time,
        )
        .with_grace(self.config.run.stop_timeout());

        if let Err(e) = engine.run(&scenario.load).await {
            sampler.abort();
            return Err(e);
        }

        if !execution.is_stop_requested() {
            let users = execution.users_snapshot();
            let (sent, _, _) = execution.accumulator().counts();
            if !users.is_empty()
                && sent == 0
                && users
                    .iter()
                    .all(|u| u.status() == VirtualUserStatus::Failed)
            {
                sampler.abort();
                return Err(StampedeError::execution(format!(
                    "all {} virtual users failed before sending a request",
                    users.len()
                )));
            }
        }

        if let Some(cooldown) = scenario.cooldown() {
            if !execution.is_stop_requested() {
                self.sink.progress(execution.id(), "Cooling down");
                tokio::select! {
                    _ = tokio::time::sleep(cooldown) => {}
                    _ = execution.stop_requested() => {}
                }
            }
        }

        sampler.abort();
        let last = aggregator.record_sample(execution);
        tracing::info!(
            requests = last.requests.sent,
            completed = last.requests.completed,
            failed = last.requests.failed,
            avg_ms = last.response_times.average,
            rps = last.throughput.requests_per_second,
            "Load phase finished"
        );

        Ok(())
    }

    /// Short constant-load run against a throwaway execution so connection
    /// setup and caches do not skew the measured run.
    async fn warmup(
        &self,
        execution: &Arc<TestExecution>,
        requests: u32,
        template: &RequestTemplate,
        think_time: Duration,
    ) -> StampedeResult<()> {
        let scenario = execution.scenario();
        let users = self.config.warmup.users_for(scenario.load.virtual_users);
        let per_user = u64::from(requests.div_ceil(users));
        let load = LoadConfig {
            think_time: scenario.load.think_time,
            ..LoadConfig::constant(users, self.config.warmup.duration_secs())
        };

        let warmup = Arc::new(TestExecution::new(
            TestId::new(),
            Arc::new(ScenarioConfig {
                load: load.clone(),
                warmup_requests: None,
                cooldown_time: None,
                ..(**scenario).clone()
            }),
        ));
        warmup.advance_status(TestStatus::Running);

        tracing::info!(users, requests, per_user, "Warmup started");
        let engine = LoadPatternEngine::new(
            Arc::clone(&warmup),
            Arc::clone(&self.executor),
            template.clone(),
            think_time,
        )
        .with_max_iterations(per_user)
        .with_grace(self.config.run.stop_timeout());

        let run = engine.run(&load);
        tokio::pin!(run);
        let result = tokio::select! {
            result = &mut run => result,
            _ = execution.stop_requested() => {
                warmup.request_stop();
                run.await
            }
        };

        let (sent, completed, failed) = warmup.accumulator().counts();
        warmup.advance_status(TestStatus::Completed);
        tracing::info!(sent, completed, failed, "Warmup finished");
        self.sink
            .progress(execution.id(), &format!("Warmup finished: {sent} requests"));

        result
    }

    fn schedule_retention(inner: &Arc<Self>, test_id: TestId) {
        let weak: Weak<Self> = Arc::downgrade(inner);
        let retention = inner.config.run.retention();

        // Held across spawn and insert so the expiry cannot remove first
        let mut timers = inner.retention.lock();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            if let Some(inner) = weak.upgrade() {
                inner.executions.write().remove(&test_id);
                inner.retention.lock().remove(&test_id);
                tracing::debug!(test_id = %test_id, "Test execution expired");
            }
        });
        timers.insert(test_id, handle);
    }
}
