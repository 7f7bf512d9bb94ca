//! End-to-end load pattern behavior against the mock executor.
//!
//! All tests run on a paused tokio clock, so minutes of simulated load finish
//! in milliseconds of wall time.

use stampede_core::{
    CustomStep, EngineConfig, LoadPattern, MetricsSample, ScenarioBuilder, ScenarioConfig,
    TestStatus, TestType, TracingReportSink, VirtualUserStatus,
};
use stampede_engine::{MockConfig, MockExecutor, TestRunOrchestrator};
use std::sync::Arc;
use std::time::Duration;

fn orchestrator(latency_ms: u64, sample_interval_ms: u64) -> TestRunOrchestrator {
    let mut config = EngineConfig::default();
    config.metrics.collect_system = false;
    config.metrics.sample_interval_ms = sample_interval_ms;

    let executor = MockExecutor::new(MockConfig::with_latency(Duration::from_millis(
        latency_ms,
    )));
    TestRunOrchestrator::new(config, Arc::new(executor), Arc::new(TracingReportSink))
}

fn scenario(pattern: LoadPattern, users: u32, secs: u64, think_ms: u64) -> ScenarioConfig {
    ScenarioBuilder::new(format!("{pattern} pattern"), TestType::Load)
        .url("http://localhost:8080/")
        .pattern(pattern)
        .virtual_users(users)
        .duration_secs(secs)
        .think_time_ms(think_ms)
        .build_unchecked()
}

fn assert_counter_invariants(samples: &[MetricsSample], users: u32) {
    for sample in samples {
        assert!(
            sample.virtual_users.active <= users,
            "active {} > {users} at {}ms",
            sample.virtual_users.active,
            sample.elapsed_ms
        );
        assert!(sample.requests.completed + sample.requests.failed <= sample.requests.sent);
        assert!(sample.response_times.p50 <= sample.response_times.p95);
        assert!(sample.response_times.p95 <= sample.response_times.p99);
    }
    for pair in samples.windows(2) {
        assert!(pair[1].timestamp > pair[0].timestamp);
        assert!(pair[1].requests.sent >= pair[0].requests.sent);
    }
}

#[tokio::test(start_paused = true)]
async fn constant_load_with_zero_think_time() {
    let orch = orchestrator(10, 1000);

    let result = orch
        .run_scenario(scenario(LoadPattern::Constant, 5, 2, 0))
        .await
        .unwrap();

    assert_eq!(result.status, TestStatus::Completed);
    assert!(result.summary.total_requests >= 5);
    assert_eq!(result.virtual_users.len(), 5);
    assert!(result
        .virtual_users
        .iter()
        .all(|u| u.status == VirtualUserStatus::Completed && u.request_count > 0));
    assert_eq!(result.summary.peak_virtual_users, 5);
    assert_counter_invariants(&result.metrics, 5);
}

#[tokio::test(start_paused = true)]
async fn ramp_up_reaches_target_at_end_of_ramp() {
    let orch = orchestrator(20, 1000);
    let mut s = scenario(LoadPattern::RampUp, 10, 10, 100);
    s.load.ramp_up_time = Some(5);

    let result = orch.run_scenario(s).await.unwrap();

    let first = &result.metrics[0];
    assert!(first.virtual_users.active <= 3);

    let at_five = result
        .metrics
        .iter()
        .find(|s| s.elapsed_ms >= 5000)
        .unwrap();
    assert_eq!(at_five.virtual_users.active, 10);
    assert_eq!(result.summary.peak_virtual_users, 10);
    assert_eq!(result.summary.total_virtual_users, 10);
    assert_counter_invariants(&result.metrics, 10);
}

#[tokio::test(start_paused = true)]
async fn spike_bursts_to_full_population() {
    let orch = orchestrator(50, 1000);

    let result = orch
        .run_scenario(scenario(LoadPattern::Spike, 20, 60, 500))
        .await
        .unwrap();

    let peak = result
        .metrics
        .iter()
        .map(|s| s.virtual_users.active)
        .max()
        .unwrap();
    assert_eq!(peak, 20);

    let baseline = result
        .metrics
        .iter()
        .find(|s| s.elapsed_ms == 10_000)
        .unwrap();
    assert_eq!(baseline.virtual_users.active, 2);

    let after = result
        .metrics
        .iter()
        .find(|s| s.elapsed_ms == 50_000)
        .unwrap();
    assert_eq!(after.virtual_users.active, 2);
    assert_counter_invariants(&result.metrics, 20);
}

#[tokio::test(start_paused = true)]
async fn ramp_down_shrinks_oldest_first() {
    let orch = orchestrator(20, 1000);

    let result = orch
        .run_scenario(scenario(LoadPattern::RampDown, 10, 25, 200))
        .await
        .unwrap();

    // Ramp steps every 1.25s: full population from 11.25s, first decrement at 13.75s
    let at_half = result
        .metrics
        .iter()
        .find(|s| s.elapsed_ms == 12_000)
        .unwrap();
    assert_eq!(at_half.virtual_users.active, 10);

    let late = result
        .metrics
        .iter()
        .find(|s| s.elapsed_ms == 24_000)
        .unwrap();
    assert_eq!(late.virtual_users.active, 1);

    // The survivor is the most recently spawned user
    let longest_lived = result
        .virtual_users
        .iter()
        .max_by_key(|u| u.end_time)
        .unwrap();
    assert_eq!(longest_lived.id, result.virtual_users[9].id);
    assert_counter_invariants(&result.metrics, 10);
}

#[tokio::test(start_paused = true)]
async fn active_users_never_exceed_target() {
    let steps = vec![
        CustomStep {
            target_users: 3,
            duration_seconds: 5,
        },
        CustomStep {
            target_users: 50,
            duration_seconds: 5,
        },
        CustomStep {
            target_users: 0,
            duration_seconds: 5,
        },
        CustomStep {
            target_users: 7,
            duration_seconds: 5,
        },
    ];

    for pattern in [
        LoadPattern::Constant,
        LoadPattern::RampUp,
        LoadPattern::RampDown,
        LoadPattern::Step,
        LoadPattern::Spike,
        LoadPattern::Custom,
    ] {
        let orch = orchestrator(15, 500);
        let mut s = scenario(pattern, 7, 20, 150);
        if pattern == LoadPattern::Custom {
            s.load.steps = Some(steps.clone());
        }

        let result = orch.run_scenario(s).await.unwrap();

        assert_eq!(result.status, TestStatus::Completed, "{pattern}");
        assert!(result.summary.peak_virtual_users <= 7, "{pattern}");
        assert!(!result.metrics.is_empty());
        assert_counter_invariants(&result.metrics, 7);
    }
}

#[tokio::test(start_paused = true)]
async fn failures_keep_counters_consistent() {
    let mut config = EngineConfig::default();
    config.metrics.collect_system = false;
    let executor = MockExecutor::new(MockConfig {
        failure_rate: 0.3,
        ..MockConfig::with_latency(Duration::from_millis(25))
    });
    let orch = TestRunOrchestrator::new(config, Arc::new(executor), Arc::new(TracingReportSink));

    let result = orch
        .run_scenario(scenario(LoadPattern::Constant, 4, 5, 50))
        .await
        .unwrap();

    let summary = &result.summary;
    assert_eq!(
        summary.successful_requests + summary.failed_requests,
        summary.total_requests
    );
    assert!(summary.failed_requests > 0);
    assert_eq!(
        result.error_breakdown.get("http_500").copied(),
        Some(summary.failed_requests)
    );
    assert_counter_invariants(&result.metrics, 4);
}
