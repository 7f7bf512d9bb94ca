//! Orchestrator lifecycle: thresholds, stop, export.

use stampede_core::{
    EngineConfig, ResponseTimeThresholds, ScenarioBuilder, ScenarioConfig, Severity, TestStatus,
    TestType, ThresholdSet, TracingReportSink, VirtualUserStatus,
};
use stampede_engine::{
    MockConfig, MockExecutor, ReportFormat, ReportGenerator, StopOutcome, TestRunOrchestrator,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.metrics.collect_system = false;
    config.run.stop_timeout_secs = 2;
    config
}

fn orchestrator(config: EngineConfig, latency: Duration) -> TestRunOrchestrator {
    TestRunOrchestrator::new(
        config,
        Arc::new(MockExecutor::new(MockConfig::with_latency(latency))),
        Arc::new(TracingReportSink),
    )
}

fn scenario(users: u32, secs: u64) -> ScenarioConfig {
    ScenarioBuilder::new("Lifecycle Check", TestType::Load)
        .url("http://localhost:8080/health")
        .virtual_users(users)
        .duration_secs(secs)
        .think_time_ms(100)
        .build()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn average_threshold_raises_warning_after_first_interval() {
    let orch = orchestrator(config(), Duration::from_millis(200));
    let mut s = scenario(2, 3);
    s.thresholds = ThresholdSet {
        response_time: Some(ResponseTimeThresholds {
            average: Some(50.0),
            ..Default::default()
        }),
        ..Default::default()
    };

    let result = orch.run_scenario(s).await.unwrap();

    let first = &result.violations[0];
    assert_eq!(first.metric, "average_response_time");
    assert_eq!(first.severity, Severity::Warning);
    assert_eq!(first.threshold_value, 50.0);
    assert!((first.actual_value - 200.0).abs() < 1.0);
    assert_eq!(first.timestamp, result.metrics[0].timestamp);
    assert_eq!(result.metrics[0].elapsed_ms, 1000);

    // Warnings alone do not fail a run
    assert!(result.passed);
    assert_eq!(result.critical_violations(), 0);
}

#[tokio::test(start_paused = true)]
async fn critical_threshold_fails_run() {
    let orch = orchestrator(config(), Duration::from_millis(200));
    let mut s = scenario(1, 2);
    s.thresholds.response_time = Some(ResponseTimeThresholds {
        p95: Some(100.0),
        ..Default::default()
    });

    let result = orch.run_scenario(s).await.unwrap();

    assert_eq!(result.status, TestStatus::Completed);
    assert!(result.critical_violations() > 0);
    assert!(!result.passed);
}

#[tokio::test(start_paused = true)]
async fn stop_is_bounded_with_slow_users() {
    let orch = orchestrator(config(), Duration::from_secs(30));
    let handle = orch.spawn_scenario(scenario(3, 600)).unwrap();
    let test_id = handle.test_id();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(orch.status(test_id), Some(TestStatus::Running));

    let started = Instant::now();
    let outcome = orch.stop_test(test_id).await.unwrap();
    let waited = started.elapsed();

    assert_eq!(outcome, StopOutcome::TimedOut);
    assert!(waited >= Duration::from_secs(2));
    assert!(waited < Duration::from_secs(3));
    assert_eq!(orch.status(test_id), Some(TestStatus::Stopped));

    let result = handle.join().await.unwrap();
    assert_eq!(result.status, TestStatus::Stopped);
    assert!(result
        .virtual_users
        .iter()
        .all(|u| u.status == VirtualUserStatus::Failed));
    assert_eq!(result.summary.successful_requests, 0);
}

#[tokio::test(start_paused = true)]
async fn real_time_metrics_while_running() {
    let orch = orchestrator(config(), Duration::from_millis(20));
    let handle = orch.spawn_scenario(scenario(4, 30)).unwrap();
    let test_id = handle.test_id();

    tokio::time::sleep(Duration::from_millis(2500)).await;
    let sample = orch.get_real_time_metrics(test_id).unwrap();
    assert_eq!(sample.elapsed_ms, 2000);
    assert_eq!(sample.virtual_users.active, 4);
    assert!(sample.requests.sent > 0);
    assert!(orch.get_result(test_id).is_none());

    orch.stop_test(test_id).await.unwrap();
    handle.join().await.unwrap();
    assert!(orch.get_real_time_metrics(test_id).is_none());
}

#[tokio::test(start_paused = true)]
async fn json_export_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config();
    config.report.output_dir = dir.path().to_path_buf();
    let orch = orchestrator(config, Duration::from_millis(30));

    let result = orch.run_scenario(scenario(3, 4)).await.unwrap();
    let json_path = orch
        .export_results(result.test_id, ReportFormat::Json)
        .unwrap();
    let csv_path = orch
        .export_results(result.test_id, ReportFormat::Csv)
        .unwrap();

    let parsed =
        ReportGenerator::parse_json(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
    assert_eq!(parsed.test_id, result.test_id);
    assert_eq!(parsed.status, result.status);
    assert_eq!(parsed.summary.total_requests, result.summary.total_requests);
    assert_eq!(
        parsed.summary.successful_requests,
        result.summary.successful_requests
    );
    assert_eq!(parsed.summary.failed_requests, result.summary.failed_requests);
    assert_eq!(parsed.metrics.len(), result.metrics.len());
    assert_eq!(parsed.virtual_users.len(), 3);

    let csv = std::fs::read_to_string(&csv_path).unwrap();
    assert_eq!(csv.lines().count(), result.metrics.len() + 1);
    assert!(json_path
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("lifecycle-check-"));
}
