//! Report generation for finalized test results

use serde::Serialize;
use stampede_core::metrics::gather_metrics;
use stampede_core::{StampedeError, StampedeResult, TestResult};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Report format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportFormat {
    Markdown,
    Csv,
    Json,
}

impl ReportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Markdown => "md",
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }
}

impl FromStr for ReportFormat {
    type Err = StampedeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "markdown" | "md" => Ok(Self::Markdown),
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            other => Err(StampedeError::validation(format!(
                "unknown report format '{other}'"
            ))),
        }
    }
}

/// One CSV row per metrics sample.
#[derive(Debug, Serialize)]
struct SampleRow {
    timestamp: String,
    elapsed_ms: u64,
    active_users: u32,
    total_users: u32,
    requests_sent: u64,
    requests_completed: u64,
    requests_failed: u64,
    requests_pending: u64,
    avg_response_ms: f64,
    min_response_ms: f64,
    max_response_ms: f64,
    p50_response_ms: f64,
    p95_response_ms: f64,
    p99_response_ms: f64,
    requests_per_second: f64,
    bytes_per_second: f64,
    error_rate: f64,
    cpu_usage: Option<f64>,
    memory_mb: Option<f64>,
}

/// Renders results as Markdown, CSV or JSON documents.
#[derive(Debug, Clone)]
pub struct ReportGenerator {
    output_dir: PathBuf,
}

impl ReportGenerator {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// `<scenario-slug>-<test-id>.<ext>` inside the output directory
    pub fn path_for(&self, result: &TestResult, format: ReportFormat) -> PathBuf {
        self.output_dir.join(format!(
            "{}-{}.{}",
            result.scenario_slug(),
            result.test_id,
            format.extension()
        ))
    }

    /// Render `result` in `format`.
    ///
    /// # Errors
    ///
    /// Returns a serialization or CSV error if encoding fails.
    pub fn render(&self, result: &TestResult, format: ReportFormat) -> StampedeResult<String> {
        match format {
            ReportFormat::Markdown => Ok(Self::markdown(result)),
            ReportFormat::Csv => Self::csv(result),
            ReportFormat::Json => Ok(serde_json::to_string_pretty(result)?),
        }
    }

    /// Render and write `result`, creating the output directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be written.
    pub fn write(&self, result: &TestResult, format: ReportFormat) -> StampedeResult<PathBuf> {
        let content = self.render(result, format)?;
        fs::create_dir_all(&self.output_dir)?;

        let path = self.path_for(result, format);
        fs::write(&path, content)?;

        tracing::info!(
            test_id = %result.test_id,
            path = %path.display(),
            format = format.extension(),
            "Report written"
        );
        Ok(path)
    }

    /// Write the process-wide Prometheus registry next to `result`'s reports
    /// as `<scenario-slug>-<test-id>.prom`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be written.
    pub fn write_metrics(&self, result: &TestResult) -> StampedeResult<PathBuf> {
        fs::create_dir_all(&self.output_dir)?;
        let path = self.output_dir.join(format!(
            "{}-{}.prom",
            result.scenario_slug(),
            result.test_id
        ));
        fs::write(&path, gather_metrics())?;

        tracing::info!(test_id = %result.test_id, path = %path.display(), "Metrics written");
        Ok(path)
    }

    /// Read a JSON export back into a result.
    ///
    /// # Errors
    ///
    /// Returns a deserialization error for malformed input.
    pub fn parse_json(json: &str) -> StampedeResult<TestResult> {
        Ok(serde_json::from_str(json)?)
    }

    fn csv(result: &TestResult) -> StampedeResult<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        for sample in &result.metrics {
            writer
                .serialize(SampleRow {
                    timestamp: sample.timestamp.to_rfc3339(),
                    elapsed_ms: sample.elapsed_ms,
                    active_users: sample.virtual_users.active,
                    total_users: sample.virtual_users.total,
                    requests_sent: sample.requests.sent,
                    requests_completed: sample.requests.completed,
                    requests_failed: sample.requests.failed,
                    requests_pending: sample.requests.pending,
                    avg_response_ms: sample.response_times.average,
                    min_response_ms: sample.response_times.min,
                    max_response_ms: sample.response_times.max,
                    p50_response_ms: sample.response_times.p50,
                    p95_response_ms: sample.response_times.p95,
                    p99_response_ms: sample.response_times.p99,
                    requests_per_second: sample.throughput.requests_per_second,
                    bytes_per_second: sample.throughput.bytes_per_second,
                    error_rate: sample.errors.rate,
                    cpu_usage: sample.system.map(|s| s.cpu_usage),
                    memory_mb: sample.system.map(|s| s.memory_mb),
                })
                .map_err(|e| StampedeError::Csv(e.to_string()))?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| StampedeError::Csv(e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| StampedeError::Csv(e.to_string()))
    }

    fn markdown(result: &TestResult) -> String {
        let s = &result.summary;
        let mut out = String::new();

        let _ = writeln!(out, "# Performance Test Report: {}\n", result.scenario_name);
        let _ = writeln!(
            out,
            "**Status**: {} {} ({})\n",
            if result.passed { "✅" } else { "❌" },
            if result.passed { "PASSED" } else { "FAILED" },
            result.status
        );
        let _ = writeln!(out, "- **Test ID**: {}", result.test_id);
        let _ = writeln!(out, "- **Type**: {}", result.test_type);
        let _ = writeln!(
            out,
            "- **Started**: {}",
            result.start_time.format("%Y-%m-%d %H:%M:%S UTC")
        );
        let _ = writeln!(
            out,
            "- **Duration**: {:.1} seconds\n",
            result.duration_ms as f64 / 1000.0
        );

        let _ = writeln!(out, "---\n\n## Summary\n");
        let _ = writeln!(out, "- **Total Requests**: {}", s.total_requests);
        let _ = writeln!(out, "- **Successful**: {}", s.successful_requests);
        let _ = writeln!(out, "- **Failed**: {}", s.failed_requests);
        let _ = writeln!(out, "- **Error Rate**: {:.2}%", s.error_rate);
        let _ = writeln!(out, "- **Efficiency**: {:.1}%\n", s.efficiency * 100.0);

        let _ = writeln!(out, "---\n\n## Latency\n");
        let _ = writeln!(out, "| Statistic | Response Time |");
        let _ = writeln!(out, "|-----------|---------------|");
        for (label, value) in [
            ("Average", s.average_response_time),
            ("Min", s.min_response_time),
            ("P50", s.p50_response_time),
            ("P95", s.p95_response_time),
            ("P99", s.p99_response_time),
            ("Max", s.max_response_time),
        ] {
            let _ = writeln!(out, "| {label} | {value:.2}ms |");
        }

        let _ = writeln!(out, "\n---\n\n## Throughput\n");
        let _ = writeln!(out, "- **Requests/sec**: {:.2}", s.requests_per_second);
        let _ = writeln!(out, "- **Bytes transferred**: {}", s.bytes_transferred);
        let _ = writeln!(out, "- **Bytes/sec**: {:.1}", s.bytes_per_second);
        let _ = writeln!(out, "- **Peak virtual users**: {}", s.peak_virtual_users);
        let _ = writeln!(
            out,
            "- **Average virtual users**: {:.1}",
            s.average_virtual_users
        );
        let _ = writeln!(out, "- **Total virtual users**: {}\n", s.total_virtual_users);

        let _ = writeln!(out, "---\n\n## Threshold Violations\n");
        if result.violations.is_empty() {
            let _ = writeln!(out, "✅ **No threshold violations**\n");
        } else {
            let _ = writeln!(
                out,
                "{} critical, {} warning\n",
                result.critical_violations(),
                result.warning_violations()
            );
            let _ = writeln!(out, "| Time | Metric | Actual | Threshold | Severity |");
            let _ = writeln!(out, "|------|--------|--------|-----------|----------|");
            for v in &result.violations {
                let _ = writeln!(
                    out,
                    "| {} | {} | {:.2} | {:.2} | {} |",
                    v.timestamp.format("%H:%M:%S%.3f"),
                    v.metric,
                    v.actual_value,
                    v.threshold_value,
                    v.severity
                );
            }
            let _ = writeln!(out);
        }

        let _ = writeln!(out, "---\n\n## Errors\n");
        if result.error_breakdown.is_empty() {
            let _ = writeln!(out, "No errors recorded\n");
        } else {
            let _ = writeln!(out, "| Type | Count |");
            let _ = writeln!(out, "|------|-------|");
            for (kind, count) in &result.error_breakdown {
                let _ = writeln!(out, "| {kind} | {count} |");
            }
            let _ = writeln!(out);
        }

        let _ = writeln!(out, "---\n\n## Virtual Users\n");
        let _ = writeln!(out, "| ID | Status | Requests | Errors | Avg Response |");
        let _ = writeln!(out, "|----|--------|----------|--------|--------------|");
        for user in &result.virtual_users {
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} | {:.2}ms |",
                user.id.short(),
                user.status.as_str(),
                user.request_count,
                user.error_count,
                user.average_response_time
            );
        }

        let _ = writeln!(
            out,
            "\n---\n\n**Report Generated**: {}",
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use stampede_core::{
        MetricsSample, Severity, SummaryStatistics, TestId, TestStatus, TestType,
        ThresholdViolation,
    };
    use std::collections::BTreeMap;

    fn result() -> TestResult {
        let sample = MetricsSample {
            timestamp: Utc::now(),
            elapsed_ms: 1000,
            virtual_users: Default::default(),
            requests: Default::default(),
            response_times: Default::default(),
            throughput: Default::default(),
            errors: Default::default(),
            system: None,
        };

        TestResult {
            test_id: TestId::new(),
            scenario_id: "checkout".into(),
            scenario_name: "Checkout Flow".into(),
            test_type: TestType::Load,
            status: TestStatus::Completed,
            start_time: Utc::now(),
            end_time: Utc::now(),
            duration_ms: 2_000,
            summary: SummaryStatistics {
                total_requests: 40,
                successful_requests: 38,
                failed_requests: 2,
                error_rate: 5.0,
                ..Default::default()
            },
            error_breakdown: BTreeMap::from([("http_503".to_string(), 2)]),
            metrics: vec![sample.clone(), sample],
            violations: vec![ThresholdViolation {
                timestamp: Utc::now(),
                metric: "error_rate".into(),
                actual_value: 5.0,
                threshold_value: 1.0,
                severity: Severity::Critical,
                description: "Error rate 5.00% exceeds 1.00%".into(),
            }],
            virtual_users: Vec::new(),
            passed: false,
        }
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("md".parse::<ReportFormat>().unwrap(), ReportFormat::Markdown);
        assert_eq!(" JSON ".parse::<ReportFormat>().unwrap(), ReportFormat::Json);
        assert!("pdf".parse::<ReportFormat>().is_err());
    }

    #[test]
    fn test_markdown_sections() {
        let md = ReportGenerator::new(".")
            .render(&result(), ReportFormat::Markdown)
            .unwrap();
        assert!(md.contains("# Performance Test Report: Checkout Flow"));
        assert!(md.contains("FAILED"));
        assert!(md.contains("## Latency"));
        assert!(md.contains("| error_rate |"));
        assert!(md.contains("| http_503 | 2 |"));
    }

    #[test]
    fn test_csv_has_one_row_per_sample() {
        let csv = ReportGenerator::new(".")
            .render(&result(), ReportFormat::Csv)
            .unwrap();
        let lines: Vec<_> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("timestamp,elapsed_ms,active_users"));
    }

    #[test]
    fn test_json_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let generator = ReportGenerator::new(dir.path().join("reports"));
        let original = result();

        let path = generator.write(&original, ReportFormat::Json).unwrap();
        assert_eq!(
            path.file_name().unwrap().to_string_lossy(),
            format!("checkout-flow-{}.json", original.test_id)
        );

        let parsed = ReportGenerator::parse_json(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed.test_id, original.test_id);
        assert_eq!(parsed.summary.total_requests, 40);
        assert_eq!(parsed.summary.failed_requests, 2);
        assert_eq!(parsed.error_breakdown, original.error_breakdown);
        assert_eq!(parsed.metrics.len(), 2);
        assert_eq!(parsed.critical_violations(), 1);
    }

    #[test]
    fn test_metrics_snapshot_written() {
        stampede_core::metrics::TEST_RUNS
            .with_label_values(&["completed"])
            .inc();
        let dir = tempfile::tempdir().unwrap();
        let generator = ReportGenerator::new(dir.path().to_path_buf());
        let original = result();

        let path = generator.write_metrics(&original).unwrap();
        assert_eq!(
            path.file_name().unwrap().to_string_lossy(),
            format!("checkout-flow-{}.prom", original.test_id)
        );
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("stampede_test_runs_total"));
    }
}
