//! Finalized test results handed to the report generator.

use crate::ids::{TestId, VirtualUserId};
use crate::sample::{MetricsSample, Severity, ThresholdViolation};
use crate::scenario::TestType;
use crate::status::{TestStatus, VirtualUserStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Totals and rates computed once a run has finished.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryStatistics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Failed requests in percent of total.
    pub error_rate: f64,
    pub average_response_time: f64,
    pub min_response_time: f64,
    pub max_response_time: f64,
    pub p50_response_time: f64,
    pub p95_response_time: f64,
    pub p99_response_time: f64,
    pub requests_per_second: f64,
    pub bytes_transferred: u64,
    pub bytes_per_second: f64,
    pub peak_virtual_users: u32,
    pub average_virtual_users: f64,
    pub total_virtual_users: u32,
    /// Successful requests divided by total requests (0-1).
    pub efficiency: f64,
}

/// Final counters of one virtual user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualUserSummary {
    pub id: VirtualUserId,
    pub status: VirtualUserStatus,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub request_count: u64,
    pub error_count: u64,
    pub average_response_time: f64,
}

/// The finalized outcome of one test execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub test_id: TestId,
    pub scenario_id: String,
    pub scenario_name: String,
    pub test_type: TestType,
    pub status: TestStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: u64,
    pub summary: SummaryStatistics,
    pub error_breakdown: BTreeMap<String, u64>,
    pub metrics: Vec<MetricsSample>,
    pub violations: Vec<ThresholdViolation>,
    pub virtual_users: Vec<VirtualUserSummary>,
    pub passed: bool,
}

impl TestResult {
    #[must_use]
    pub fn critical_violations(&self) -> usize {
        self.violations
            .iter()
            .filter(|v| v.severity == Severity::Critical)
            .count()
    }

    #[must_use]
    pub fn warning_violations(&self) -> usize {
        self.violations
            .iter()
            .filter(|v| v.severity == Severity::Warning)
            .count()
    }

    /// Lowercase, dash-separated scenario name for file names.
    #[must_use]
    pub fn scenario_slug(&self) -> String {
        let slug: String = self
            .scenario_name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    '-'
                }
            })
            .collect();
        let collapsed = slug
            .split('-')
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("-");
        if collapsed.is_empty() {
            "scenario".to_string()
        } else {
            collapsed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(name: &str) -> TestResult {
        TestResult {
            test_id: TestId::new(),
            scenario_id: "s".into(),
            scenario_name: name.into(),
            test_type: TestType::Load,
            status: TestStatus::Completed,
            start_time: Utc::now(),
            end_time: Utc::now(),
            duration_ms: 0,
            summary: SummaryStatistics::default(),
            error_breakdown: BTreeMap::new(),
            metrics: Vec::new(),
            violations: Vec::new(),
            virtual_users: Vec::new(),
            passed: true,
        }
    }

    #[test]
    fn test_scenario_slug() {
        assert_eq!(result("Checkout: Peak Hour!").scenario_slug(), "checkout-peak-hour");
        assert_eq!(result("***").scenario_slug(), "scenario");
    }

    #[test]
    fn test_violation_counts() {
        let mut r = result("x");
        for severity in [Severity::Warning, Severity::Critical, Severity::Critical] {
            r.violations.push(ThresholdViolation {
                timestamp: Utc::now(),
                metric: "p95_response_time".into(),
                actual_value: 10.0,
                threshold_value: 5.0,
                severity,
                description: String::new(),
            });
        }
        assert_eq!(r.critical_violations(), 2);
        assert_eq!(r.warning_violations(), 1);
    }
}
