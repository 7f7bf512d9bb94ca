//! Point-in-time metrics snapshots and threshold violations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Virtual-user population at the time of a sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualUserCounts {
    pub active: u32,
    pub total: u32,
    pub completed: u32,
    pub failed: u32,
}

/// Request counters at the time of a sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestCounts {
    pub sent: u64,
    pub completed: u64,
    pub failed: u64,
    /// Requests sent but not yet completed or failed.
    pub pending: u64,
}

/// Response-time statistics in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseTimeStats {
    pub average: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Throughput {
    pub requests_per_second: f64,
    pub bytes_per_second: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorSummary {
    pub count: u64,
    /// Failed requests as a percentage of requests sent.
    pub rate: f64,
    pub by_type: BTreeMap<String, u64>,
}

/// Process-level resource usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetrics {
    /// CPU usage in percent of one core.
    pub cpu_usage: f64,
    /// Resident memory in MB.
    pub memory_mb: f64,
}

/// Immutable snapshot of one test execution's counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSample {
    pub timestamp: DateTime<Utc>,
    /// Milliseconds since the measured run started.
    pub elapsed_ms: u64,
    pub virtual_users: VirtualUserCounts,
    pub requests: RequestCounts,
    pub response_times: ResponseTimeStats,
    pub throughput: Throughput,
    pub errors: ErrorSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemMetrics>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Critical,
}

impl Severity {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded breach of a configured ceiling or floor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdViolation {
    pub timestamp: DateTime<Utc>,
    pub metric: String,
    pub actual_value: f64,
    pub threshold_value: f64,
    pub severity: Severity,
    pub description: String,
}
