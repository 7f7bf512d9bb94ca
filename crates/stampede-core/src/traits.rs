//! Narrow interfaces to the collaborators the orchestrator drives.
//!
//! All implementations must be thread-safe (`Send + Sync`); a single
//! executor instance is shared by every virtual user of a run.

use crate::ids::TestId;
use crate::result::TestResult;
use crate::scenario::{RequestTemplate, ScenarioConfig};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Outcome of one successful request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestOutcome {
    pub status: u16,
    pub latency: Duration,
    pub bytes: u64,
}

/// Failure of a single iteration. Counted, never propagated.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutorError {
    /// Connection refused, DNS failure, reset, etc.
    #[error("network error: {0}")]
    Network(String),

    /// The request did not finish within its timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The server answered with a status outside the expected set.
    #[error("unexpected status {status}")]
    UnexpectedStatus {
        status: u16,
        latency: Duration,
    },

    /// The executor cannot serve this template at all.
    #[error("setup error: {0}")]
    Setup(String),
}

impl ExecutorError {
    /// Stable category used for the per-error-type breakdown.
    #[must_use]
    pub fn category(&self) -> String {
        match self {
            Self::Network(_) => "network".to_string(),
            Self::Timeout(_) => "timeout".to_string(),
            Self::UnexpectedStatus { status, .. } => format!("http_{status}"),
            Self::Setup(_) => "setup".to_string(),
        }
    }
}

/// Issues one request per virtual-user iteration. No retries.
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    /// One-time setup check run by every virtual user before its loop.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::Setup`] if the template can never succeed;
    /// the virtual user is then marked failed.
    async fn prepare(&self, _template: &RequestTemplate) -> Result<(), ExecutorError> {
        Ok(())
    }

    /// Perform one request.
    ///
    /// # Errors
    ///
    /// Any error is treated by the caller as a failed iteration.
    async fn execute(&self, template: &RequestTemplate) -> Result<RequestOutcome, ExecutorError>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

/// Core Web Vitals captured after a page load, in milliseconds
/// (CLS is unitless).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebVitals {
    pub lcp: f64,
    pub fid: f64,
    pub cls: f64,
    pub fcp: f64,
    pub ttfb: f64,
}

/// Timings of one page navigation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageLoadTiming {
    pub status: u16,
    pub load_time: Duration,
    pub transfer_bytes: u64,
    pub vitals: Option<WebVitals>,
}

/// Browser automation handle for UI-variant scenarios.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Navigate to `url` and wait for the load event.
    ///
    /// # Errors
    ///
    /// Navigation failures and timeouts map onto [`ExecutorError`].
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<PageLoadTiming, ExecutorError>;

    /// Measure Core Web Vitals on the currently loaded page.
    async fn measure(&self) -> Option<WebVitals> {
        None
    }
}

/// Progress and error sink for a reporting session.
pub trait ReportSink: Send + Sync {
    fn session_started(&self, test_id: TestId, scenario: &ScenarioConfig);

    fn progress(&self, test_id: TestId, message: &str);

    fn error(&self, test_id: TestId, message: &str);

    fn session_finished(&self, result: &TestResult);
}

/// Default sink forwarding everything to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReportSink;

impl ReportSink for TracingReportSink {
    fn session_started(&self, test_id: TestId, scenario: &ScenarioConfig) {
        tracing::info!(
            test_id = %test_id,
            scenario = %scenario.name,
            test_type = %scenario.test_type,
            pattern = %scenario.load.pattern,
            virtual_users = scenario.load.virtual_users,
            duration_secs = scenario.load.duration,
            "Test session started"
        );
    }

    fn progress(&self, test_id: TestId, message: &str) {
        tracing::info!(test_id = %test_id, "{}", message);
    }

    fn error(&self, test_id: TestId, message: &str) {
        tracing::error!(test_id = %test_id, "{}", message);
    }

    fn session_finished(&self, result: &TestResult) {
        tracing::info!(
            test_id = %result.test_id,
            status = %result.status,
            total_requests = result.summary.total_requests,
            error_rate = result.summary.error_rate,
            p95_ms = result.summary.p95_response_time,
            violations = result.violations.len(),
            passed = result.passed,
            "Test session finished"
        );
    }
}
