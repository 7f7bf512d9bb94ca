//! In-memory request executor
//!
//! Simulates a target service without any network traffic, for tests and
//! dry runs.
//!
//! # Features
//!
//! - **Latency Simulation**: fixed per-request delay on the runtime clock
//! - **Deterministic Failures**: every n-th request fails
//! - **Random Failures**: configurable failure rate (e.g., 30% fail)
//! - **Call Counting**: total and failed calls for assertions
//!
//! # Examples
//!
//! ```rust
//! use stampede_engine::executor::{MockConfig, MockExecutor};
//! use stampede_core::{RequestExecutor, RequestTemplate};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let mock = MockExecutor::new(MockConfig {
//!     fail_every: Some(3),
//!     ..MockConfig::with_latency(Duration::from_millis(20))
//! });
//! let template = RequestTemplate::get("http://localhost/");
//!
//! assert!(mock.execute(&template).await.is_ok());
//! assert!(mock.execute(&template).await.is_ok());
//! assert!(mock.execute(&template).await.is_err());
//! assert_eq!(mock.calls(), 3);
//! assert_eq!(mock.failures(), 1);
//! # }
//! ```

use async_trait::async_trait;
use rand::Rng;
use stampede_core::{ExecutorError, RequestExecutor, RequestOutcome, RequestTemplate};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Behavior of a [`MockExecutor`].
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Simulated response time.
    pub latency: Duration,
    /// Status returned by successful calls.
    pub status: u16,
    /// Response size reported by successful calls.
    pub bytes: u64,
    /// Fail every n-th call (1 = always fail).
    pub fail_every: Option<u64>,
    /// Probability (0-1) that any call fails.
    pub failure_rate: f64,
    /// Status reported by injected failures.
    pub failure_status: u16,
    /// Reject templates in `prepare`.
    pub fail_prepare: bool,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(10),
            status: 200,
            bytes: 1024,
            fail_every: None,
            failure_rate: 0.0,
            failure_status: 500,
            fail_prepare: false,
        }
    }
}

impl MockConfig {
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Default::default()
        }
    }

    /// Every call fails with the failure status.
    pub fn always_fail() -> Self {
        Self {
            fail_every: Some(1),
            ..Default::default()
        }
    }
}

/// Request executor answering from memory.
#[derive(Debug, Default)]
pub struct MockExecutor {
    config: MockConfig,
    calls: AtomicU64,
    failures: AtomicU64,
}

impl MockExecutor {
    pub fn new(config: MockConfig) -> Self {
        Self {
            config,
            calls: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    fn should_fail(&self, call: u64) -> bool {
        if self.config.fail_every.is_some_and(|n| n > 0 && call % n == 0) {
            return true;
        }
        self.config.failure_rate > 0.0
            && rand::thread_rng().gen_bool(self.config.failure_rate.clamp(0.0, 1.0))
    }
}

#[async_trait]
impl RequestExecutor for MockExecutor {
    async fn prepare(&self, template: &RequestTemplate) -> Result<(), ExecutorError> {
        if self.config.fail_prepare {
            return Err(ExecutorError::Setup(format!(
                "mock rejects {} {}",
                template.method, template.url
            )));
        }
        Ok(())
    }

    async fn execute(&self, template: &RequestTemplate) -> Result<RequestOutcome, ExecutorError> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        let fail = self.should_fail(call);

        if !self.config.latency.is_zero() {
            tokio::time::sleep(self.config.latency).await;
        }

        let status = if fail {
            self.config.failure_status
        } else {
            self.config.status
        };
        if fail || !template.is_expected_status(status) {
            self.failures.fetch_add(1, Ordering::Relaxed);
            return Err(ExecutorError::UnexpectedStatus {
                status,
                latency: self.config.latency,
            });
        }

        Ok(RequestOutcome {
            status,
            latency: self.config.latency,
            bytes: self.config.bytes,
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
