//! Page-load executor for UI scenarios.

use async_trait::async_trait;
use parking_lot::Mutex;
use stampede_core::{
    BrowserSession, ExecutorError, RequestExecutor, RequestOutcome, RequestTemplate, WebVitals,
};
use std::sync::Arc;
use std::time::Duration;

/// Runs each iteration as a page navigation through a [`BrowserSession`]
/// and keeps the Core Web Vitals it observes.
pub struct BrowserExecutor {
    session: Arc<dyn BrowserSession>,
    default_timeout: Duration,
    vitals: Mutex<Vec<WebVitals>>,
}

impl BrowserExecutor {
    pub fn new(session: Arc<dyn BrowserSession>, default_timeout: Duration) -> Self {
        Self {
            session,
            default_timeout,
            vitals: Mutex::new(Vec::new()),
        }
    }

    pub fn vitals_collected(&self) -> usize {
        self.vitals.lock().len()
    }

    /// Mean of every vitals measurement so far.
    pub fn average_vitals(&self) -> Option<WebVitals> {
        let vitals = self.vitals.lock();
        if vitals.is_empty() {
            return None;
        }

        let n = vitals.len() as f64;
        let sum = vitals.iter().fold(WebVitals::default(), |acc, v| WebVitals {
            lcp: acc.lcp + v.lcp,
            fid: acc.fid + v.fid,
            cls: acc.cls + v.cls,
            fcp: acc.fcp + v.fcp,
            ttfb: acc.ttfb + v.ttfb,
        });
        Some(WebVitals {
            lcp: sum.lcp / n,
            fid: sum.fid / n,
            cls: sum.cls / n,
            fcp: sum.fcp / n,
            ttfb: sum.ttfb / n,
        })
    }
}

#[async_trait]
impl RequestExecutor for BrowserExecutor {
    async fn prepare(&self, template: &RequestTemplate) -> Result<(), ExecutorError> {
        if template.url.trim().is_empty() {
            return Err(ExecutorError::Setup("page url is empty".to_string()));
        }
        Ok(())
    }

    async fn execute(&self, template: &RequestTemplate) -> Result<RequestOutcome, ExecutorError> {
        let timeout = template.timeout().unwrap_or(self.default_timeout);
        let timing = self.session.navigate(&template.url, timeout).await?;

        let vitals = match timing.vitals {
            Some(vitals) => Some(vitals),
            None => self.session.measure().await,
        };
        if let Some(vitals) = vitals {
            self.vitals.lock().push(vitals);
        }

        if !template.is_expected_status(timing.status) {
            return Err(ExecutorError::UnexpectedStatus {
                status: timing.status,
                latency: timing.load_time,
            });
        }

        Ok(RequestOutcome {
            status: timing.status,
            latency: timing.load_time,
            bytes: timing.transfer_bytes,
        })
    }

    fn name(&self) -> &'static str {
        "browser"
    }
}
