//! HTTP request executor backed by a shared `reqwest` client.

use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::{Client, Method, Url};
use stampede_core::config::HttpConfig;
use stampede_core::{
    ExecutorError, RequestExecutor, RequestOutcome, RequestTemplate, StampedeError,
    StampedeResult,
};
use std::time::Duration;
use tokio::time::Instant;

/// Issues real HTTP requests. One client (and connection pool) is shared by
/// every virtual user.
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    client: Client,
    default_timeout: Duration,
}

impl HttpExecutor {
    /// Build the executor from HTTP settings.
    ///
    /// # Errors
    ///
    /// Returns an execution error if the TLS backend cannot be initialized.
    pub fn new(config: &HttpConfig) -> StampedeResult<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| StampedeError::execution(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            default_timeout: config.default_timeout(),
        })
    }

    fn method(template: &RequestTemplate) -> Result<Method, ExecutorError> {
        Method::from_bytes(template.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| ExecutorError::Setup(format!("invalid method '{}'", template.method)))
    }

    fn classify(error: &reqwest::Error, timeout: Duration) -> ExecutorError {
        if error.is_timeout() {
            ExecutorError::Timeout(timeout)
        } else {
            ExecutorError::Network(error.to_string())
        }
    }
}

#[async_trait]
impl RequestExecutor for HttpExecutor {
    async fn prepare(&self, template: &RequestTemplate) -> Result<(), ExecutorError> {
        Self::method(template)?;

        let url = Url::parse(&template.url)
            .map_err(|e| ExecutorError::Setup(format!("invalid url '{}': {e}", template.url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ExecutorError::Setup(format!(
                "unsupported scheme '{}'",
                url.scheme()
            )));
        }

        for (name, value) in &template.headers {
            HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ExecutorError::Setup(format!("invalid header name '{name}'")))?;
            HeaderValue::from_str(value)
                .map_err(|_| ExecutorError::Setup(format!("invalid value for header '{name}'")))?;
        }

        Ok(())
    }

    async fn execute(&self, template: &RequestTemplate) -> Result<RequestOutcome, ExecutorError> {
        let timeout = template.timeout().unwrap_or(self.default_timeout);
        let mut request = self
            .client
            .request(Self::method(template)?, template.url.as_str())
            .timeout(timeout);
        for (name, value) in &template.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &template.body {
            request = request.body(body.clone());
        }

        let started = Instant::now();
        let response = request
            .send()
            .await
            .map_err(|e| Self::classify(&e, timeout))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| Self::classify(&e, timeout))?;
        let latency = started.elapsed();

        if !template.is_expected_status(status) {
            return Err(ExecutorError::UnexpectedStatus { status, latency });
        }

        Ok(RequestOutcome {
            status,
            latency,
            bytes: body.len() as u64,
        })
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
