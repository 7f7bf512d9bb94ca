//! Scenario configuration: the immutable description of a test run.
//!
//! Scenarios are plain serde records (camelCase on the wire) created once by
//! the caller and never mutated while a test executes.

use crate::error::{StampedeError, StampedeResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Category of performance test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestType {
    Load,
    Stress,
    Spike,
    Volume,
    Endurance,
    Baseline,
    UiLoad,
    UiPerformance,
}

impl TestType {
    /// UI variants drive a browser session instead of raw HTTP requests.
    #[must_use]
    pub fn is_ui(self) -> bool {
        matches!(self, Self::UiLoad | Self::UiPerformance)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Stress => "stress",
            Self::Spike => "spike",
            Self::Volume => "volume",
            Self::Endurance => "endurance",
            Self::Baseline => "baseline",
            Self::UiLoad => "ui-load",
            Self::UiPerformance => "ui-performance",
        }
    }
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TestType {
    type Err = StampedeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "load" => Ok(Self::Load),
            "stress" => Ok(Self::Stress),
            "spike" => Ok(Self::Spike),
            "volume" => Ok(Self::Volume),
            "endurance" => Ok(Self::Endurance),
            "baseline" => Ok(Self::Baseline),
            "ui-load" => Ok(Self::UiLoad),
            "ui-performance" => Ok(Self::UiPerformance),
            other => Err(StampedeError::validation(format!(
                "unknown test type '{other}'"
            ))),
        }
    }
}

/// Shape of the virtual-user population over the test duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadPattern {
    Constant,
    RampUp,
    RampDown,
    Step,
    Spike,
    Custom,
}

impl LoadPattern {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Constant => "constant",
            Self::RampUp => "ramp-up",
            Self::RampDown => "ramp-down",
            Self::Step => "step",
            Self::Spike => "spike",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for LoadPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a custom load pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomStep {
    /// Population to reach at the start of this step.
    pub target_users: u32,
    /// How long to hold the population.
    pub duration_seconds: u64,
}

/// How many virtual users to run and how their population evolves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadConfig {
    pub pattern: LoadPattern,

    /// Target (maximum) virtual-user count.
    pub virtual_users: u32,

    /// Total test duration in seconds. Hard ceiling for every pattern.
    pub duration: u64,

    /// Ramp-up time in seconds (default: duration / 2).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ramp_up_time: Option<u64>,

    /// Ramp-down time in seconds (default: duration / 2).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ramp_down_time: Option<u64>,

    /// Pause between iterations in milliseconds (default: 1000).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub think_time: Option<u64>,

    /// Steps for the custom pattern.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<CustomStep>>,
}

impl LoadConfig {
    /// Longest accepted test duration, ramp time or custom timeline (7 days).
    pub const MAX_DURATION_SECS: u64 = 7 * 24 * 60 * 60;
    /// Constant load with no ramp or custom steps.
    #[must_use]
    pub fn constant(virtual_users: u32, duration_secs: u64) -> Self {
        Self {
            pattern: LoadPattern::Constant,
            virtual_users,
            duration: duration_secs,
            ramp_up_time: None,
            ramp_down_time: None,
            think_time: None,
            steps: None,
        }
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration)
    }

    /// Effective think time, falling back to `default_ms`.
    #[must_use]
    pub fn think_time_or(&self, default_ms: u64) -> Duration {
        Duration::from_millis(self.think_time.unwrap_or(default_ms))
    }

    /// Reject durations that do not fit the supported timeline.
    ///
    /// # Errors
    ///
    /// Returns [`StampedeError::Validation`] naming the offending field.
    pub fn validate_timings(&self) -> StampedeResult<()> {
        let max = Self::MAX_DURATION_SECS;
        let too_long = |field: &str| {
            StampedeError::validation(format!("{field} must be at most {max} seconds"))
        };

        if self.duration > max {
            return Err(too_long("load.duration"));
        }
        if self.ramp_up_time.is_some_and(|secs| secs > max) {
            return Err(too_long("load.rampUpTime"));
        }
        if self.ramp_down_time.is_some_and(|secs| secs > max) {
            return Err(too_long("load.rampDownTime"));
        }
        if let Some(steps) = &self.steps {
            let total = steps
                .iter()
                .try_fold(0u64, |acc, step| acc.checked_add(step.duration_seconds));
            if total.map_or(true, |total| total > max) {
                return Err(too_long("sum of load.steps durationSeconds"));
            }
        }
        Ok(())
    }
}

/// Response-time ceilings in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseTimeThresholds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p95: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p99: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

/// Error-rate ceiling, in percent (0-100).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRateThreshold {
    pub max: f64,
}

/// Throughput floor in requests per second.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThroughputThreshold {
    pub min: f64,
}

/// Process resource ceilings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceThresholds {
    /// CPU usage ceiling in percent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_max: Option<f64>,
    /// Resident memory ceiling in MB.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_max: Option<f64>,
}

/// Thresholds a scenario declares; every category is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time: Option<ResponseTimeThresholds>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_rate: Option<ErrorRateThreshold>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throughput: Option<ThroughputThreshold>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceThresholds>,
}

impl ThresholdSet {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.response_time.is_none()
            && self.error_rate.is_none()
            && self.throughput.is_none()
            && self.resources.is_none()
    }
}

const KNOWN_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

fn default_method() -> String {
    "GET".to_string()
}

/// The request every virtual-user iteration issues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestTemplate {
    #[serde(default = "default_method")]
    pub method: String,

    pub url: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,

    /// Per-request timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// Statuses counted as success (default: any 2xx).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_status: Option<Vec<u16>>,
}

impl Default for RequestTemplate {
    fn default() -> Self {
        Self {
            method: default_method(),
            url: String::new(),
            headers: BTreeMap::new(),
            body: None,
            timeout: None,
            expected_status: None,
        }
    }
}

impl RequestTemplate {
    /// GET request against `url` with no extra headers.
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_millis)
    }

    /// Whether `status` counts as a successful response.
    #[must_use]
    pub fn is_expected_status(&self, status: u16) -> bool {
        match &self.expected_status {
            Some(expected) => expected.contains(&status),
            None => (200..300).contains(&status),
        }
    }

    fn validate(&self) -> StampedeResult<()> {
        if self.url.trim().is_empty() {
            return Err(StampedeError::validation("request.url must not be empty"));
        }
        let method = self.method.to_ascii_uppercase();
        if !KNOWN_METHODS.contains(&method.as_str()) {
            return Err(StampedeError::validation(format!(
                "request.method '{}' is not supported",
                self.method
            )));
        }
        if self.timeout == Some(0) {
            return Err(StampedeError::validation("request.timeout must be > 0"));
        }
        Ok(())
    }
}

/// Immutable description of one performance test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioConfig {
    pub id: String,

    pub name: String,

    #[serde(rename = "type")]
    pub test_type: TestType,

    pub load: LoadConfig,

    #[serde(default, skip_serializing_if = "ThresholdSet::is_empty")]
    pub thresholds: ThresholdSet,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestTemplate>,

    /// Number of warmup requests to issue before the measured run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warmup_requests: Option<u32>,

    /// Pause after load generation ends, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_time: Option<u64>,
}

impl ScenarioConfig {
    /// Validate everything that can be checked before load is generated.
    ///
    /// # Errors
    ///
    /// Returns [`StampedeError::Validation`] describing the first problem.
    pub fn validate(&self) -> StampedeResult<()> {
        if self.load.virtual_users == 0 {
            return Err(StampedeError::validation(
                "load.virtualUsers must be greater than 0",
            ));
        }
        if self.load.duration == 0 {
            return Err(StampedeError::validation(
                "load.duration must be greater than 0",
            ));
        }
        self.load.validate_timings()?;
        if let Some(request) = &self.request {
            request.validate()?;
        }
        if let Some(thresholds) = &self.thresholds.error_rate {
            if !(0.0..=100.0).contains(&thresholds.max) {
                return Err(StampedeError::validation(
                    "thresholds.errorRate.max must be between 0 and 100",
                ));
            }
        }
        Ok(())
    }

    /// The request template, or an empty GET when none was configured.
    #[must_use]
    pub fn request_or_default(&self) -> RequestTemplate {
        self.request.clone().unwrap_or_default()
    }

    #[must_use]
    pub fn cooldown(&self) -> Option<Duration> {
        self.cooldown_time
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Parse a scenario from JSON.
    ///
    /// # Errors
    ///
    /// Returns a deserialization error for malformed input.
    pub fn from_json(json: &str) -> StampedeResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if encoding fails.
    pub fn to_json_pretty(&self) -> StampedeResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario() -> ScenarioConfig {
        ScenarioConfig {
            id: "checkout".into(),
            name: "Checkout".into(),
            test_type: TestType::Load,
            load: LoadConfig::constant(5, 10),
            thresholds: ThresholdSet::default(),
            request: Some(RequestTemplate::get("http://localhost:8080/health")),
            warmup_requests: None,
            cooldown_time: None,
        }
    }

    #[test]
    fn test_valid_scenario_passes() {
        assert!(scenario().validate().is_ok());
    }

    #[test]
    fn test_zero_users_rejected() {
        let mut s = scenario();
        s.load.virtual_users = 0;
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("virtualUsers"));
    }

    #[test]
    fn test_zero_duration_rejected() {
        let mut s = scenario();
        s.load.duration = 0;
        assert!(s.validate().unwrap_err().to_string().contains("duration"));
    }

    #[test]
    fn test_oversized_timings_rejected() {
        let mut s = scenario();
        s.load.duration = u64::MAX / 100;
        assert!(s.validate().unwrap_err().to_string().contains("load.duration"));

        let mut s = scenario();
        s.load.ramp_up_time = Some(LoadConfig::MAX_DURATION_SECS + 1);
        assert!(s.validate().unwrap_err().to_string().contains("rampUpTime"));

        let mut s = scenario();
        s.load.steps = Some(vec![
            CustomStep {
                target_users: 1,
                duration_seconds: u64::MAX,
            },
            CustomStep {
                target_users: 2,
                duration_seconds: 10,
            },
        ]);
        assert!(s.validate().unwrap_err().to_string().contains("steps"));

        let mut s = scenario();
        s.load.duration = LoadConfig::MAX_DURATION_SECS;
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_missing_url_rejected_only_when_template_present() {
        let mut s = scenario();
        s.request = Some(RequestTemplate::get("  "));
        assert!(s.validate().unwrap_err().to_string().contains("url"));

        s.request = None;
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_unknown_method_rejected() {
        let mut s = scenario();
        s.request = Some(RequestTemplate {
            method: "FETCH".into(),
            ..RequestTemplate::get("http://x")
        });
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_expected_status_defaults_to_2xx() {
        let template = RequestTemplate::get("http://x");
        assert!(template.is_expected_status(204));
        assert!(!template.is_expected_status(302));

        let custom = RequestTemplate {
            expected_status: Some(vec![200, 404]),
            ..template
        };
        assert!(custom.is_expected_status(404));
        assert!(!custom.is_expected_status(201));
    }

    #[test]
    fn test_camel_case_wire_format() {
        let json = r#"{
            "id": "s1",
            "name": "Ramp",
            "type": "stress",
            "load": {
                "pattern": "ramp-up",
                "virtualUsers": 10,
                "duration": 60,
                "rampUpTime": 20,
                "thinkTime": 250
            },
            "thresholds": { "responseTime": { "p95": 300 }, "errorRate": { "max": 1.5 } },
            "request": { "url": "http://localhost/api", "timeout": 5000 },
            "warmupRequests": 10
        }"#;

        let s = ScenarioConfig::from_json(json).unwrap();
        assert_eq!(s.test_type, TestType::Stress);
        assert_eq!(s.load.pattern, LoadPattern::RampUp);
        assert_eq!(s.load.ramp_up_time, Some(20));
        assert_eq!(s.load.think_time_or(1000), Duration::from_millis(250));
        assert_eq!(s.request.as_ref().unwrap().method, "GET");
        assert_eq!(
            s.thresholds.response_time.as_ref().unwrap().p95,
            Some(300.0)
        );
        assert_eq!(s.warmup_requests, Some(10));
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_custom_steps_parse() {
        let json = r#"{"pattern":"custom","virtualUsers":8,"duration":30,
            "steps":[{"targetUsers":2,"durationSeconds":10},{"targetUsers":8,"durationSeconds":20}]}"#;
        let load: LoadConfig = serde_json::from_str(json).unwrap();
        let steps = load.steps.unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[1].target_users, 8);
    }
}
