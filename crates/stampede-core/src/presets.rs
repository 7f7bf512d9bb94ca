//! Scenario builder and per-test-type presets.

use crate::error::StampedeResult;
use crate::scenario::{
    CustomStep, ErrorRateThreshold, LoadConfig, LoadPattern, RequestTemplate,
    ResourceThresholds, ResponseTimeThresholds, ScenarioConfig, TestType, ThresholdSet,
    ThroughputThreshold,
};

/// Fluent builder for [`ScenarioConfig`].
#[derive(Debug, Clone)]
pub struct ScenarioBuilder {
    scenario: ScenarioConfig,
}

impl ScenarioBuilder {
    pub fn new(name: impl Into<String>, test_type: TestType) -> Self {
        let name = name.into();
        let id = name
            .to_ascii_lowercase()
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("-");

        Self {
            scenario: ScenarioConfig {
                id,
                name,
                test_type,
                load: LoadConfig::constant(1, 60),
                thresholds: ThresholdSet::default(),
                request: None,
                warmup_requests: None,
                cooldown_time: None,
            },
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.scenario.id = id.into();
        self
    }

    pub fn request(mut self, request: RequestTemplate) -> Self {
        self.scenario.request = Some(request);
        self
    }

    pub fn url(self, url: impl Into<String>) -> Self {
        self.request(RequestTemplate::get(url))
    }

    pub fn pattern(mut self, pattern: LoadPattern) -> Self {
        self.scenario.load.pattern = pattern;
        self
    }

    pub fn virtual_users(mut self, users: u32) -> Self {
        self.scenario.load.virtual_users = users;
        self
    }

    pub fn duration_secs(mut self, secs: u64) -> Self {
        self.scenario.load.duration = secs;
        self
    }

    pub fn ramp_up_secs(mut self, secs: u64) -> Self {
        self.scenario.load.ramp_up_time = Some(secs);
        self
    }

    pub fn ramp_down_secs(mut self, secs: u64) -> Self {
        self.scenario.load.ramp_down_time = Some(secs);
        self
    }

    pub fn think_time_ms(mut self, ms: u64) -> Self {
        self.scenario.load.think_time = Some(ms);
        self
    }

    /// Switches to the custom pattern with the given steps.
    pub fn steps(mut self, steps: Vec<CustomStep>) -> Self {
        self.scenario.load.pattern = LoadPattern::Custom;
        self.scenario.load.steps = Some(steps);
        self
    }

    pub fn thresholds(mut self, thresholds: ThresholdSet) -> Self {
        self.scenario.thresholds = thresholds;
        self
    }

    pub fn warmup_requests(mut self, requests: u32) -> Self {
        self.scenario.warmup_requests = Some(requests);
        self
    }

    pub fn cooldown_secs(mut self, secs: u64) -> Self {
        self.scenario.cooldown_time = Some(secs);
        self
    }

    /// Validate and return the scenario.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure.
    pub fn build(self) -> StampedeResult<ScenarioConfig> {
        self.scenario.validate()?;
        Ok(self.scenario)
    }

    /// Return the scenario without validating it.
    pub fn build_unchecked(self) -> ScenarioConfig {
        self.scenario
    }
}

fn response_time(average: f64, p95: f64, p99: f64) -> Option<ResponseTimeThresholds> {
    Some(ResponseTimeThresholds {
        average: Some(average),
        p95: Some(p95),
        p99: Some(p99),
        max: None,
    })
}

/// Standard load test: ramp to `users` over a quarter of the run.
pub fn load_test(url: &str, users: u32, duration_secs: u64) -> ScenarioBuilder {
    ScenarioBuilder::new("Load Test", TestType::Load)
        .url(url)
        .pattern(LoadPattern::RampUp)
        .virtual_users(users)
        .duration_secs(duration_secs)
        .ramp_up_secs((duration_secs / 4).max(1))
        .thresholds(ThresholdSet {
            response_time: response_time(500.0, 1000.0, 2000.0),
            error_rate: Some(ErrorRateThreshold { max: 1.0 }),
            ..Default::default()
        })
}

/// Stress test: climb in five steps to a population beyond normal load.
pub fn stress_test(url: &str, users: u32, duration_secs: u64) -> ScenarioBuilder {
    ScenarioBuilder::new("Stress Test", TestType::Stress)
        .url(url)
        .pattern(LoadPattern::Step)
        .virtual_users(users)
        .duration_secs(duration_secs)
        .think_time_ms(500)
        .thresholds(ThresholdSet {
            response_time: response_time(1000.0, 2000.0, 5000.0),
            error_rate: Some(ErrorRateThreshold { max: 5.0 }),
            ..Default::default()
        })
}

/// Spike test: 10% baseline with a short burst to `users`.
pub fn spike_test(url: &str, users: u32, duration_secs: u64) -> ScenarioBuilder {
    ScenarioBuilder::new("Spike Test", TestType::Spike)
        .url(url)
        .pattern(LoadPattern::Spike)
        .virtual_users(users)
        .duration_secs(duration_secs)
        .thresholds(ThresholdSet {
            response_time: response_time(1000.0, 3000.0, 5000.0),
            error_rate: Some(ErrorRateThreshold { max: 10.0 }),
            ..Default::default()
        })
}

/// Endurance (soak) test: constant moderate load with resource ceilings.
pub fn endurance_test(url: &str, users: u32, duration_secs: u64) -> ScenarioBuilder {
    ScenarioBuilder::new("Endurance Test", TestType::Endurance)
        .url(url)
        .pattern(LoadPattern::Constant)
        .virtual_users(users)
        .duration_secs(duration_secs)
        .think_time_ms(2000)
        .thresholds(ThresholdSet {
            response_time: response_time(500.0, 1000.0, 2000.0),
            error_rate: Some(ErrorRateThreshold { max: 0.5 }),
            resources: Some(ResourceThresholds {
                cpu_max: Some(80.0),
                memory_max: Some(1024.0),
            }),
            ..Default::default()
        })
}

/// Baseline test: a single user establishing reference latencies.
pub fn baseline_test(url: &str, duration_secs: u64) -> ScenarioBuilder {
    ScenarioBuilder::new("Baseline Test", TestType::Baseline)
        .url(url)
        .pattern(LoadPattern::Constant)
        .virtual_users(1)
        .duration_secs(duration_secs)
        .warmup_requests(5)
        .thresholds(ThresholdSet {
            response_time: response_time(200.0, 500.0, 1000.0),
            error_rate: Some(ErrorRateThreshold { max: 0.0 }),
            ..Default::default()
        })
}

/// Volume test: many users with no think time and a throughput floor.
pub fn volume_test(url: &str, users: u32, duration_secs: u64, min_rps: f64) -> ScenarioBuilder {
    ScenarioBuilder::new("Volume Test", TestType::Volume)
        .url(url)
        .pattern(LoadPattern::Constant)
        .virtual_users(users)
        .duration_secs(duration_secs)
        .think_time_ms(0)
        .thresholds(ThresholdSet {
            throughput: Some(ThroughputThreshold { min: min_rps }),
            error_rate: Some(ErrorRateThreshold { max: 2.0 }),
            ..Default::default()
        })
}

/// Preset by test type name, used by the CLI `template` command.
pub fn preset_for(test_type: TestType, url: &str) -> ScenarioBuilder {
    match test_type {
        TestType::Load => load_test(url, 50, 300),
        TestType::Stress => stress_test(url, 200, 600),
        TestType::Spike => spike_test(url, 100, 120),
        TestType::Endurance => endurance_test(url, 20, 3600),
        TestType::Baseline => baseline_test(url, 60),
        TestType::Volume => volume_test(url, 100, 300, 200.0),
        TestType::UiLoad | TestType::UiPerformance => {
            ScenarioBuilder::new("UI Performance Test", test_type)
                .url(url)
                .pattern(LoadPattern::Constant)
                .virtual_users(3)
                .duration_secs(120)
                .think_time_ms(3000)
                .thresholds(ThresholdSet {
                    response_time: response_time(2500.0, 4000.0, 6000.0),
                    ..Default::default()
                })
        }
    }
}
