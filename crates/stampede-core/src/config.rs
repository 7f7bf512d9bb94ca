//! Engine configuration
//!
//! Settings are layered with the following precedence:
//! - Environment variables (`STAMPEDE_` prefix, `__` separator)
//! - File named by `STAMPEDE_CONFIG`
//! - ./config/stampede.{toml,yaml,json}
//! - Hardcoded defaults

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration for the orchestrator
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub run: RunConfig,

    #[serde(default)]
    pub warmup: WarmupConfig,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub report: ReportConfig,
}

impl EngineConfig {
    /// Load configuration from defaults, files and environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a source is malformed or validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        builder = Self::set_defaults(builder)?;

        if let Ok(config_path) = std::env::var("STAMPEDE_CONFIG") {
            builder = builder.add_source(File::with_name(&config_path).required(false));
        }

        builder = builder.add_source(File::with_name("./config/stampede").required(false));

        // Example: STAMPEDE_RUN__STOP_TIMEOUT_SECS=30
        builder = builder.add_source(
            Environment::with_prefix("STAMPEDE")
                .separator("__")
                .try_parsing(true),
        );

        let config: EngineConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    fn set_defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        builder
            // Metrics
            .set_default("metrics.sample_interval_ms", 1000)?
            .set_default("metrics.collect_system", true)?
            // Run lifecycle
            .set_default("run.retention_secs", 300)?
            .set_default("run.stop_timeout_secs", 10)?
            .set_default("run.default_think_time_ms", 1000)?
            // Warmup
            .set_default("warmup.max_users", 5)?
            .set_default("warmup.max_duration_secs", 30)?
            // HTTP
            .set_default("http.default_timeout_ms", 30_000)?
            .set_default("http.user_agent", default_user_agent())?
            // Reports
            .set_default("report.output_dir", "./reports")?
            .set_default("report.formats", vec!["markdown", "json"])
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Message` naming the offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.metrics.sample_interval_ms == 0 {
            return Err(ConfigError::Message(
                "metrics.sample_interval_ms must be > 0".to_string(),
            ));
        }

        if self.run.stop_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "run.stop_timeout_secs must be > 0".to_string(),
            ));
        }

        if self.warmup.max_users == 0 || self.warmup.max_users > WarmupConfig::USER_LIMIT {
            return Err(ConfigError::Message(format!(
                "warmup.max_users must be between 1 and {}",
                WarmupConfig::USER_LIMIT
            )));
        }

        if self.warmup.max_duration_secs == 0
            || self.warmup.max_duration_secs > WarmupConfig::DURATION_LIMIT_SECS
        {
            return Err(ConfigError::Message(format!(
                "warmup.max_duration_secs must be between 1 and {}",
                WarmupConfig::DURATION_LIMIT_SECS
            )));
        }

        if self.http.default_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "http.default_timeout_ms must be > 0".to_string(),
            ));
        }

        for format in &self.report.formats {
            if !matches!(format.as_str(), "markdown" | "md" | "csv" | "json") {
                return Err(ConfigError::Message(format!(
                    "report.formats contains unknown format '{format}'"
                )));
            }
        }

        Ok(())
    }

    /// Load configuration from a specific file path, on top of defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be parsed or is invalid.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let builder = Self::set_defaults(Config::builder())?;
        let config: EngineConfig = builder
            .add_source(File::from(path.as_ref()))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }
}

/// Metrics sampling configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Interval between metrics samples in milliseconds
    pub sample_interval_ms: u64,

    /// Sample process CPU and memory alongside request metrics
    pub collect_system: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 1000,
            collect_system: true,
        }
    }
}

impl MetricsConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

/// Run lifecycle configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunConfig {
    /// Seconds a finished execution stays queryable
    pub retention_secs: u64,

    /// Bounded wait for virtual users to quiesce on stop
    pub stop_timeout_secs: u64,

    /// Think time used when a scenario does not set one
    pub default_think_time_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            retention_secs: 300,
            stop_timeout_secs: 10,
            default_think_time_ms: 1000,
        }
    }
}

impl RunConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

/// Warmup phase limits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WarmupConfig {
    /// At most [`WarmupConfig::USER_LIMIT`].
    pub max_users: u32,
    /// At most [`WarmupConfig::DURATION_LIMIT_SECS`].
    pub max_duration_secs: u64,
}

impl WarmupConfig {
    pub const USER_LIMIT: u32 = 5;
    pub const DURATION_LIMIT_SECS: u64 = 30;

    /// Warmup users, clamped to `1..=USER_LIMIT` and the scenario's own size.
    #[must_use]
    pub fn users_for(&self, virtual_users: u32) -> u32 {
        self.max_users
            .min(Self::USER_LIMIT)
            .min(virtual_users)
            .max(1)
    }

    #[must_use]
    pub fn duration_secs(&self) -> u64 {
        self.max_duration_secs.clamp(1, Self::DURATION_LIMIT_SECS)
    }
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            max_users: Self::USER_LIMIT,
            max_duration_secs: Self::DURATION_LIMIT_SECS,
        }
    }
}

/// HTTP executor defaults
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpConfig {
    /// Timeout applied when the request template has none
    pub default_timeout_ms: u64,

    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            user_agent: default_user_agent(),
        }
    }
}

impl HttpConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

/// Report output configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReportConfig {
    pub output_dir: PathBuf,

    /// Formats written at the end of a CLI run
    pub formats: Vec<String>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./reports"),
            formats: vec!["markdown".to_string(), "json".to_string()],
        }
    }
}

fn default_user_agent() -> String {
    format!("stampede/{}", env!("CARGO_PKG_VERSION"))
}
