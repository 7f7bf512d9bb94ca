//! Core domain types and traits for the Stampede load-testing orchestrator.

pub mod config;
pub mod error;
pub mod ids;
pub mod metrics;
pub mod presets;
pub mod result;
pub mod sample;
pub mod scenario;
pub mod status;
pub mod traits;

pub use config::EngineConfig;
pub use error::{StampedeError, StampedeResult};
pub use ids::{TestId, VirtualUserId};
pub use presets::ScenarioBuilder;
pub use result::{SummaryStatistics, TestResult, VirtualUserSummary};
pub use sample::{
    ErrorSummary, MetricsSample, RequestCounts, ResponseTimeStats, Severity, SystemMetrics,
    ThresholdViolation, Throughput, VirtualUserCounts,
};
pub use scenario::{
    CustomStep, ErrorRateThreshold, LoadConfig, LoadPattern, RequestTemplate,
    ResourceThresholds, ResponseTimeThresholds, ScenarioConfig, TestType, ThresholdSet,
    ThroughputThreshold,
};
pub use status::{TestStatus, VirtualUserStatus};
pub use traits::{
    BrowserSession, ExecutorError, PageLoadTiming, ReportSink, RequestExecutor, RequestOutcome,
    TracingReportSink, WebVitals,
};
