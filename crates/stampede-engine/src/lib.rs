//! Load generation engine for Stampede.
//!
//! [`TestRunOrchestrator`] is the entry point: it validates a scenario,
//! spawns virtual users according to the load pattern, samples metrics on a
//! timer, evaluates thresholds and produces a [`stampede_core::TestResult`]
//! that [`ReportGenerator`] can render as Markdown, CSV or JSON.

pub mod accumulator;
pub mod aggregator;
pub mod execution;
pub mod executor;
pub mod orchestrator;
pub mod pattern;
pub mod report;
pub mod system;
pub mod threshold;
pub mod virtual_user;

pub use accumulator::{AccumulatorSnapshot, MetricsAccumulator};
pub use aggregator::MetricsAggregator;
pub use execution::TestExecution;
pub use executor::{BrowserExecutor, HttpExecutor, MockConfig, MockExecutor};
pub use orchestrator::{RunHandle, StopOutcome, TestRunOrchestrator};
pub use pattern::{plan, LoadPatternEngine, PlanStep};
pub use report::{ReportFormat, ReportGenerator};
pub use virtual_user::VirtualUser;
