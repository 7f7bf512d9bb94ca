use clap::{Parser, Subcommand, ValueEnum};
use stampede_core::presets::preset_for;
use stampede_core::{
    EngineConfig, RequestExecutor, ScenarioConfig, StampedeError, StampedeResult, TestId,
    TestResult, TestType, TracingReportSink,
};
use stampede_engine::{
    HttpExecutor, MockConfig, MockExecutor, ReportFormat, RunHandle, StopOutcome,
    TestRunOrchestrator,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "stampede")]
#[command(about = "Load and performance testing orchestrator", long_about = None)]
#[command(version)]
struct Cli {
    /// Log output format
    #[arg(
        long,
        value_enum,
        env = "STAMPEDE_LOG_FORMAT",
        default_value_t = LogFormat::Text,
        global = true
    )]
    log_format: LogFormat,

    /// Engine configuration file (defaults to STAMPEDE_CONFIG / ./config/stampede)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a scenario and write reports
    Run {
        /// Scenario JSON file
        #[arg(long)]
        scenario: PathBuf,

        /// Report formats (markdown, csv, json); defaults to report.formats
        #[arg(long, value_delimiter = ',')]
        format: Vec<String>,

        /// Report output directory; defaults to report.output_dir
        #[arg(long)]
        output: Option<PathBuf>,

        /// Use the in-memory executor instead of sending real traffic
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate a scenario file without running it
    Validate {
        /// Scenario JSON file
        #[arg(long)]
        scenario: PathBuf,
    },

    /// Print a preset scenario for a test type
    Template {
        /// Test type (load, stress, spike, volume, endurance, baseline, ui-load, ui-performance)
        #[arg(long, default_value = "load")]
        kind: String,

        /// Target URL
        #[arg(long, default_value = "http://localhost:8080/")]
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    init_logging(cli.log_format);

    match cli.command {
        Commands::Run {
            scenario,
            format,
            output,
            dry_run,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(output) = output {
                config.report.output_dir = output;
            }
            let formats = if format.is_empty() {
                parse_formats(&config.report.formats)?
            } else {
                parse_formats(&format)?
            };

            let scenario = load_scenario(&scenario).await?;
            info!(
                scenario = %scenario.id,
                dry_run,
                output_dir = %config.report.output_dir.display(),
                "Loaded scenario"
            );
            println!(
                "🚀 Running '{}' ({}, {} pattern, {} users, {}s)",
                scenario.name,
                scenario.test_type,
                scenario.load.pattern,
                scenario.load.virtual_users,
                scenario.load.duration
            );

            let executor = executor_for(&config, &scenario, dry_run)?;
            let orchestrator =
                TestRunOrchestrator::new(config, executor, Arc::new(TracingReportSink));
            let handle = orchestrator.spawn_scenario(scenario)?;
            let test_id = handle.test_id();
            let outcome = run_until_done(&orchestrator, handle).await;

            // Failed runs still leave a stored result worth reporting
            if let Some(result) = orchestrator.get_result(test_id) {
                print_summary(&result);
                for path in export_reports(&orchestrator, test_id, &formats)? {
                    println!("📄 {}", path.display());
                }
            }

            let result = outcome?;
            if !result.passed {
                std::process::exit(1);
            }
            Ok(())
        }

        Commands::Validate { scenario } => {
            let scenario = load_scenario(&scenario).await?;
            println!(
                "✅ Scenario '{}' is valid ({} pattern, {} users, {}s)",
                scenario.name,
                scenario.load.pattern,
                scenario.load.virtual_users,
                scenario.load.duration
            );
            Ok(())
        }

        Commands::Template { kind, url } => {
            let test_type: TestType = kind.parse()?;
            let scenario = preset_for(test_type, &url).build()?;
            println!("{}", scenario.to_json_pretty()?);
            Ok(())
        }
    }
}

fn init_logging(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Text => fmt().with_env_filter(env_filter).with_target(false).init(),
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(false)
            .init(),
    }
}

fn load_config(path: Option<&Path>) -> StampedeResult<EngineConfig> {
    Ok(match path {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::load()?,
    })
}

fn parse_formats(names: &[String]) -> StampedeResult<Vec<ReportFormat>> {
    let mut formats = Vec::new();
    for name in names {
        let format: ReportFormat = name.parse()?;
        if !formats.contains(&format) {
            formats.push(format);
        }
    }
    Ok(formats)
}

async fn load_scenario(path: &Path) -> StampedeResult<ScenarioConfig> {
    let json = tokio::fs::read_to_string(path).await?;
    let scenario = ScenarioConfig::from_json(&json)?;
    scenario.validate()?;
    Ok(scenario)
}

fn executor_for(
    config: &EngineConfig,
    scenario: &ScenarioConfig,
    dry_run: bool,
) -> StampedeResult<Arc<dyn RequestExecutor>> {
    if dry_run {
        return Ok(Arc::new(MockExecutor::new(MockConfig::default())));
    }
    if scenario.test_type.is_ui() {
        return Err(StampedeError::validation(format!(
            "{} scenarios need a browser session; run with --dry-run",
            scenario.test_type
        )));
    }
    if scenario.request.is_none() {
        return Err(StampedeError::validation(
            "scenario has no request template; add `request` or run with --dry-run",
        ));
    }
    Ok(Arc::new(HttpExecutor::new(&config.http)?))
}

/// Write every requested report plus the Prometheus snapshot.
fn export_reports(
    orchestrator: &TestRunOrchestrator,
    test_id: TestId,
    formats: &[ReportFormat],
) -> StampedeResult<Vec<PathBuf>> {
    let mut paths = Vec::with_capacity(formats.len() + 1);
    for format in formats {
        paths.push(orchestrator.export_results(test_id, *format)?);
    }
    paths.push(orchestrator.export_metrics(test_id)?);
    Ok(paths)
}

/// Wait for the run, stopping it cleanly on Ctrl-C.
async fn run_until_done(
    orchestrator: &TestRunOrchestrator,
    handle: RunHandle,
) -> StampedeResult<TestResult> {
    let test_id = handle.test_id();
    let run = handle.join();
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => result,
        _ = tokio::signal::ctrl_c() => {
            println!("\n⏹  Stopping test {}...", test_id.short());
            match orchestrator.stop_test(test_id).await? {
                StopOutcome::Quiesced => info!(test_id = %test_id, "Test stopped"),
                StopOutcome::TimedOut => {
                    warn!(test_id = %test_id, "Virtual users did not stop in time");
                    println!("⚠️  Some virtual users did not stop in time");
                }
            }
            run.await
        }
    }
}

fn print_summary(result: &TestResult) {
    let s = &result.summary;

    println!(
        "\n{} {} ({})",
        if result.passed { "✅" } else { "❌" },
        if result.passed { "PASSED" } else { "FAILED" },
        result.status
    );
    println!("   Duration: {:.1}s", result.duration_ms as f64 / 1000.0);
    println!("   Total requests: {}", s.total_requests);
    println!("   Successful: {}", s.successful_requests);
    println!("   Failed: {}", s.failed_requests);
    println!("   Error rate: {:.2}%", s.error_rate);
    println!(
        "   Latency avg/p95/p99: {:.2}/{:.2}/{:.2}ms",
        s.average_response_time, s.p95_response_time, s.p99_response_time
    );
    println!("   Throughput: {:.1} req/s", s.requests_per_second);
    println!("   Peak virtual users: {}", s.peak_virtual_users);
    if !result.violations.is_empty() {
        println!(
            "   Threshold violations: {} critical, {} warning",
            result.critical_violations(),
            result.warning_violations()
        );
    }
    println!();
}
