//! databridge CLI - run one configured bridge for one fetch window.

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::Utc;
use clap::Parser;
use tracing::{error, info, warn};

use databridge::core::metrics::{self, kestra::Metric};
use databridge::core::sources::FetchOptions;
use databridge::core::store::Ledger;
use databridge::core::window::{self, WindowArgs};
use databridge::{load_config, Pipeline, Registry, RunError, RunOptions, RunSummary};

#[derive(Parser)]
#[command(name = "databridge")]
#[command(about = "Schema-driven transfer of records from a source into a relational store")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); RUST_LOG wins when set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Create the destination table before storing
    #[arg(long)]
    run_schema: bool,

    /// Fetch one UTC day (e.g. 2024-09-01)
    #[arg(long)]
    date: Option<String>,

    /// Window start in RFC 3339 (e.g. 2024-09-01T00:00:00Z)
    #[arg(long)]
    start: Option<String>,

    /// Window end in RFC 3339 (e.g. 2024-09-02T00:00:00Z)
    #[arg(long)]
    end: Option<String>,

    /// Fetch the trailing interval ending now (e.g. 30m, 1h30m)
    #[arg(long)]
    interval: Option<String>,

    /// Input file for file-based sources
    #[arg(long)]
    file_path: Option<PathBuf>,

    /// Print Kestra metric lines after the run
    #[arg(long)]
    kestra: bool,

    /// Write Prometheus text exposition to this file after the run
    #[arg(long)]
    metrics_out: Option<PathBuf>,

    /// SQLite ledger of runs and rejected records
    #[arg(long)]
    ledger: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    databridge::core::logging::init(&cli.log_level);

    let result = run(&cli).await;

    if let Some(path) = &cli.metrics_out {
        if let Err(e) = metrics::write_to(path) {
            warn!(path = %path.display(), error = %e, "failed to write metrics");
        }
    }

    match result {
        Ok(summary) => {
            if cli.kestra {
                emit_kestra(&summary);
            }
            if summary.is_clean() {
                ExitCode::SUCCESS
            } else {
                warn!(rejected = summary.rejected, failed = summary.failed, "completed with errored records");
                ExitCode::from(1)
            }
        }
        Err(e) => {
            if let Some(RunError::Aborted { summary, .. }) = e.downcast_ref::<RunError>() {
                if cli.kestra {
                    emit_kestra(summary);
                }
            }
            error!(error = %e, "bridge failed");
            ExitCode::from(2)
        }
    }
}

async fn run(cli: &Cli) -> Result<RunSummary, Box<dyn std::error::Error>> {
    let config = load_config(&cli.config)?;
    let window = window::resolve(
        &WindowArgs {
            date: cli.date.clone(),
            start: cli.start.clone(),
            end: cli.end.clone(),
            interval: cli.interval.clone(),
        },
        Utc::now(),
    )?;

    let options = RunOptions {
        fetch: FetchOptions { start_at: window.start_at, end_at: window.end_at, file_path: cli.file_path.clone() },
        run_schema: cli.run_schema,
    };

    let mut ledger = match &cli.ledger {
        Some(path) => {
            let ledger = Ledger::open(path)?;
            let crashed = ledger.mark_inflight_as_crashed()?;
            if crashed > 0 {
                warn!(crashed, "marked unfinished runs from a previous process as crashed");
            }
            Some(ledger)
        }
        None => None,
    };

    let registry = Registry::builtin();
    let mut pipeline = Pipeline::new(&registry, config)?;
    info!(bridge = pipeline.name(), start_at = ?window.start_at, end_at = ?window.end_at, "starting bridge");

    Ok(pipeline.run(&options, ledger.as_mut()).await?)
}

fn emit_kestra(summary: &RunSummary) {
    for (name, value) in [
        ("total_success", summary.written),
        ("total_failed", summary.failed),
        ("total_rejected", summary.rejected),
    ] {
        Metric::counter(name, value as f64).with_tag("bridge", summary.name.as_str()).emit();
    }
}
