//! weir command line.
//!
//! - `plan`: print the aligned cadences of a pipeline
//! - `run`: wait for the gate, then execute one instance
//! - `gate`: evaluate the gate of one instance once
//! - `instances`: list the run registry rows of a pipeline

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use weir::{InstanceExecutor, PipelineConfig};
use weir_logging::LogConfig;
use weir_protocol::{format_duration, parse_aware_timestamp};
use weir_schedule::{Cadence, CancellationToken, InstanceQuery, RunRegistry, SqliteRunRegistry};

#[derive(Parser, Debug)]
#[command(name = "weir", about = "Paired full-refresh / incremental ELT pipelines")]
struct Cli {
    /// Enable verbose logging (debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the aligned full-refresh and incremental cadences
    Plan {
        /// Pipeline YAML file
        file: PathBuf,

        /// Align as of this instant instead of now (RFC 3339)
        #[arg(long, value_parser = parse_aware_timestamp)]
        now: Option<DateTime<Utc>>,

        /// Number of most recent due executions to show per cadence
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },

    /// Wait for the dependency gate, then execute one instance
    Run {
        file: PathBuf,

        /// full_refresh | incremental
        #[arg(long)]
        cadence: Cadence,

        /// Execution timestamp of the instance (RFC 3339)
        #[arg(long, value_parser = parse_aware_timestamp)]
        at: DateTime<Utc>,

        /// Override the registry URL from the pipeline file
        #[arg(long, env = "WEIR_REGISTRY_URL")]
        registry: Option<String>,
    },

    /// Evaluate the dependency gate of one instance once
    Gate {
        file: PathBuf,

        #[arg(long)]
        cadence: Cadence,

        #[arg(long, value_parser = parse_aware_timestamp)]
        at: DateTime<Utc>,

        #[arg(long, env = "WEIR_REGISTRY_URL")]
        registry: Option<String>,
    },

    /// List run registry rows of a pipeline
    Instances {
        file: PathBuf,

        /// Only this cadence
        #[arg(long)]
        cadence: Option<Cadence>,

        #[arg(long, env = "WEIR_REGISTRY_URL")]
        registry: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    weir_logging::init_logging(LogConfig {
        app_name: "weir",
        verbose: cli.verbose,
    })?;

    match cli.command {
        Commands::Plan { file, now, limit } => cmd_plan(&file, now, limit),
        Commands::Run {
            file,
            cadence,
            at,
            registry,
        } => cmd_run(&file, cadence, at, registry).await,
        Commands::Gate {
            file,
            cadence,
            at,
            registry,
        } => cmd_gate(&file, cadence, at, registry).await,
        Commands::Instances {
            file,
            cadence,
            registry,
        } => cmd_instances(&file, cadence, registry).await,
    }
}

async fn open_registry(config: &PipelineConfig, url: Option<String>) -> Result<SqliteRunRegistry> {
    let url = url.unwrap_or_else(|| config.registry_url().to_string());
    SqliteRunRegistry::connect(&url)
        .await
        .with_context(|| format!("Failed to open run registry at {}", url))
}

fn cmd_plan(file: &Path, now: Option<DateTime<Utc>>, limit: usize) -> Result<()> {
    let config = PipelineConfig::from_yaml_file(file)?;
    let now = now.unwrap_or_else(Utc::now);
    let schedule = config.aligner()?.align_at(now);

    println!("Pipeline: {}", config.name());
    println!("Aligned at: {}", now.to_rfc3339());
    for cadence in [Cadence::FullRefresh, Cadence::Incremental] {
        let cadence_schedule = schedule.cadence(cadence);
        let tables = config.jobs(cadence)?.len();
        println!();
        println!("{} ({})", cadence_schedule.job_id, cadence);
        println!("  start:    {}", cadence_schedule.start.to_rfc3339());
        println!("  interval: {}", format_duration(cadence_schedule.interval));
        if let Some(end) = cadence_schedule.end {
            println!("  end:      {}", end.to_rfc3339());
        }
        println!("  tables:   {}", tables);

        let due = cadence_schedule.due_executions(now);
        if due.is_empty() {
            println!("  due:      none");
        } else {
            let skip = due.len().saturating_sub(limit);
            for ts in &due[skip..] {
                println!("  due:      {}", ts.to_rfc3339());
            }
        }
    }
    Ok(())
}

async fn cmd_run(
    file: &Path,
    cadence: Cadence,
    at: DateTime<Utc>,
    registry_url: Option<String>,
) -> Result<()> {
    let config = PipelineConfig::from_yaml_file(file)?;
    let schedule = config.schedule_for(at)?;
    let registry: Arc<dyn RunRegistry> = Arc::new(open_registry(&config, registry_url).await?);
    let executor = InstanceExecutor::from_config(&config, schedule, registry)?;

    let cancel = CancellationToken::new();
    install_signal_handlers(cancel.clone())?;

    let outcome = executor.execute(cadence, at, &cancel).await?;
    for report in &outcome.reports {
        println!(
            "{}: {} rows in {} chunks, {} indexes",
            report.job_id,
            report.rows_written,
            report.chunks,
            report.indexes.len()
        );
    }
    for failure in &outcome.failures {
        eprintln!("{}: {}", failure.table, failure.message);
    }
    if !outcome.succeeded() {
        bail!(
            "Instance {} @ {} failed ({} of {} tables)",
            outcome.job_id,
            outcome.execution_ts,
            outcome.failures.len(),
            outcome.failures.len() + outcome.reports.len()
        );
    }
    println!("{} @ {}: {}", outcome.job_id, outcome.execution_ts, outcome.state);
    Ok(())
}

async fn cmd_gate(
    file: &Path,
    cadence: Cadence,
    at: DateTime<Utc>,
    registry_url: Option<String>,
) -> Result<()> {
    let config = PipelineConfig::from_yaml_file(file)?;
    let schedule = config.schedule_for(at)?;
    let registry: Arc<dyn RunRegistry> = Arc::new(open_registry(&config, registry_url).await?);
    let executor = InstanceExecutor::from_config(&config, schedule, registry)?;
    let decision = executor.evaluate_gate(cadence, at).await?;
    println!("{}", decision);
    Ok(())
}

async fn cmd_instances(
    file: &Path,
    cadence: Option<Cadence>,
    registry_url: Option<String>,
) -> Result<()> {
    let config = PipelineConfig::from_yaml_file(file)?;
    let registry = open_registry(&config, registry_url).await?;
    let cadences = match cadence {
        Some(cadence) => vec![cadence],
        None => vec![Cadence::FullRefresh, Cadence::Incremental],
    };

    println!("{:<48} {:<26} {:<8} RUN", "JOB", "EXECUTION", "STATE");
    for cadence in cadences {
        let job_id = cadence.job_id(config.name())?;
        for instance in registry.instances(&InstanceQuery::all(&job_id)).await? {
            println!(
                "{:<48} {:<26} {:<8} {}",
                instance.job_id,
                instance.execution_ts.to_rfc3339(),
                instance.state,
                instance.run_id.map(|r| r.to_string()).unwrap_or_else(|| "-".to_string())
            );
        }
    }
    registry.close().await;
    Ok(())
}

/// SIGINT/SIGTERM cancel the running instance; the loader rolls back.
fn install_signal_handlers(cancel: CancellationToken) -> Result<()> {
    #[cfg(unix)]
    {
        use signal_hook::consts::{SIGINT, SIGTERM};
        use signal_hook::iterator::Signals;

        let mut signals = Signals::new([SIGINT, SIGTERM])?;
        std::thread::spawn(move || {
            if let Some(sig) = signals.forever().next() {
                info!("Received signal {}, cancelling instance...", sig);
                cancel.cancel();
            }
        });
    }

    #[cfg(windows)]
    {
        ctrlc::set_handler(move || {
            info!("Received Ctrl+C, cancelling instance...");
            cancel.cancel();
        })?;
    }

    Ok(())
}
