//! `gateflow` command line.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueHint};
use gateflow::config::PipelineConfig;
use gateflow::core::{RunId, RunStatus};
use gateflow::engine::ModuleRegistry;
use gateflow::evaluator::{read_evaluation, BLESSED_PROPERTY, STATE_PROPERTY};
use gateflow::fraud_detection::create_pipeline;
use gateflow::pipeline::LocalDagRunner;
use gateflow::resolver::{LatestBlessedModelStrategy, ResolutionStrategy};
use serde_json::json;
use tracing::{error, info};
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "gateflow", version, about = "Blessing-gated ML pipeline runner")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load the config, assemble the pipeline and print its execution order.
    Validate {
        /// Pipeline config file.
        #[arg(value_hint = ValueHint::FilePath)]
        config: PathBuf,
    },
    /// Run the pipeline once.
    Run {
        /// Pipeline config file.
        #[arg(value_hint = ValueHint::FilePath)]
        config: PathBuf,
    },
    /// List past runs and their evaluation verdicts.
    History {
        /// Pipeline config file.
        #[arg(value_hint = ValueHint::FilePath)]
        config: PathBuf,
    },
    /// Print the model the next run would compare against.
    Resolve {
        /// Pipeline config file.
        #[arg(value_hint = ValueHint::FilePath)]
        config: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = configure_tracing(cli.json) {
        eprintln!("error: {err}");
        return ExitCode::FAILURE;
    }

    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")
        .and_then(|runtime| runtime.block_on(dispatch(cli.command)));

    match result {
        Ok(code) => code,
        Err(err) => {
            error!(error = ?err, "Command failed");
            ExitCode::FAILURE
        }
    }
}

fn configure_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|err| anyhow!(err.to_string()))
    } else {
        registry
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|err| anyhow!(err.to_string()))
    }
}

async fn dispatch(command: Commands) -> Result<ExitCode> {
    match command {
        Commands::Validate { config } => validate(&config),
        Commands::Run { config } => run(&config).await,
        Commands::History { config } => history(&config).await,
        Commands::Resolve { config } => resolve(&config).await,
    }
}

fn load(path: &Path) -> Result<PipelineConfig> {
    PipelineConfig::load(path).with_context(|| format!("invalid config {}", path.display()))
}

fn print(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn validate(path: &Path) -> Result<ExitCode> {
    let config = load(path)?;
    let pipeline = create_pipeline(&config, &ModuleRegistry::new()).context("pipeline does not assemble")?;
    let order: Vec<&str> = pipeline.execution_ids().into_iter().map(|id| id.as_str()).collect();
    print(&json!({"pipeline": pipeline.name(), "execution_order": order}))?;
    Ok(ExitCode::SUCCESS)
}

async fn run(path: &Path) -> Result<ExitCode> {
    let config = load(path)?;
    let pipeline = create_pipeline(&config, &ModuleRegistry::new()).context("pipeline does not assemble")?;
    let report = LocalDagRunner::new()
        .run_with_configured_store(&pipeline)
        .await
        .context("pipeline run failed")?;

    info!(run_id = %report.run_id, status = %report.status, "Run finished");
    print(&serde_json::to_value(&report)?)?;
    Ok(match report.status {
        RunStatus::Completed => ExitCode::SUCCESS,
        // Halted is an expected outcome, distinct from failure.
        _ => ExitCode::from(2),
    })
}

async fn history(path: &Path) -> Result<ExitCode> {
    let config = load(path)?;
    let store = config
        .metadata_connection
        .open()
        .context("failed to open metadata store")?;
    let snapshot = store.snapshot().await?;

    let runs: Vec<serde_json::Value> = snapshot
        .pipeline_runs(&config.pipeline_name)
        .map(|run| {
            let blessing = snapshot.evaluation_of(run.run_id);
            json!({
                "run_id": run.run_id,
                "status": run.status,
                "started_at": run.started_at,
                "blessed": blessing.and_then(|b| b.bool_property(BLESSED_PROPERTY)),
                "state": blessing.and_then(|b| b.str_property(STATE_PROPERTY)),
                "failed_checks": blessing
                    .and_then(read_evaluation)
                    .map(|record| record.failures().count()),
            })
        })
        .collect();
    print(&json!({"pipeline": config.pipeline_name, "runs": runs}))?;
    Ok(ExitCode::SUCCESS)
}

async fn resolve(path: &Path) -> Result<ExitCode> {
    let config = load(path)?;
    let store = config
        .metadata_connection
        .open()
        .context("failed to open metadata store")?;
    let resolution = LatestBlessedModelStrategy
        .resolve(store.as_ref(), &config.pipeline_name, RunId(u64::MAX))
        .await?;

    match resolution.model {
        Some(model) => {
            print(&json!({
                "model_id": model.id,
                "uri": model.uri,
                "run_id": model.run_id,
                "created_at": model.created_at,
            }))?;
            Ok(ExitCode::SUCCESS)
        }
        None => {
            info!(pipeline = %config.pipeline_name, "No blessed model yet");
            print(&json!({"model_id": null}))?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
