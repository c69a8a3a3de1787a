//! netdrift Binary Entry Point
//!
//! Runs collection plans, drift diffs and the read API from one executable.
//! Core functionality is provided by the `netdrift` library crate.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use netdrift::{
    DriftEngine, Orchestrator, RunScheduler, StorageHandles,
    collector::{PlanBuilder, PlanRow},
    config::AppConfig,
    drift::{DiffRequest, run_validators},
    server::{AppState, create_router},
};
use serde::Serialize;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Config file read when `--config` is not given and the file exists.
const DEFAULT_CONFIG_PATH: &str = "netdrift.yaml";

/// netdrift - network state snapshots and drift detection
#[derive(Parser, Debug)]
#[command(name = "netdrift", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "NETDRIFT_CONFIG")]
    config: Option<PathBuf>,

    /// Database path (overrides config file)
    #[arg(long, env = "NETDRIFT_DB")]
    db: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the configured plan once and print the run report
    Run,
    /// Diff the two newest generations of a table
    Diff {
        table: String,
        /// Resource key columns (default: the key declared by the table's collector)
        #[arg(long, value_delimiter = ',')]
        key: Vec<String>,
        /// Monitored columns (default: every non-key column)
        #[arg(long, value_delimiter = ',')]
        columns: Option<Vec<String>>,
    },
    /// Run every configured validator
    Validate,
    /// List snapshot tables
    Tables,
    /// Show the columns of a table
    Schema { table: String },
    /// List the generations of a table, newest first
    Generations { table: String },
    /// Delete all but the newest generations of a table
    Prune {
        table: String,
        #[arg(long)]
        keep: usize,
    },
    /// Run the scheduler and the HTTP API until interrupted
    Serve,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,netdrift=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;

    // CLI/env override > config file
    if let Some(db) = cli.db {
        config.database.path = db;
    }

    let handles = config.database.storage_builder()?.build()?;
    let result = dispatch(cli.command, &config, &handles).await;

    tracing::debug!("Shutting down storage...");
    if let Err(e) = handles.shutdown() {
        tracing::error!(error = %e, "Failed to shutdown storage");
    }
    result
}

fn load_config(path: Option<&Path>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let path = match path {
        Some(path) => path,
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => Path::new(DEFAULT_CONFIG_PATH),
        None => {
            tracing::debug!("No configuration file, using defaults");
            return Ok(AppConfig::default());
        }
    };
    tracing::info!(path = %path.display(), "Loading configuration");
    Ok(AppConfig::load(path)?)
}

async fn dispatch(
    command: Command,
    config: &AppConfig,
    handles: &StorageHandles,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Run => {
            let (orchestrator, plan) = build_orchestrator(config, handles)?;
            let (cancel_tx, cancel_rx) = watch::channel(false);
            let interrupt = tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupted, no further plan rows will start");
                    let _ = cancel_tx.send(true);
                }
            });
            let report = orchestrator
                .run_with_cancel(&plan, Utc::now(), cancel_rx)
                .await;
            interrupt.abort();
            print_json(&report?)
        }
        Command::Diff {
            table,
            key,
            columns,
        } => {
            let key = if key.is_empty() {
                let registry = config.registry()?;
                registry
                    .resource_key_for(&table)
                    .map(<[String]>::to_vec)
                    .ok_or_else(|| {
                        format!("no --key given and no collector declares a key for '{table}'")
                    })?
            } else {
                key
            };
            let mut request = DiffRequest::new(table, key);
            request.columns = columns;
            let engine = DriftEngine::new(handles.reader.clone());
            print_json(&engine.diff_with(&request)?)
        }
        Command::Validate => {
            let validators = config.validators_with_default_keys(&config.registry()?);
            let engine = DriftEngine::new(handles.reader.clone());
            print_json(&run_validators(&engine, &validators))
        }
        Command::Tables => print_json(&handles.reader.list_tables()?),
        Command::Schema { table } => print_json(&serde_json::json!({
            "table": table,
            "columns": handles.reader.read_schema(&table)?,
        })),
        Command::Generations { table } => print_json(&handles.reader.list_generations(&table)?),
        Command::Prune { table, keep } => {
            let deleted = handles.admin.prune(&table, keep).await?;
            print_json(&serde_json::json!({ "table": table, "keep": keep, "deleted": deleted }))
        }
        Command::Serve => serve(config, handles).await,
    }
}

fn build_orchestrator(
    config: &AppConfig,
    handles: &StorageHandles,
) -> Result<(Orchestrator, Vec<PlanRow>), Box<dyn std::error::Error>> {
    let registry = config.registry()?;
    let plan = PlanBuilder::new(&registry)
        .selections(config.plan.iter().cloned())
        .build()?;
    tracing::info!(collectors = registry.len(), rows = plan.len(), "Plan built");

    let orchestrator = Orchestrator::new(
        Arc::new(registry),
        handles.writer.clone(),
        handles.admin.clone(),
    )
    .with_options(config.orchestrator.clone());
    Ok((orchestrator, plan))
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn serve(
    config: &AppConfig,
    handles: &StorageHandles,
) -> Result<(), Box<dyn std::error::Error>> {
    let (orchestrator, plan) = build_orchestrator(config, handles)?;
    let scheduler = if plan.is_empty() {
        tracing::warn!("Plan is empty, scheduler not started");
        None
    } else {
        let scheduler =
            RunScheduler::new(orchestrator, plan, config.schedule.to_schedule()?).await?;
        scheduler.start().await?;
        Some(scheduler)
    };

    let app = create_router(AppState::new(
        handles.reader.clone(),
        handles.admin.clone(),
    ));
    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("Web server listening on: http://{}", addr);
    tracing::info!("Press Ctrl+C to shutdown");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(scheduler) = scheduler {
        tracing::info!("Shutting down scheduler...");
        if let Err(e) = scheduler.shutdown().await {
            tracing::error!(error = %e, "Failed to shutdown scheduler");
        }
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
}
