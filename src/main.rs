//! telemetry-sentinel - industrial sensor telemetry pipeline
//!
//! Validates incoming readings, derives features, applies the per-type
//! models and thresholds, and keeps alert/prediction state queryable.
//!
//! # Usage
//!
//! ```bash
//! # Pipe a collector into the pipeline
//! simulator | telemetry-sentinel run --stdin
//!
//! # Replay a recorded file and keep the read API up afterwards
//! telemetry-sentinel run --file readings.jsonl --delay-ms 100 --serve
//!
//! # HTTP ingestion only
//! telemetry-sentinel run --serve --addr 127.0.0.1:8080
//!
//! # Validate sentinel.toml and model artifacts
//! telemetry-sentinel --config sentinel.toml check-config
//!
//! # Sensor summary as JSON
//! telemetry-sentinel report
//! ```
//!
//! # Environment Variables
//!
//! - `SENTINEL_CONFIG`: path to the TOML config (when `--config` is absent)
//! - `SENTINEL_CORS_ORIGINS`: comma-separated origins allowed by the read API
//! - `RUST_LOG`: logging level (default: info)

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use telemetry_sentinel::api::{create_app, ApiState};
use telemetry_sentinel::config::SentinelConfig;
use telemetry_sentinel::model::ModelRegistry;
use telemetry_sentinel::pipeline::{
    JsonLinesFileSource, LoopStats, Orchestrator, ProcessingLoop, ReadingSource, StdinSource,
};
use telemetry_sentinel::storage::{self, seed_registry, SledStore, TelemetryStore};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "telemetry-sentinel")]
#[command(about = "Sensor telemetry validation, prediction and alerting pipeline")]
#[command(version)]
struct CliArgs {
    /// Path to sentinel.toml (overrides SENTINEL_CONFIG and ./sentinel.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the sled database path from the config
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,

    /// Wipe all stored readings, alerts and predictions on startup.
    /// WARNING: This is destructive and cannot be undone!
    #[arg(long, global = true, env = "RESET_DB")]
    reset_db: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<SubCommand>,
}

#[derive(Subcommand, Debug)]
enum SubCommand {
    /// Run the pipeline (default)
    Run(RunArgs),
    /// Load and validate the configuration and model artifacts, then exit
    CheckConfig,
    /// Print the per-sensor summary report as JSON
    Report,
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Read JSON readings from stdin, one per line
    #[arg(long, conflicts_with = "file")]
    stdin: bool,

    /// Replay a JSON-lines readings file
    #[arg(long, value_name = "PATH")]
    file: Option<PathBuf>,

    /// Delay between replayed readings (ms)
    #[arg(long, default_value = "0")]
    delay_ms: u64,

    /// Serve the read/ingestion API
    #[arg(long)]
    serve: bool,

    /// Override the server address from the config
    #[arg(short, long)]
    addr: Option<String>,
}

// ============================================================================
// Startup helpers
// ============================================================================

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

fn load_config(args: &CliArgs) -> Result<SentinelConfig> {
    let mut config = match &args.config {
        Some(path) => SentinelConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => SentinelConfig::load().context("Failed to load config")?,
    };
    if let Some(db) = &args.db {
        config.storage.path = db.clone();
    }
    Ok(config)
}

fn open_store(path: &Path, reset: bool) -> Result<Arc<SledStore>> {
    info!(path = %path.display(), "Opening telemetry store");
    let store = SledStore::open(path)
        .with_context(|| format!("Failed to open store at {}", path.display()))?;
    if reset {
        warn!(path = %path.display(), "RESET_DB: wiping all stored telemetry");
        store.clear().context("Failed to reset store")?;
    }
    Ok(Arc::new(store))
}

// ============================================================================
// Subcommands
// ============================================================================

fn check_config(config: &SentinelConfig) -> Result<()> {
    config.validate().context("Configuration is invalid")?;
    config.check_bindings().context("Registry references unbound sensor types")?;
    ModelRegistry::from_bindings(&config.models).context("Model artifacts failed to load")?;

    let sensors: usize = config.assets.iter().map(|a| a.sensors.len()).sum();
    info!(assets = config.assets.len(), sensors, "Configuration OK");
    println!("{}", config.to_toml()?);
    Ok(())
}

fn report(config: &SentinelConfig) -> Result<()> {
    let store = open_store(&config.storage.path, false)?;
    let rows = storage::sensor_summary(store.as_ref()).context("Failed to build sensor summary")?;
    info!(sensors = rows.len(), bytes_on_disk = store.size_on_disk(), "Sensor summary");
    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(())
}

fn spawn_http_server(
    task_set: &mut JoinSet<Result<()>>,
    listener: tokio::net::TcpListener,
    app: axum::Router,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        info!("[HttpServer] Task starting");
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                info!("[HttpServer] Received shutdown signal");
            })
            .await
            .context("HTTP server error")?;
        info!("[HttpServer] Graceful shutdown complete");
        Ok(())
    });
}

async fn ingest<S: ReadingSource>(
    orchestrator: &Arc<Orchestrator>,
    mut source: S,
    cancel_token: &CancellationToken,
) -> LoopStats {
    ProcessingLoop::new(Arc::clone(orchestrator), cancel_token.clone())
        .run(&mut source)
        .await
}

async fn run(config: SentinelConfig, run_args: RunArgs, reset_db: bool) -> Result<()> {
    let store = open_store(&config.storage.path, reset_db)?;
    let seeded = seed_registry(store.as_ref(), &config.assets).context("Failed to seed sensor registry")?;
    info!(sensors = seeded, backend = store.backend_name(), "Sensor registry seeded");

    let models = Arc::new(ModelRegistry::from_bindings(&config.models).context("Failed to load models")?);
    let store: Arc<dyn TelemetryStore> = store;
    let orchestrator = Arc::new(
        Orchestrator::start(store, models, &config)
            .await
            .context("Pipeline failed to start")?,
    );

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, initiating shutdown");
        shutdown_token.cancel();
    });

    let has_source = run_args.stdin || run_args.file.is_some();
    let serve = run_args.serve || !has_source;

    let mut tasks = JoinSet::new();
    if serve {
        let addr = run_args.addr.unwrap_or_else(|| config.server.addr.clone());
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;
        info!(addr = %addr, "Read API listening");
        let app = create_app(ApiState::new(Arc::clone(&orchestrator)));
        spawn_http_server(&mut tasks, listener, app, cancel_token.clone());
    }

    let stats = if run_args.stdin {
        Some(ingest(&orchestrator, StdinSource::new(), &cancel_token).await)
    } else if let Some(path) = &run_args.file {
        let source = JsonLinesFileSource::open(path, run_args.delay_ms).await?;
        Some(ingest(&orchestrator, source, &cancel_token).await)
    } else {
        None
    };
    if let Some(stats) = stats {
        info!(processed = stats.processed, rejected = stats.rejected, alerts = stats.alerts, "Ingestion finished");
    }

    if serve && !cancel_token.is_cancelled() {
        info!("Serving until Ctrl+C");
        cancel_token.cancelled().await;
    }
    cancel_token.cancel();

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Task failed"),
            Err(e) => error!(error = %e, "Task panicked"),
        }
    }

    let stalled = orchestrator.shutdown().await;
    if !stalled.is_empty() {
        warn!(sensors = ?stalled, "Sensors were stalled at shutdown");
    }
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_json);

    let config = load_config(&args)?;

    match args.command {
        Some(SubCommand::CheckConfig) => check_config(&config),
        Some(SubCommand::Report) => report(&config),
        Some(SubCommand::Run(run_args)) => run(config, run_args, args.reset_db).await,
        None => run(config, RunArgs::default(), args.reset_db).await,
    }?;

    info!("telemetry-sentinel shutdown complete");
    Ok(())
}
