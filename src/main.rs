//! Beacon positioning service
//!
//! Turns gateway distance readings into beacon positions, area assignments and
//! dwell sessions.
//!
//! Module structure:
//! - `domain/` - Value types, geometry kernel, error taxonomy
//! - `io/` - Stores, directory client, positions feed, trigger server
//! - `services/` - Solver, aggregator, classifier, segmenter, pipeline, jobs
//! - `infra/` - Config, Metrics
//!
//! Usage:
//!   beacon-positioning --config config/dev.toml serve
//!   beacon-positioning run --mode areas --since "2024-03-01 09:00:00"

use anyhow::Context;
use beacon_positioning::domain::RunMode;
use beacon_positioning::infra::{Config, Metrics};
use beacon_positioning::io::http::parse_cursor;
use beacon_positioning::io::{
    start_trigger_server, HttpDirectory, JsonlPositionStore, JsonlReadingSource, PositionsFeed,
    ServerState, SessionStore,
};
use beacon_positioning::services::{create_job_queue, Pipeline};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// How long shutdown waits for an in-flight run
const WORKER_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Beacon positioning - trilateration, area classification and dwell sessions
#[derive(Parser, Debug)]
#[command(name = "beacon-positioning", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the trigger HTTP API and process queued runs (default)
    Serve,
    /// Execute one run in the foreground and print its report
    Run {
        /// full | areas
        #[arg(long, default_value = "full")]
        mode: RunMode,
        /// Window start (RFC 3339 or "YYYY-MM-DD HH:MM:SS", UTC); defaults to the lookback window
        #[arg(long)]
        since: Option<String>,
    },
}

fn init_tracing(json: bool) {
    // Default: INFO, use RUST_LOG=debug to see every skipped record
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::new(Rfc3339))
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wire stores, directories and sinks from config
fn build_pipeline(config: &Config, metrics: Arc<Metrics>) -> anyhow::Result<Pipeline> {
    let directory = Arc::new(HttpDirectory::new(config)?);

    let mut pipeline = Pipeline::new(
        Arc::new(JsonlReadingSource::new(config.readings_file())),
        Arc::new(JsonlPositionStore::new(config.positions_file())),
        directory.clone(),
        directory,
        metrics,
    )
    .with_config(config)
    .with_sink(Arc::new(SessionStore::new(config.sessions_file())));

    if config.feed_enabled() {
        pipeline = pipeline.with_sink(Arc::new(PositionsFeed::new(config)?));
    }
    Ok(pipeline)
}

async fn serve(config: Config, pipeline: Pipeline, metrics: Arc<Metrics>) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.bind_address(), config.server_port())
        .parse()
        .with_context(|| format!("Invalid server address {}:{}", config.bind_address(), config.server_port()))?;

    // Handle shutdown on Ctrl+C
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    let (queue, worker) = create_job_queue(Arc::new(pipeline), metrics.clone(), config.queue_size());
    let worker_handle = tokio::spawn(worker.run(shutdown_rx.clone()));

    let state = Arc::new(ServerState::new(
        queue,
        metrics.clone(),
        config.environment().to_string(),
        config.default_lookback_secs(),
    ));

    start_trigger_server(addr, state, shutdown_rx).await?;

    // Worker stops on the same signal once any in-flight run finishes
    if tokio::time::timeout(WORKER_DRAIN_TIMEOUT, worker_handle).await.is_err() {
        warn!(timeout_secs = %WORKER_DRAIN_TIMEOUT.as_secs(), "job_worker_drain_timeout");
    }
    metrics.report().log();
    Ok(())
}

async fn run_once(
    config: &Config,
    pipeline: Pipeline,
    mode: RunMode,
    since: Option<String>,
) -> anyhow::Result<()> {
    let since = match since {
        Some(raw) => parse_cursor(&raw).with_context(|| format!("Invalid --since value '{}'", raw))?,
        None => Utc::now() - chrono::Duration::seconds(config.default_lookback_secs() as i64),
    };

    let report = pipeline.run(mode, since).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Config first: it decides the log format
    let config_path = args.config.unwrap_or_else(|| Config::resolve_config_path(&[]));
    let config = Config::load_from_path(&config_path);
    init_tracing(config.log_json());

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        environment = %config.environment(),
        directory = %config.directory_base_url(),
        readings_file = %config.readings_file(),
        positions_file = %config.positions_file(),
        sessions_file = %config.sessions_file(),
        feed_enabled = %config.feed_enabled(),
        split_gap_secs = %config.split_gap_secs(),
        "config_loaded"
    );

    let metrics = Arc::new(Metrics::new());
    let pipeline = build_pipeline(&config, metrics.clone())?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, pipeline, metrics).await?,
        Command::Run { mode, since } => run_once(&config, pipeline, mode, since).await?,
    }

    info!("beacon-positioning shutdown complete");
    Ok(())
}
