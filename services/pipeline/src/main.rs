//! Wildfire risk pipeline service.
//!
//! Fetches monthly reanalysis variables for the configured region, aligns
//! them onto the canonical grid, scores composite fire risk and publishes
//! the grid atomically. Runs once or on an interval, with an HTTP status
//! API for monitoring and manual triggers.

mod config;
mod run;
mod server;

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::sync::broadcast;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use archive_client::HttpArchiveClient;
use config::PipelineConfig;
use run::Pipeline;
use server::ServerState;

#[derive(Parser, Debug)]
#[command(name = "pipeline")]
#[command(about = "Wildfire risk pipeline: fetch, align, score, publish")]
struct Args {
    /// Run once and exit (vs scheduled runs with a status server)
    #[arg(long)]
    once: bool,

    /// Pipeline configuration file
    #[arg(long, env = "PIPELINE_CONFIG", default_value = "config/pipeline.yaml")]
    config: PathBuf,

    /// Seconds between scheduled runs
    #[arg(long, env = "RUN_INTERVAL_SECS", default_value = "86400")]
    interval_secs: u64,

    /// Port for the status HTTP server
    #[arg(long, env = "STATUS_PORT", default_value = "8080")]
    status_port: u16,

    /// Disable the status HTTP server
    #[arg(long)]
    no_status_server: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .json()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!(config = %args.config.display(), "Starting wildfire risk pipeline");

    let config = PipelineConfig::load(&args.config)?;
    let api = HttpArchiveClient::new(
        config.archive.base_url.clone(),
        config.archive.api_key()?,
        config.archive.request_timeout(),
    )?;
    let pipeline = Arc::new(Pipeline::new(config, api).await?);
    let state = Arc::new(ServerState::new(pipeline));

    if args.once {
        info!("Running single pipeline cycle");
        let report = state.pipeline.run_once().await?;
        info!(
            outcome = ?report.outcome,
            provenance = %report.provenance,
            high_risk_cells = report.high_risk_cells,
            indeterminate = report.indeterminate_cells,
            duration_ms = report.duration_ms,
            "Pipeline run complete"
        );
        return Ok(());
    }

    let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);

    if !args.no_status_server {
        let server_state = state.clone();
        let port = args.status_port;
        tokio::spawn(async move {
            if let Err(e) = server::run_server(server_state, port).await {
                tracing::error!(error = %e, "Status server failed");
            }
        });
    }

    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        shutdown_tx_clone.send(()).ok();
    });

    info!(interval_secs = args.interval_secs, "Starting scheduled runs");
    let interval = Duration::from_secs(args.interval_secs);
    loop {
        if state
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            server::execute_run(&state).await;
            state.running.store(false, Ordering::SeqCst);
        } else {
            warn!("Previous run still in progress, skipping scheduled run");
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown_rx.recv() => {
                info!("Shutting down");
                break;
            }
        }
    }

    Ok(())
}
