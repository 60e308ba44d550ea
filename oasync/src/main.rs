//! oasync daemon
//!
//! Hosts the scheduler: restores an interrupted run, arms the refresh timer
//! from the stored frequency and runs until Ctrl-C.

use anyhow::Result;
use clap::Parser;
use oasync::models::Frequency;
use oasync::services::{HttpTransport, StartOutcome, Transport};
use oasync::AppState;
use oasync_common::config::{load_default_toml_config, RootFolderInitializer, RootFolderResolver};
use oasync_common::events::EventBus;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "oasync", version, about = "Incremental OpenAsset catalog sync daemon")]
struct Cli {
    /// Root folder holding the database and media (overrides OASYNC_ROOT and config.toml)
    #[arg(long)]
    root_folder: Option<PathBuf>,

    /// Start a sync run immediately
    #[arg(long)]
    start: bool,

    /// Set the refresh frequency (none, 30m, 60m, 8h, 24h)
    #[arg(long)]
    frequency: Option<Frequency>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let toml_config = load_default_toml_config().unwrap_or_default();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&toml_config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_hash = env!("GIT_HASH"),
        built = env!("BUILD_TIMESTAMP"),
        profile = env!("BUILD_PROFILE"),
        "Starting oasync"
    );

    let root_folder = RootFolderResolver::new("oasync")
        .with_cli_arg(cli.root_folder)
        .resolve();
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .map_err(|e| anyhow::anyhow!("Failed to initialize root folder: {}", e))?;

    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());
    let db = oasync::db::init_database_pool(&db_path).await?;

    let credentials = oasync::config::resolve_credentials(&db, &toml_config).await?;
    info!(instance_url = %credentials.instance_url, "Remote catalog configured");

    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new()?);
    let event_bus = EventBus::new(100);
    let state = AppState::new(db, event_bus.clone(), transport, credentials, initializer.media_path());

    tokio::spawn(log_events(event_bus));

    let scheduler = state.control.scheduler().clone();
    scheduler.restore().await?;

    if let Some(frequency) = cli.frequency {
        state.control.set_frequency(frequency).await?;
    }

    if cli.start {
        match state.control.start().await {
            Ok(StartOutcome::Started) => info!("Sync run started"),
            Ok(StartOutcome::AlreadyRunning) => info!("Sync run already in progress"),
            Err(e) => warn!(error = %e, "Could not start sync run"),
        }
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    scheduler.shutdown().await;
    state.db.close().await;

    Ok(())
}

/// Mirror engine progress events into the log
async fn log_events(event_bus: EventBus) {
    let mut rx = event_bus.subscribe();
    loop {
        match rx.recv().await {
            Ok(event) => debug!(event = event.event_type(), ?event, "Sync event"),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event log lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}
