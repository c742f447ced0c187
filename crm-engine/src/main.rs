//! crm-engine - customer identity resolution and classification service
//!
//! Loads the bootstrap config, opens the database, starts the orchestrator
//! on the event bus and serves the HTTP API until Ctrl+C or SIGTERM.

use std::fs::OpenOptions;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use crm_common::config::{load_config, LoggingConfig};
use crm_common::db::init_database;
use crm_common::events::EventBus;
use crm_engine::{build_router, AppState, Orchestrator};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "crm-engine")]
#[command(about = "Customer identity resolution and classification engine")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides config)
    #[arg(short, long, env = "CRM_PORT")]
    port: Option<u16>,

    /// SQLite database file (overrides config)
    #[arg(short, long, env = "CRM_DATABASE")]
    database: Option<PathBuf>,

    /// TOML config file
    #[arg(short, long, env = "CRM_CONFIG")]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is unset (overrides config)
    #[arg(long, env = "CRM_LOG_LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(database) = args.database {
        config.database_path = database;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    init_tracing(&config.logging)?;

    info!(
        "Starting crm-engine v{} on port {}",
        env!("CARGO_PKG_VERSION"),
        config.port
    );
    info!("Database: {}", config.database_path.display());

    let db = init_database(&config.database_path)
        .await
        .context("Failed to initialize database")?;

    let settings = Arc::new(config.engine.clone());
    let event_bus = EventBus::new(settings.event_bus_capacity);
    let state = AppState::new(db, event_bus.clone(), settings);

    let orchestrator = Orchestrator::new(state.service.clone()).spawn(event_bus.subscribe());
    info!("Orchestrator subscribed to event bus");

    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    orchestrator.abort();
    info!("Server shutdown complete");
    Ok(())
}

/// `RUST_LOG` wins; otherwise the configured level applies to every target
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match &logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.init(),
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
