//! Docflow Daemon - background workflow service
//!
//! The daemon provides:
//! - definition loading and registration at startup
//! - calendar-driven scheduled starts
//! - periodic attention sweeps (overdue escalation and reminders)

use anyhow::Context;
use clap::Parser;
use docflow_daemon::{load_definitions, register_definitions, DaemonConfig, Scheduler};
use docflow_engine::{InMemoryStore, WorkflowEngine};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Docflow Daemon CLI
#[derive(Parser)]
#[command(name = "docflowd")]
#[command(about = "Docflow Daemon - document workflow scheduling and escalation", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "DOCFLOW_CONFIG")]
    config: Option<String>,

    /// Directory of JSON workflow definitions
    #[arg(short, long, env = "DOCFLOW_DEFINITIONS")]
    definitions: Option<PathBuf>,

    /// Log level
    #[arg(long, env = "DOCFLOW_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "DOCFLOW_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config =
        DaemonConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    // Override with CLI args
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.json {
        config.logging.json = true;
    }
    if let Some(path) = cli.definitions {
        config.definitions.path = Some(path.display().to_string());
    }

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let calendar = config
        .calendar()
        .map_err(anyhow::Error::msg)
        .context("Invalid calendar configuration")?;
    let engine = Arc::new(WorkflowEngine::new(
        Arc::new(InMemoryStore::new()),
        Arc::new(config.directory.build()),
        Arc::new(calendar),
    ));

    if let Some(path) = &config.definitions.path {
        let definitions = load_definitions(std::path::Path::new(path))?;
        let ids = register_definitions(&engine, definitions).await?;
        tracing::info!(path = %path, definitions = ids.len(), "Workflow definitions registered");
    } else {
        tracing::warn!("No definitions directory configured");
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        calendars = config.calendars.len(),
        schedules = config.schedules.len(),
        "docflowd starting"
    );

    let scheduler = Arc::new(Scheduler::new(
        config.scheduler.clone(),
        engine,
        config.schedules.clone(),
    ));
    scheduler.run(shutdown_signal()).await;

    tracing::info!("docflowd shutting down");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
