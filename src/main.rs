use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vulnmirror::config::Config;
use vulnmirror::store::{SqliteStore, Store};
use vulnmirror::sync::{FeedClient, Orchestrator, Scheduler};

#[derive(Parser)]
#[command(name = "vulnmirror")]
#[command(about = "Local mirror of a remote vulnerability authority", version)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "VULNMIRROR_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one delta sync and exit
    Sync {
        /// Override the start of the sync range (RFC 3339)
        #[arg(long)]
        since: Option<String>,

        /// Override the end of the sync range (RFC 3339)
        #[arg(long)]
        until: Option<String>,
    },

    /// Sync continuously on the configured interval
    Watch,

    /// Move the resume cursor to an explicit point in time
    ResetCursor {
        /// New cursor position (RFC 3339)
        #[arg(long)]
        to: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading configuration from {}", path))?,
        None => Config::from_env().context("loading configuration from environment")?,
    };

    init_logging(&config);

    info!(
        source = %config.source.name,
        base_url = %config.source.base_url,
        api_key = config.source.api_key.is_some(),
        requests_per_window = config.source.resolved_max_requests(),
        "starting vulnmirror"
    );
    if config.source.api_key.is_none() {
        warn!("no API key configured, using the anonymous rate limit");
    }

    let store = Arc::new(
        SqliteStore::open(&config.database.path)
            .await
            .with_context(|| format!("opening database at {}", config.database.path))?,
    );

    match cli.command {
        Command::Sync { since, until } => {
            let since = since.as_deref().map(parse_rfc3339).transpose()?;
            let until = until.as_deref().map(parse_rfc3339).transpose()?;

            let fetcher = Arc::new(FeedClient::new(&config.source)?);
            let orchestrator = Orchestrator::new(store, fetcher, &config.source);

            let report = orchestrator.sync(since, until).await?;
            if let Some(failure) = &report.failure {
                anyhow::bail!(
                    "sync stopped after {}/{} windows: {}",
                    report.windows_committed,
                    report.windows_planned,
                    failure
                );
            }
            info!(
                windows = report.windows_committed,
                records = report.records_ingested,
                pages = report.pages_fetched,
                "sync complete"
            );
        }

        Command::Watch => {
            let fetcher = Arc::new(FeedClient::new(&config.source)?);
            let orchestrator = Arc::new(Orchestrator::new(store, fetcher, &config.source));
            let scheduler = Scheduler::new(config.scheduler.clone(), orchestrator);

            let shutdown = scheduler.shutdown_handle();
            tokio::spawn(async move {
                shutdown_signal().await;
                info!("shutdown signal received");
                let _ = shutdown.send(());
            });

            scheduler.run().await;
        }

        Command::ResetCursor { to } => {
            let to = parse_rfc3339(&to)?;
            store.set_cursor(&config.source.name, to).await?;
            info!(source = %config.source.name, cursor = %to.to_rfc3339(), "cursor reset");
        }
    }

    Ok(())
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn parse_rfc3339(s: &str) -> anyhow::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("invalid RFC 3339 timestamp: {}", s))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
