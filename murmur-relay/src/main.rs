//! murmur-relay binary entry point.
//!
//! Usage:
//! ```bash
//! murmur-relay --config relay.toml
//! murmur-relay --help
//! ```

use anyhow::Context;
use clap::Parser;
use murmur_relay::{Config, RelayServer, SqliteStorage};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "murmur-relay", version, about = "End-to-end encrypted message relay")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "relay.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::from_file(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    tracing::info!("murmur-relay v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Database: {}", config.storage.database.display());

    let storage = SqliteStorage::new(&config.storage.database)
        .await
        .context("Failed to open database")?;
    let relay = Arc::new(RelayServer::new(config, storage));

    relay
        .serve(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("Shutdown signal received"),
                Err(e) => {
                    tracing::warn!("Cannot listen for Ctrl-C: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        })
        .await
        .context("Relay server failed")?;

    tracing::info!("murmur-relay stopped");
    Ok(())
}
