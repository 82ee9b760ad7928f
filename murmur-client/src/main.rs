//! murmur-proxy binary entry point.
//!
//! Usage:
//! ```bash
//! murmur-proxy serve --config proxy.toml
//! murmur-proxy keygen
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use murmur_client::config::Config;
use murmur_client::http::{build_router, ProxyState};
use murmur_client::KeyPair;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "murmur-proxy", version, about = "Local encrypting proxy for Murmur")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the local proxy
    Serve {
        /// Path to the TOML configuration file
        #[arg(short, long, default_value = "proxy.toml")]
        config: PathBuf,
    },
    /// Print a fresh key pair as base64
    Keygen,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config } => serve(config).await,
        Commands::Keygen => keygen(),
    }
}

async fn serve(path: PathBuf) -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let config = if path.exists() {
        Config::from_file(&path).with_context(|| format!("Failed to load {}", path.display()))?
    } else {
        tracing::info!("{} not found, using defaults", path.display());
        Config::default()
    };

    let state = Arc::new(ProxyState::new(config.proxy.clone()).context("Failed to build HTTP client")?);
    let listener = tokio::net::TcpListener::bind(&config.proxy.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.proxy.bind_address))?;

    tracing::info!("murmur-proxy v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Listening on {}, relay {}",
        listener.local_addr()?,
        config.proxy.server_url
    );

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("Shutdown signal received"),
                Err(e) => {
                    tracing::warn!("Cannot listen for Ctrl-C: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        })
        .await
        .context("Proxy server failed")?;

    Ok(())
}

fn keygen() -> anyhow::Result<()> {
    let pair = KeyPair::generate().context("Failed to generate key pair")?;
    println!("public_key:  {}", pair.public.to_base64());
    println!("private_key: {}", pair.private.to_base64().as_str());
    Ok(())
}
