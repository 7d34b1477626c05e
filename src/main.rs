//! Veil management server
//!
//! Provisions reality proxies on remote hosts over SSH and serves the
//! management API.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use veil_api::{ApiServer, ApiServerConfig};
use veil_registry::SqlRegistry;

/// Veil - provision and manage reality proxies
#[derive(Parser, Debug)]
#[command(name = "veil")]
#[command(about = "Provision and manage reality proxies on remote hosts")]
#[command(version)]
struct Cli {
    /// Address to bind the API server
    #[arg(short = 'l', long, default_value = "127.0.0.1:8000", env = "VEIL_LISTEN")]
    listen: SocketAddr,

    /// Database URL for the local registry
    #[arg(
        long,
        default_value = "sqlite://veil.db?mode=rwc",
        env = "VEIL_DATABASE_URL"
    )]
    database_url: String,

    /// Disable CORS headers
    #[arg(long)]
    no_cors: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let db = veil_registry::connect(&cli.database_url)
        .await
        .with_context(|| format!("failed to open registry database at {}", cli.database_url))?;
    veil_registry::migrate(&db)
        .await
        .context("failed to run registry migrations")?;
    info!(database = %cli.database_url, "registry ready");

    let server = ApiServer::new(
        ApiServerConfig {
            bind_addr: cli.listen,
            enable_cors: !cli.no_cors,
        },
        SqlRegistry::new(db),
    );

    server.serve().await.context("API server failed")
}
