// ------------------------------------------------------------
// Module declarations
// ------------------------------------------------------------
//
// Each module represents a well-defined responsibility:
//
// - config:     Configuration loaded from JSON and validated
// - error:      Startup and remote call error types
// - util:       Shared helper utilities (lists, time, crypto setup)
// - github:     API root resolution, credentials, REST client
// - cache:      Readiness-gated workflow cache
// - metrics:    Gauge publication and exporter self-metrics
// - families:   One fetcher per metric family, plus the registry
// - collector:  Startup orchestration and fetch loops
// - server:     Prometheus scrape surface
//
mod cache;
mod collector;
mod config;
mod error;
mod families;
mod github;
mod metrics;
mod server;
mod util;

// ------------------------------------------------------------
// External dependencies
// ------------------------------------------------------------

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use log::{error, info, warn};
use prometheus::Registry;

#[derive(Parser)]
#[command(name = "github-actions-exporter", version, about = "GitHub Actions metrics exporter")]
struct Cli {
    /// Path of the JSON configuration file.
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// Listen address, overrides `server.listen`.
    #[arg(long)]
    listen: Option<SocketAddr>,
}

// ------------------------------------------------------------
// Application entry point
// ------------------------------------------------------------
//
// Responsibilities:
// - Initialize cryptography backend (rustls) and logging
// - Load configuration
// - Run the collector startup sequence
// - Serve the registry until ctrl-c, then shut everything down
//
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --------------------------------------------------------
    // IMPORTANT:
    // rustls >= 0.23 requires an explicit CryptoProvider
    // installation, before the first HTTP client is built.
    // --------------------------------------------------------
    util::install_crypto_provider();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // --------------------------------------------------------
    // Load configuration from disk
    //
    // NOTE:
    // - The file may contain a token; GITHUB_TOKEN overrides it.
    // - It must not be committed to version control.
    // --------------------------------------------------------
    let mut config = config::load_config(&cli.config)?;
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }

    // --------------------------------------------------------
    // Startup: client, cache, registration, fetchers
    //
    // Any error here is fatal and happens before the scrape
    // surface is bound.
    // --------------------------------------------------------
    let registry = Arc::new(Registry::new());
    let collectors = collector::start(&config, &registry)
        .await
        .context("startup failed")?;
    if collectors.launched().is_empty() {
        warn!("no metric family is running, only exporter self-metrics are served");
    }

    // --------------------------------------------------------
    // Serve until ctrl-c
    // --------------------------------------------------------
    let served = server::serve(registry, &config.server, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("cannot listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
        info!("shutdown requested");
    })
    .await;

    collectors.shutdown().await;
    served?;

    Ok(())
}
