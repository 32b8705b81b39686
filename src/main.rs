//! dnsgate - Entry point.
//!
//! Installs the DNS redirect rules, loads the blocklist and filters queued
//! DNS packets until Ctrl-C. The rules are removed on the way out.

use std::borrow::Cow;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use dnsgate::DnsFilter;
use dnsgate::config::Config;

async fn run() -> Result<()> {
    let config_path = std::env::var("CONFIG_PATH")
        .map(Cow::Owned)
        .unwrap_or(Cow::Borrowed("config.toml"));
    let config = Config::load(config_path.as_ref()).context("Failed to load configuration")?;

    // Initialize metrics (must be done early, before any metrics are recorded)
    dnsgate::metrics::init(&config.metrics).context("Failed to initialize metrics")?;

    info!(
        blocklist = %config.blocklist_url,
        policy = ?config.policy,
        queue = config.queue.number,
        table = %config.firewall.table,
        "starting dnsgate"
    );

    let filter = DnsFilter::from_config(config).context("Failed to create filter")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl-C received, shutting down..."),
            Err(err) => error!("Failed to listen for Ctrl-C: {err}"),
        }
        let _ = shutdown_tx.send(true);
    });

    filter
        .run(shutdown_rx)
        .await
        .context("DNS filter failed")?;

    info!("Shutdown complete.");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    run().await
}
