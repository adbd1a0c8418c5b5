//! Lock-and-Mint Bridge Service
//!
//! Runs the lock watcher and the mint coordinator until Ctrl+C, then stops them
//! in order and logs the final statistics.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin lock-mint-bridge -- --config config/bridge.toml
//! ```
//!
//! Or set the config path via environment variable:
//!
//! ```bash
//! BRIDGE_CONFIG_PATH=config/bridge.toml cargo run --bin lock-mint-bridge
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use lock_mint_bridge::{BridgeSupervisor, Config, EvmClient, SorobanClient};
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "lock-mint-bridge")]
#[command(about = "Lock-and-mint bridge - watches source-chain locks and mints on the destination chain")]
struct Args {
    /// Path to bridge configuration file (default: config/bridge.toml or BRIDGE_CONFIG_PATH env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments first (before initializing logging)
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting Lock-and-Mint Bridge");

    // Priority: CLI arg > env var > default
    let config = match args.config {
        Some(path) => {
            info!("Loading configuration from: {}", path);
            Config::load_from_path(&path)?
        }
        None => Config::load()?,
    };

    info!("Configuration loaded successfully");
    info!(
        "Source chain: {} (chain ID: {}), contract {}",
        config.source_chain.name, config.source_chain.chain_id, config.source_chain.contract_addr
    );
    info!(
        "Destination chain: {}, contract {}, signer {}",
        config.destination_chain.name,
        config.destination_chain.contract_id,
        config.destination_chain.source_account
    );

    let reader = EvmClient::new(&config.source_chain).context("Failed to create EVM client")?;
    let client =
        SorobanClient::new(&config.destination_chain).context("Failed to create Soroban client")?;

    let mut supervisor = BridgeSupervisor::new(config, Arc::new(reader), Arc::new(client));
    supervisor.start().await?;

    signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Received shutdown signal, stopping bridge...");

    supervisor.stop().await;
    let status = supervisor.status().await;
    info!(
        "Final statistics: {}",
        serde_json::to_string(&status).unwrap_or_else(|_| format!("{:?}", status))
    );

    info!("Bridge service stopped");
    Ok(())
}
