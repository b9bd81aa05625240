//! HubVault Node entry point.
//!
//! Starts the node with configuration from a TOML file or defaults. Vault
//! events are read as JSON lines from stdin and payouts are written as JSON
//! lines to stdout. Logs go to stderr.

// Accessors used by tests.
#![allow(dead_code)]

mod config;
mod node;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use config::{HubConfig, LoggingConfig};
use node::HubNode;

/// HubVault Node
#[derive(Parser, Debug)]
#[command(name = "hubvault-node", version, about = "HubVault deposit node")]
struct Args {
    /// Path to the configuration file (TOML).
    #[arg(short, long, default_value = "hubvault.toml")]
    config: PathBuf,

    /// Override the coordinator WebSocket URL.
    #[arg(long)]
    url: Option<String>,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Keep sessions in-process instead of connecting to a coordinator.
    #[arg(long)]
    offline: bool,

    /// Generate a default config file and exit.
    #[arg(long)]
    init: bool,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Handle --init flag
    if args.init {
        let config = HubConfig::default();
        config.save(&args.config)?;
        println!("wrote default config to {}", args.config.display());
        return Ok(());
    }

    // Load configuration
    let mut config = HubConfig::load(&args.config)?;

    // Apply CLI overrides
    if let Some(url) = args.url {
        config.client.url = url;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    init_tracing(&config.logging);
    tracing::info!("HubVault Node v{}", env!("CARGO_PKG_VERSION"));

    // Create and start the node
    let mut node = HubNode::new(config)?;
    node.start(args.offline).await?;
    node.spawn_stdin_intake()?;
    node.spawn_stdout_payouts()?;

    // Set up graceful shutdown on SIGINT
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        tracing::info!("received shutdown signal");
    };

    let result = tokio::select! {
        result = node.run() => result,
        _ = shutdown => {
            tracing::info!("initiating graceful shutdown");
            Ok(())
        }
    };

    node.shutdown().await?;
    if let Err(ref e) = result {
        tracing::error!(error = %e, "node stopped");
    } else {
        tracing::info!("HubVault node exited cleanly");
    }
    result
}
