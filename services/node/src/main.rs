//! P2P exchange node entry point
//!
//! Usage: `p2p-exchange-node [--config config.yaml]`
//!
//! Exit codes: 0 on clean shutdown; non-zero when startup fails (missing or
//! malformed reward wallet, unreadable peerkey, store open failure, listener
//! bind failure).

mod config;
mod node;

use crate::config::Config;
use crate::node::Node;
use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    if let Err(e) = run().await {
        error!(error = ?e, "fatal");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config_path = config_path_from_args();
    let config = Config::load(config_path.as_deref()).context("configuration")?;
    config.validate().context("configuration")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let node = Node::start(config, shutdown_rx).await?;
    info!(peer_id = %node.peer_id, "node running");

    wait_for_signal().await;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    node.join().await;
    Ok(())
}

fn config_path_from_args() -> Option<String> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" || arg == "-config" {
            return args.next();
        }
    }
    None
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
