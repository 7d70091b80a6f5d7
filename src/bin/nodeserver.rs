//! Entry point for the node server binary: loads configuration, starts a
//! node's cache stores and delivery port, registers with the index, and
//! runs until interrupted.

use std::panic;
use std::sync::Arc;
use strata_cache::config::Config;
use strata_cache::node::{DeterministicOperatorGraph, NodeServer};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    panic::set_hook(Box::new(|panic_info| {
        eprintln!("strata-nodeserver fatal error: {panic_info}");
    }));

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    let host = std::env::var("STRATA_NODE_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

    tracing::info!(port = config.nodeserver.port, threads = config.nodeserver.threads, "starting strata-nodeserver");

    let server = NodeServer::new(config, host, Arc::new(DeterministicOperatorGraph::default()));

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
        }
    }

    Ok(())
}
