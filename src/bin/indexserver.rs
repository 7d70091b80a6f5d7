//! Entry point for the index server binary: loads configuration, starts
//! the index's two listening ports, and runs until interrupted.

use std::panic;
use strata_cache::config::Config;
use strata_cache::index::server::IndexServer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    panic::set_hook(Box::new(|panic_info| {
        eprintln!("strata-indexserver fatal error: {panic_info}");
    }));

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    tracing::info!(
        frontend = config.indexserver.port_frontend,
        node_port = config.indexserver.port_node,
        "starting strata-indexserver"
    );

    let server = IndexServer::new(config);

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
        }
    }

    Ok(())
}
