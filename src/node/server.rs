//! Ties a node's cache stores to the outside world: registers with the
//! index over a control connection, keeps a configured number of worker
//! connections open, and serves this node's own delivery port (§4.6).

use crate::cache::strategy;
use crate::config::Config;
use crate::error::{NetworkError, Result};
use crate::node::connection;
use crate::node::operator::OperatorGraph;
use crate::node::state::NodeState;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub struct NodeServer {
    config: Config,
    state: Arc<NodeState>,
}

impl NodeServer {
    pub fn new(config: Config, host: String, operator: Arc<dyn OperatorGraph>) -> Self {
        let strategy = strategy::from_config(&config.cache);
        let state = Arc::new(NodeState::new(host, config.nodeserver.port, &config.cache, strategy, operator));
        Self { config, state }
    }

    pub fn state(&self) -> Arc<NodeState> {
        self.state.clone()
    }

    /// Runs forever: a control connection that re-registers (and so
    /// acquires a fresh node id) whenever it drops, the worker connections
    /// that id backs, and the delivery listener, all concurrently.
    pub async fn run(self) -> Result<()> {
        let index_addr = (self.config.indexserver.host.clone(), self.config.indexserver.port_node);

        let listener = TcpListener::bind(("0.0.0.0", self.config.nodeserver.port))
            .await
            .map_err(NetworkError::Io)?;
        let delivery_state = self.state.clone();
        tokio::spawn(connection::run_delivery_listener(listener, delivery_state));

        loop {
            match connection::dial_control(&index_addr, &self.state).await {
                Ok((socket, node_id)) => {
                    info!(node_id, "registered with index");
                    let worker_tasks: Vec<_> = (0..self.config.nodeserver.threads.max(1))
                        .map(|_| {
                            let state = self.state.clone();
                            let index_addr = index_addr.clone();
                            tokio::spawn(async move {
                                if let Err(e) = connection::run_worker_connection(&index_addr, node_id, &state).await {
                                    warn!(error = %e, node_id, "worker connection ended");
                                }
                            })
                        })
                        .collect();

                    if let Err(e) = connection::run_control_session(socket, node_id, &self.state).await {
                        warn!(error = %e, node_id, "control connection lost");
                    }
                    for task in worker_tasks {
                        task.abort();
                    }
                }
                Err(e) => warn!(error = %e, "failed to register with index"),
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    }
}
