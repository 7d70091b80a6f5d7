//! End-to-end scenarios driving real index/node servers bound to localhost
//! ports, exercising the client cache manager the way an application would.

use std::sync::Arc;
use std::time::Duration;

use strata_cache::client::CacheManager;
use strata_cache::config::{Config, StrategyKind};
use strata_cache::core::Interval;
use strata_cache::model::{CacheCube, QueryCube, RequestType, ResolutionInfo};
use strata_cache::node::{DeterministicOperatorGraph, NodeServer};
use strata_cache::index::IndexServer;

fn base_config(frontend: u16, node_port: u16, node_listen: u16) -> Config {
    let mut config = Config::default();
    config.indexserver.host = "127.0.0.1".to_string();
    config.indexserver.port_frontend = frontend;
    config.indexserver.port_node = node_port;
    config.nodeserver.port = node_listen;
    config.cache.enabled = true;
    config.cache.strategy = StrategyKind::Always;
    config
}

async fn spawn_cluster(config: Config) {
    let index = IndexServer::new(config.clone());
    tokio::spawn(index.run());

    let node = NodeServer::new(config, "127.0.0.1".to_string(), Arc::new(DeterministicOperatorGraph::default()));
    tokio::spawn(node.run());

    // Give the listeners time to bind and the node time to register before
    // a client request races the handshake.
    tokio::time::sleep(Duration::from_millis(300)).await;
}

fn raster_query(x: (f64, f64), y: (f64, f64)) -> CacheCube {
    CacheCube::new(
        QueryCube::new(
            Interval::new(x.0, x.1),
            Interval::new(y.0, y.1),
            Interval::new(0.0, 1.0),
            4326,
            0,
        ),
        ResolutionInfo::raster(1.0, 1.0),
    )
}

#[tokio::test]
async fn cold_miss_then_full_hit_round_trips_through_index_and_node() {
    let config = base_config(19301, 19302, 19303);
    spawn_cluster(config.clone()).await;

    let manager = CacheManager::new(config, Arc::new(DeterministicOperatorGraph::default()));
    let query = raster_query((0.0, 16.0), (0.0, 16.0));

    let first = manager
        .query(RequestType::Raster, "sem/cold-miss", query)
        .await
        .expect("cold miss should compute and return bytes");
    assert_eq!(first.len(), 16 * 16 * strata_cache::node::operator::RASTER_BPP);

    // Repeating the identical query should now resolve as a full hit served
    // from the node's cache rather than a second CREATE.
    let second = manager
        .query(RequestType::Raster, "sem/cold-miss", query)
        .await
        .expect("repeat query should hit the populated cache");
    assert_eq!(second, first);
}

#[tokio::test]
async fn disabled_cache_never_contacts_a_running_index() {
    // Index/node are never started for this config -- if the manager tried
    // to dial them the test would hang or fail with a connection error.
    let mut config = base_config(19311, 19312, 19313);
    config.cache.enabled = false;

    let manager = CacheManager::new(config, Arc::new(DeterministicOperatorGraph::default()));
    let query = raster_query((0.0, 8.0), (0.0, 8.0));

    let bytes = manager
        .query(RequestType::Raster, "sem/disabled", query)
        .await
        .expect("disabled cache path runs the operator graph directly");
    assert_eq!(bytes.len(), 8 * 8 * strata_cache::node::operator::RASTER_BPP);
}
