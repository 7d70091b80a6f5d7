//! A node's own cache stores, caching policy and operator graph (C6): the
//! state a worker connection, a delivery connection and the control
//! heartbeat all share.

use crate::cache::store::NodeCacheStore;
use crate::cache::strategy::CachingStrategy;
use crate::config::CacheConfig;
use crate::model::{CacheStats, CacheType, Capacity, ForeignRef, NodeCacheRef, NodeStats};
use crate::node::operator::OperatorGraph;
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Everything a node server needs once it is up: five per-type cache
/// stores, the configured admission policy, the operator graph it runs
/// queries through, and the short-lived delivery registry client/puzzle
/// transfers pull from.
pub struct NodeState {
    host: String,
    port: u16,
    raster: NodeCacheStore,
    points: NodeCacheStore,
    lines: NodeCacheStore,
    polygons: NodeCacheStore,
    plots: NodeCacheStore,
    pub strategy: Box<dyn CachingStrategy>,
    pub operator: Arc<dyn OperatorGraph>,
    deliveries: DashMap<Uuid, Arc<Vec<u8>>>,
}

impl NodeState {
    pub fn new(
        host: String,
        port: u16,
        cache: &CacheConfig,
        strategy: Box<dyn CachingStrategy>,
        operator: Arc<dyn OperatorGraph>,
    ) -> Self {
        Self {
            host,
            port,
            raster: NodeCacheStore::new(CacheType::Raster, cache.size_for(CacheType::Raster)),
            points: NodeCacheStore::new(CacheType::Point, cache.size_for(CacheType::Point)),
            lines: NodeCacheStore::new(CacheType::Line, cache.size_for(CacheType::Line)),
            polygons: NodeCacheStore::new(CacheType::Polygon, cache.size_for(CacheType::Polygon)),
            plots: NodeCacheStore::new(CacheType::Plot, cache.size_for(CacheType::Plot)),
            strategy,
            operator,
            deliveries: DashMap::new(),
        }
    }

    pub fn store_for(&self, t: CacheType) -> &NodeCacheStore {
        match t {
            CacheType::Raster => &self.raster,
            CacheType::Point => &self.points,
            CacheType::Line => &self.lines,
            CacheType::Polygon => &self.polygons,
            CacheType::Plot => &self.plots,
        }
    }

    /// This node's own address, stamped into every `DeliveryResponse` it
    /// hands out.
    pub fn self_ref(&self) -> ForeignRef {
        ForeignRef {
            host: self.host.clone(),
            port: self.port,
        }
    }

    pub fn capacity_report(&self) -> Capacity {
        let mut capacity = Capacity::default();
        for t in CacheType::ALL {
            capacity.set_used_for(t, self.store_for(t).used());
        }
        capacity.raster_total = self.raster.capacity();
        capacity.points_total = self.points.capacity();
        capacity.lines_total = self.lines.capacity();
        capacity.polygons_total = self.polygons.capacity();
        capacity.plots_total = self.plots.capacity();
        capacity
    }

    /// Every entry this node currently holds, wire-shaped for a `HELLO`
    /// handshake.
    pub fn handshake_entries(&self) -> Vec<NodeCacheRef> {
        let mut entries = Vec::new();
        for t in CacheType::ALL {
            for (semantic_id, meta) in self.store_for(t).snapshot() {
                entries.push(NodeCacheRef {
                    semantic_id,
                    entry_id: meta.entry_id,
                    cache_type: t,
                    bounds: meta.bounds,
                    size: meta.size,
                    profile: meta.profile,
                    last_access: meta.last_access,
                    access_count: meta.access_count,
                });
            }
        }
        entries
    }

    /// Body of a periodic `GET_STATS` push: capacity plus per-type access
    /// counters grouped by semantic id.
    pub fn stats_report(&self) -> NodeStats {
        let stats = CacheType::ALL
            .into_iter()
            .map(|t| {
                let mut entries: std::collections::HashMap<String, Vec<crate::model::NodeEntryStats>> =
                    std::collections::HashMap::new();
                for (semantic_id, meta) in self.store_for(t).snapshot() {
                    entries.entry(semantic_id).or_default().push(crate::model::NodeEntryStats {
                        entry_id: meta.entry_id,
                        last_access: meta.last_access,
                        access_count: meta.access_count,
                    });
                }
                CacheStats { cache_type: t, entries }
            })
            .collect();
        NodeStats {
            capacity: self.capacity_report(),
            stats,
        }
    }

    /// Mint a one-shot delivery id for `payload`, handed out in a `DONE`
    /// reply so a client or peer worker can stream it back over a delivery
    /// connection.
    pub fn register_delivery(&self, payload: Arc<Vec<u8>>) -> Uuid {
        let id = Uuid::new_v4();
        self.deliveries.insert(id, payload);
        id
    }

    /// Consume a delivery id, returning its payload exactly once.
    pub fn take_delivery(&self, id: &Uuid) -> Option<Arc<Vec<u8>>> {
        self.deliveries.remove(id).map(|(_, payload)| payload)
    }
}
