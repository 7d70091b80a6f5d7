//! Index-side shadow catalog: what every node holds, and the node
//! registry backing it (C7 state).

use crate::cache::index::CacheEntryIndex;
use crate::model::{
    CacheCube, CacheRef, CacheType, Capacity, ForeignRef, Node, NodeCacheKey, NodeCacheRef,
    STQueryResult,
};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};

/// One [`CacheEntryIndex`] per [`CacheType`], plus the node registry and
/// per-node capacity reports the reorganization planner reads.
pub struct Catalog {
    raster: CacheEntryIndex,
    points: CacheEntryIndex,
    lines: CacheEntryIndex,
    polygons: CacheEntryIndex,
    plots: CacheEntryIndex,
    nodes: DashMap<u32, Node>,
    capacities: DashMap<u32, Capacity>,
    next_node_id: AtomicU32,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            raster: CacheEntryIndex::new(),
            points: CacheEntryIndex::new(),
            lines: CacheEntryIndex::new(),
            polygons: CacheEntryIndex::new(),
            plots: CacheEntryIndex::new(),
            nodes: DashMap::new(),
            capacities: DashMap::new(),
            next_node_id: AtomicU32::new(1),
        }
    }

    pub fn index_for(&self, t: CacheType) -> &CacheEntryIndex {
        match t {
            CacheType::Raster => &self.raster,
            CacheType::Point => &self.points,
            CacheType::Line => &self.lines,
            CacheType::Polygon => &self.polygons,
            CacheType::Plot => &self.plots,
        }
    }

    /// Register a newly-connected control connection, assigning it a fresh
    /// node id.
    pub fn register_node(&self, host: String, port: u16) -> u32 {
        let id = self.next_node_id.fetch_add(1, Ordering::Relaxed);
        self.nodes.insert(id, Node::new(id, host, port));
        id
    }

    pub fn node(&self, node_id: u32) -> Option<Node> {
        self.nodes.get(&node_id).map(|n| n.clone())
    }

    pub fn nodes(&self) -> Vec<Node> {
        self.nodes.iter().map(|e| e.value().clone()).collect()
    }

    pub fn set_capacity(&self, node_id: u32, capacity: Capacity) {
        self.capacities.insert(node_id, capacity);
    }

    pub fn capacity(&self, node_id: u32) -> Option<Capacity> {
        self.capacities.get(&node_id).map(|c| *c)
    }

    pub fn all_capacities(&self) -> Vec<(u32, Capacity)> {
        self.capacities.iter().map(|e| (*e.key(), *e.value())).collect()
    }

    /// Seed the catalog from a node's `HELLO` handshake.
    pub fn seed_from_handshake(&self, node_id: u32, capacity: Capacity, entries: Vec<NodeCacheRef>) {
        self.set_capacity(node_id, capacity);
        for entry in entries {
            let cache_type = entry.cache_type;
            self.index_for(cache_type).put(entry.into_catalog_entry(node_id));
        }
    }

    /// Record a single newly-created entry, as reported by a `NEW_ENTRY`
    /// worker event.
    pub fn add_entry(&self, node_id: u32, entry: NodeCacheRef) {
        let cache_type = entry.cache_type;
        self.index_for(cache_type).put(entry.into_catalog_entry(node_id));
    }

    /// Drop a node's registration and every shadow entry it owns; called
    /// when its control connection fails.
    pub fn remove_node(&self, node_id: u32) {
        self.nodes.remove(&node_id);
        self.capacities.remove(&node_id);
        for t in CacheType::ALL {
            self.index_for(t).remove_all_by_node(node_id);
        }
    }

    pub fn query(&self, cache_type: CacheType, semantic_id: &str, query: &CacheCube) -> STQueryResult {
        self.index_for(cache_type).query(semantic_id, query)
    }

    /// Resolve an entry id returned by [`Catalog::query`] into a
    /// foreign-pointer [`CacheRef`], looking up which node holds it.
    pub fn resolve_ref(
        &self,
        cache_type: CacheType,
        semantic_id: &str,
        entry_id: u64,
    ) -> Option<CacheRef> {
        let key = NodeCacheKey::new(semantic_id.to_string(), entry_id);
        let entry = self.index_for(cache_type).get(&key)?;
        let node = self.node(entry.node_id)?;
        Some(CacheRef {
            foreign: ForeignRef {
                host: node.host,
                port: node.port,
            },
            entry_id,
        })
    }

    /// Node id that owns a resolved entry, needed by the scheduler's
    /// locality constraint for deliver/puzzle jobs.
    pub fn owning_node(&self, cache_type: CacheType, semantic_id: &str, entry_id: u64) -> Option<u32> {
        let key = NodeCacheKey::new(semantic_id.to_string(), entry_id);
        self.index_for(cache_type).get(&key).map(|e| e.node_id)
    }

    /// Update the shadow entry's owning node once a reorganization move has
    /// been acknowledged by the source node.
    pub fn reassign(&self, cache_type: CacheType, key: &NodeCacheKey, new_node_id: u32) {
        self.index_for(cache_type).reassign(key, new_node_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Interval;
    use crate::model::{ProfilingData, QueryCube, ResolutionInfo};

    fn profile() -> ProfilingData {
        ProfilingData {
            own_cpu: 0.0,
            own_gpu: 0.0,
            own_io: 0.0,
            subtree_cpu: 0.0,
            subtree_gpu: 0.0,
            subtree_io: 0.0,
            uncached_cpu: 0.0,
            uncached_gpu: 0.0,
            uncached_io: 0.0,
        }
    }

    #[test]
    fn register_and_remove_node_clears_its_shadow_entries() {
        let catalog = Catalog::new();
        let node_id = catalog.register_node("host-a".to_string(), 9000);

        let bounds = CacheCube::new(
            QueryCube::new(
                Interval::new(0.0, 10.0),
                Interval::new(0.0, 10.0),
                Interval::new(0.0, 1.0),
                4326,
                0,
            ),
            ResolutionInfo::unconstrained(),
        );
        catalog.add_entry(
            node_id,
            NodeCacheRef {
                semantic_id: "sem".to_string(),
                entry_id: 1,
                cache_type: CacheType::Raster,
                bounds,
                size: 10,
                profile: profile(),
                last_access: 0,
                access_count: 0,
            },
        );

        assert!(catalog
            .query(CacheType::Raster, "sem", &bounds)
            .is_full_hit());

        catalog.remove_node(node_id);
        assert!(catalog
            .query(CacheType::Raster, "sem", &bounds)
            .is_full_miss());
        assert!(catalog.node(node_id).is_none());
    }

    #[test]
    fn resolve_ref_points_at_the_owning_node() {
        let catalog = Catalog::new();
        let node_id = catalog.register_node("host-a".to_string(), 9000);
        let bounds = CacheCube::new(
            QueryCube::new(
                Interval::new(0.0, 10.0),
                Interval::new(0.0, 10.0),
                Interval::new(0.0, 1.0),
                4326,
                0,
            ),
            ResolutionInfo::unconstrained(),
        );
        catalog.add_entry(
            node_id,
            NodeCacheRef {
                semantic_id: "sem".to_string(),
                entry_id: 7,
                cache_type: CacheType::Raster,
                bounds,
                size: 10,
                profile: profile(),
                last_access: 0,
                access_count: 0,
            },
        );

        let cache_ref = catalog.resolve_ref(CacheType::Raster, "sem", 7).unwrap();
        assert_eq!(cache_ref.foreign.host, "host-a");
        assert_eq!(cache_ref.entry_id, 7);
    }
}
