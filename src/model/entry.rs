//! Cache entry records, keys and the profiling data the caching strategy
//! scores.

use crate::model::query::CacheCube;
use serde::{Deserialize, Serialize};

/// Result kind a cache entry or request concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheType {
    Raster,
    Point,
    Line,
    Polygon,
    Plot,
}

impl CacheType {
    pub const ALL: [CacheType; 5] = [
        CacheType::Raster,
        CacheType::Point,
        CacheType::Line,
        CacheType::Polygon,
        CacheType::Plot,
    ];
}

/// Seconds-per-byte a cache read is assumed to cost; the denominator of the
/// CPU/GPU term in [`ProfilingData::cost`].
pub const CACHE_READ_COST_PER_BYTE: f64 = 5e-9;

/// Which subtree of an operator graph a cost figure is quoted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostScope {
    /// This operator alone.
    Own,
    /// This operator and everything below it.
    Subtree,
    /// Subtree cost minus contributions already served from cache.
    Uncached,
}

/// Computational cost profile recorded when a result was produced: CPU, GPU
/// and IO time, each quoted for three scopes (own/subtree/uncached).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfilingData {
    pub own_cpu: f64,
    pub own_gpu: f64,
    pub own_io: f64,
    pub subtree_cpu: f64,
    pub subtree_gpu: f64,
    pub subtree_io: f64,
    pub uncached_cpu: f64,
    pub uncached_gpu: f64,
    pub uncached_io: f64,
}

impl ProfilingData {
    /// `io / bytes + (cpu + gpu) / (k * bytes)` for the given scope, the
    /// cost a caching strategy weighs against its admission threshold.
    pub fn cost(&self, scope: CostScope, bytes: u64) -> f64 {
        let (cpu, gpu, io) = match scope {
            CostScope::Own => (self.own_cpu, self.own_gpu, self.own_io),
            CostScope::Subtree => (self.subtree_cpu, self.subtree_gpu, self.subtree_io),
            CostScope::Uncached => (self.uncached_cpu, self.uncached_gpu, self.uncached_io),
        };
        let bytes = bytes.max(1) as f64;
        io / bytes + (cpu + gpu) / (CACHE_READ_COST_PER_BYTE * bytes)
    }
}

/// Key into a single node's cache store: the semantic id of the operator
/// sub-graph plus a per-node-unique entry id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeCacheKey {
    pub semantic_id: String,
    pub entry_id: u64,
}

impl NodeCacheKey {
    pub fn new(semantic_id: impl Into<String>, entry_id: u64) -> Self {
        Self {
            semantic_id: semantic_id.into(),
            entry_id,
        }
    }
}

/// A [`NodeCacheKey`] tagged with the cache type it lives in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypedNodeCacheKey {
    pub key: NodeCacheKey,
    pub cache_type: CacheType,
}

/// Network address of a node, as seen from the outside.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForeignRef {
    pub host: String,
    pub port: u16,
}

/// Pointer into another node's cache: where to connect plus which entry to
/// ask for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRef {
    pub foreign: ForeignRef,
    pub entry_id: u64,
}

/// Where to stream a result payload from: a node address plus a short-lived
/// delivery id minted for this one transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryResponse {
    pub foreign: ForeignRef,
    pub delivery_id: uuid::Uuid,
}

/// A cached result's metadata as held by a node's cache store. The payload
/// bytes themselves live in the node cache, not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub entry_id: u64,
    pub bounds: CacheCube,
    pub size: u64,
    pub profile: ProfilingData,
    pub last_access: u64,
    pub access_count: u64,
}

/// Shadow copy of a node's entry as seen by the index catalog: the
/// handshake/`NEW_ENTRY` wire record, extended with the owning node id once
/// it lands in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeCacheRef {
    pub semantic_id: String,
    pub entry_id: u64,
    pub cache_type: CacheType,
    pub bounds: CacheCube,
    pub size: u64,
    pub profile: ProfilingData,
    pub last_access: u64,
    pub access_count: u64,
}

impl NodeCacheRef {
    /// Attach the owning node id, producing the record the index catalog
    /// stores (the wire record itself carries no node id; the index learns
    /// it from which control/worker connection the handshake arrived on).
    pub fn into_catalog_entry(self, node_id: u32) -> CatalogEntry {
        CatalogEntry {
            node_id,
            semantic_id: self.semantic_id,
            entry_id: self.entry_id,
            cache_type: self.cache_type,
            bounds: self.bounds,
            size: self.size,
            profile: self.profile,
            last_access: self.last_access,
            access_count: self.access_count,
        }
    }
}

/// The index's shadow copy of a node's cache entry: a [`NodeCacheRef`] plus
/// the id of the node that holds it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub node_id: u32,
    pub semantic_id: String,
    pub entry_id: u64,
    pub cache_type: CacheType,
    pub bounds: CacheCube,
    pub size: u64,
    pub profile: ProfilingData,
    pub last_access: u64,
    pub access_count: u64,
}

impl CatalogEntry {
    pub fn key(&self) -> NodeCacheKey {
        NodeCacheKey::new(self.semantic_id.clone(), self.entry_id)
    }

    pub fn cache_ref(&self, foreign: ForeignRef) -> CacheRef {
        CacheRef {
            foreign,
            entry_id: self.entry_id,
        }
    }
}
