//! Wire-level and catalog data types shared between the index server, node
//! server and client cache manager: query cubes, cache entries, keys,
//! node/capacity records.

pub mod entry;
pub mod node;
pub mod query;
pub mod stats;

pub use entry::{
    CacheEntry, CacheRef, CacheType, CatalogEntry, CostScope, DeliveryResponse, ForeignRef,
    NodeCacheKey, NodeCacheRef, ProfilingData, TypedNodeCacheKey,
};
pub use node::Node;
pub use query::{CacheCube, QueryCube, RequestType, ResolutionInfo, ResolutionType, STQueryResult};
pub use stats::{Capacity, CacheStats, NodeEntryStats, NodeHandshake, NodeStats};
