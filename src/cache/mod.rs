//! The spatio-temporal cache: entry indexing and query matching, the
//! per-node payload store, admission strategy, and the puzzle engine that
//! composes partial hits into a full result.

pub mod index;
pub mod puzzle;
pub mod store;
pub mod strategy;

pub use index::{CacheEntryIndex, PARTIAL_HIT_THRESHOLD};
pub use store::NodeCacheStore;
pub use strategy::{from_config, CachingStrategy};
