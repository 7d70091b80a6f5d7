//! Capacity and access-statistics records exchanged over the control
//! connection (`HELLO`, `GET_STATS`).

use crate::model::entry::{CacheType, NodeCacheRef};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Total/used byte budget per cache type, reported by a node's handshake
/// and stats responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capacity {
    pub raster_total: u64,
    pub raster_used: u64,
    pub points_total: u64,
    pub points_used: u64,
    pub lines_total: u64,
    pub lines_used: u64,
    pub polygons_total: u64,
    pub polygons_used: u64,
    pub plots_total: u64,
    pub plots_used: u64,
}

impl Capacity {
    pub fn total_for(&self, t: CacheType) -> u64 {
        match t {
            CacheType::Raster => self.raster_total,
            CacheType::Point => self.points_total,
            CacheType::Line => self.lines_total,
            CacheType::Polygon => self.polygons_total,
            CacheType::Plot => self.plots_total,
        }
    }

    pub fn used_for(&self, t: CacheType) -> u64 {
        match t {
            CacheType::Raster => self.raster_used,
            CacheType::Point => self.points_used,
            CacheType::Line => self.lines_used,
            CacheType::Polygon => self.polygons_used,
            CacheType::Plot => self.plots_used,
        }
    }

    pub fn set_used_for(&mut self, t: CacheType, used: u64) {
        match t {
            CacheType::Raster => self.raster_used = used,
            CacheType::Point => self.points_used = used,
            CacheType::Line => self.lines_used = used,
            CacheType::Polygon => self.polygons_used = used,
            CacheType::Plot => self.plots_used = used,
        }
    }
}

/// Per-entry access counters reported in a `GET_STATS` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEntryStats {
    pub entry_id: u64,
    pub last_access: u64,
    pub access_count: u64,
}

/// Access stats for one cache type, grouped by semantic id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub cache_type: CacheType,
    pub entries: HashMap<String, Vec<NodeEntryStats>>,
}

/// Body of a `GET_STATS` reply: capacity plus per-type access stats.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeStats {
    pub capacity: Capacity,
    pub stats: Vec<CacheStats>,
}

/// Body of the `HELLO` handshake a node sends when its control connection
/// registers: capacity plus the full list of entries it already holds, used
/// by the index to seed its shadow catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeHandshake {
    pub host: String,
    pub port: u16,
    pub capacity: Capacity,
    pub entries: Vec<NodeCacheRef>,
}
