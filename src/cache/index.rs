//! Per-semantic-id catalog of cache entries and the spatio-temporal query
//! matching algorithm (C2).
//!
//! This is the structure the index server uses for its node-wide shadow
//! catalog, and the same shape a node could use to track its own entries.
//! It never holds payload bytes -- only the metadata needed to decide hit,
//! partial-hit or miss.

use crate::core::Cube3;
use crate::model::{CacheCube, CatalogEntry, NodeCacheKey, QueryCube, STQueryResult};
use dashmap::DashMap;
use parking_lot::RwLock;

/// Coverage fraction above which a non-full hit is worth puzzling together
/// rather than falling back to a full create.
pub const PARTIAL_HIT_THRESHOLD: f64 = 0.1;

/// Volume below which remaining uncovered query volume is treated as zero,
/// matching the epsilon tolerance used throughout the cube primitives.
const COVERAGE_EPSILON: f64 = 1e-9;

/// Entry store and query engine for one cache type.
#[derive(Default)]
pub struct CacheEntryIndex {
    by_semantic_id: DashMap<String, RwLock<Vec<CatalogEntry>>>,
}

impl CacheEntryIndex {
    pub fn new() -> Self {
        Self {
            by_semantic_id: DashMap::new(),
        }
    }

    /// Insert `entry`, replacing any existing entry with the same
    /// `(semantic_id, entry_id)` -- idempotent under retries.
    pub fn put(&self, entry: CatalogEntry) {
        let bucket = self
            .by_semantic_id
            .entry(entry.semantic_id.clone())
            .or_insert_with(|| RwLock::new(Vec::new()));
        let mut bucket = bucket.write();
        if let Some(existing) = bucket.iter_mut().find(|e| e.entry_id == entry.entry_id) {
            *existing = entry;
        } else {
            bucket.push(entry);
        }
    }

    /// Remove a single entry by key. No-op if absent.
    pub fn remove(&self, key: &NodeCacheKey) {
        if let Some(bucket) = self.by_semantic_id.get(&key.semantic_id) {
            bucket.write().retain(|e| e.entry_id != key.entry_id);
        }
    }

    /// Look up a single entry by key, e.g. to resolve the owning node for a
    /// [`crate::model::CacheRef`] after [`CacheEntryIndex::query`] returns
    /// its id.
    pub fn get(&self, key: &NodeCacheKey) -> Option<CatalogEntry> {
        self.by_semantic_id
            .get(&key.semantic_id)?
            .read()
            .iter()
            .find(|e| e.entry_id == key.entry_id)
            .cloned()
    }

    /// Change which node owns an entry, without touching its metadata.
    /// Used once a reorganization move has been acknowledged by the source
    /// node. No-op if the key is absent.
    pub fn reassign(&self, key: &NodeCacheKey, new_node_id: u32) {
        if let Some(bucket) = self.by_semantic_id.get(&key.semantic_id) {
            if let Some(entry) = bucket.write().iter_mut().find(|e| e.entry_id == key.entry_id) {
                entry.node_id = new_node_id;
            }
        }
    }

    /// Drop every entry owned by `node_id`, used when a control connection
    /// fails and the index discards that node's shadow entries.
    pub fn remove_all_by_node(&self, node_id: u32) {
        for bucket in self.by_semantic_id.iter() {
            bucket.write().retain(|e| e.node_id != node_id);
        }
    }

    /// All entries owned by `node_id`, across every semantic id. Used by
    /// the reorganization planner.
    pub fn entries_for_node(&self, node_id: u32) -> Vec<CatalogEntry> {
        self.by_semantic_id
            .iter()
            .flat_map(|bucket| {
                bucket
                    .read()
                    .iter()
                    .filter(|e| e.node_id == node_id)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Match a query cube against the entries stored for `semantic_id`.
    ///
    /// Filters to entries whose `epsg`/`timetype`/resolution are compatible,
    /// then greedily selects the entry that adds the most uncovered volume
    /// until no candidate improves coverage further or the remaining volume
    /// is negligible.
    pub fn query(&self, semantic_id: &str, query: &CacheCube) -> STQueryResult {
        let candidates: Vec<CatalogEntry> = match self.by_semantic_id.get(semantic_id) {
            Some(bucket) => bucket
                .read()
                .iter()
                .filter(|e| e.bounds.matches(query))
                .cloned()
                .collect(),
            None => Vec::new(),
        };

        let query_cube = query.query.cube;
        // Each candidate's intersection with the query, aligned by index;
        // `None` for a candidate that doesn't actually intersect.
        let mut remaining_by_candidate: Vec<Option<Cube3>> = candidates
            .iter()
            .map(|e| e.bounds.query.cube.intersect(&query_cube).ok())
            .collect();

        let mut ids = Vec::new();
        let mut covered: Option<Cube3> = None;
        let mut picked = vec![false; candidates.len()];

        loop {
            let mut best_idx = None;
            let mut best_gain = COVERAGE_EPSILON;

            for (i, cand) in remaining_by_candidate.iter().enumerate() {
                if picked[i] {
                    continue;
                }
                let Some(cand_intersection) = cand else {
                    continue;
                };
                let gain = match &covered {
                    None => cand_intersection.volume(),
                    Some(cov) => match cand_intersection.dissect_by(cov) {
                        Ok(remainder) => remainder.iter().map(Cube3::volume).sum(),
                        Err(_) => cand_intersection.volume(),
                    },
                };
                if gain > best_gain {
                    best_gain = gain;
                    best_idx = Some(i);
                }
            }

            let Some(i) = best_idx else { break };
            picked[i] = true;
            ids.push(candidates[i].entry_id);
            let intersection = remaining_by_candidate[i].take().unwrap();
            covered = Some(match &covered {
                None => intersection,
                Some(cov) => cov.combine(&intersection),
            });

            let query_volume = query_cube.volume();
            let covered_volume = covered.as_ref().map(Cube3::volume).unwrap_or(0.0);
            if query_volume - covered_volume < COVERAGE_EPSILON {
                break;
            }
        }

        let covered = covered.unwrap_or_else(|| {
            // No entry intersects at all: report a zero-volume covered cube
            // collapsed to the query's own origin corner so `dissect_by`
            // below still yields the whole query as a single remainder.
            Cube3::new([
                crate::core::Interval::new(query_cube.dim(0).a, query_cube.dim(0).a),
                crate::core::Interval::new(query_cube.dim(1).a, query_cube.dim(1).a),
                crate::core::Interval::new(query_cube.dim(2).a, query_cube.dim(2).a),
            ])
        });

        let remainder = query_cube.dissect_by(&covered).unwrap_or_default();
        let coverage = (covered.volume() / query_cube.volume()).clamp(0.0, 1.0);

        STQueryResult {
            covered,
            remainder,
            ids,
            coverage,
        }
    }
}

/// Build the query-side [`CacheCube`] used to match entries: resolution
/// info carries only the actual requested scale, not an allowed range.
pub fn query_cache_cube(query: QueryCube, resolution: crate::model::ResolutionInfo) -> CacheCube {
    CacheCube::new(query, resolution)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Interval;
    use crate::model::{CacheType, ProfilingData, ResolutionInfo};

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

    fn qcube(x: (f64, f64), y: (f64, f64), t: (f64, f64)) -> QueryCube {
        QueryCube::new(
            Interval::new(x.0, x.1),
            Interval::new(y.0, y.1),
            Interval::new(t.0, t.1),
            4326,
            0,
        )
    }

    fn entry(id: u64, node: u32, bounds: QueryCube) -> CatalogEntry {
        CatalogEntry {
            node_id: node,
            semantic_id: "sem".to_string(),
            entry_id: id,
            cache_type: CacheType::Raster,
            bounds: CacheCube::new(bounds, ResolutionInfo::unconstrained()),
            size: 1024,
            profile: profile(),
            last_access: 0,
            access_count: 0,
        }
    }

    #[test]
    fn full_hit_when_single_entry_contains_query() {
        let index = CacheEntryIndex::new();
        index.put(entry(1, 0, qcube((0.0, 1024.0), (0.0, 1024.0), (0.0, 1.0))));

        let q = qcube((0.0, 1024.0), (0.0, 1024.0), (0.0, 1.0));
        let cache_cube = CacheCube::new(q, ResolutionInfo::unconstrained());
        let result = index.query("sem", &cache_cube);

        assert!(result.is_full_hit());
        assert_eq!(result.ids, vec![1]);
    }

    #[test]
    fn puzzle_hit_on_fifty_percent_overlap() {
        let index = CacheEntryIndex::new();
        index.put(entry(1, 0, qcube((0.0, 1024.0), (0.0, 1024.0), (0.0, 1.0))));

        let q = qcube((512.0, 1536.0), (0.0, 1024.0), (0.0, 1.0));
        let cache_cube = CacheCube::new(q, ResolutionInfo::unconstrained());
        let result = index.query("sem", &cache_cube);

        assert!(!result.is_full_hit());
        assert!(result.is_partial_hit());
        assert_eq!(result.ids, vec![1]);
        assert_eq!(result.remainder.len(), 1);
    }

    #[test]
    fn full_miss_with_no_entries() {
        let index = CacheEntryIndex::new();
        let q = qcube((0.0, 10.0), (0.0, 10.0), (0.0, 1.0));
        let cache_cube = CacheCube::new(q, ResolutionInfo::unconstrained());
        let result = index.query("sem", &cache_cube);
        assert!(result.is_full_miss());
        assert!(result.ids.is_empty());
    }

    #[test]
    fn full_miss_below_coverage_threshold() {
        let index = CacheEntryIndex::new();
        // A sliver entry covering under 10% of a large query.
        index.put(entry(1, 0, qcube((0.0, 10.0), (0.0, 1024.0), (0.0, 1.0))));
        let q = qcube((0.0, 1024.0), (0.0, 1024.0), (0.0, 1.0));
        let cache_cube = CacheCube::new(q, ResolutionInfo::unconstrained());
        let result = index.query("sem", &cache_cube);
        assert!(result.is_full_miss());
    }

    #[test]
    fn remove_all_by_node_drops_only_that_nodes_entries() {
        let index = CacheEntryIndex::new();
        index.put(entry(1, 0, qcube((0.0, 10.0), (0.0, 10.0), (0.0, 1.0))));
        index.put(entry(2, 1, qcube((0.0, 10.0), (0.0, 10.0), (0.0, 1.0))));

        index.remove_all_by_node(0);

        let q = qcube((0.0, 10.0), (0.0, 10.0), (0.0, 1.0));
        let cache_cube = CacheCube::new(q, ResolutionInfo::unconstrained());
        let result = index.query("sem", &cache_cube);
        assert_eq!(result.ids, vec![2]);
    }
}
