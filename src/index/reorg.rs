//! Reorganization planning (§4.7): periodically move entries between nodes
//! to balance capacity or co-locate related entries.

use crate::index::catalog::Catalog;
use crate::model::{CacheType, NodeCacheKey, TypedNodeCacheKey};
use crate::net::protocol::Move;

/// A node is considered overfull once any cache type crosses this fraction
/// of its capacity, and a candidate destination once it's below this.
const HIGH_WATERMARK: f64 = 0.9;
const LOW_WATERMARK: f64 = 0.5;

pub trait ReorgStrategy: Send + Sync {
    fn plan(&self, catalog: &Catalog) -> Vec<Move>;
}

/// Moves entries off nodes that are over their capacity watermark onto
/// nodes with room to spare, picking the least-recently-accessed entries
/// first so the move also improves effective cache freshness.
pub struct CapacityStrategy;

impl ReorgStrategy for CapacityStrategy {
    fn plan(&self, catalog: &Catalog) -> Vec<Move> {
        let mut moves = Vec::new();
        let capacities = catalog.all_capacities();

        for cache_type in CacheType::ALL {
            let mut overfull: Vec<(u32, f64)> = Vec::new();
            let mut underfull: Vec<u32> = Vec::new();

            for (node_id, capacity) in &capacities {
                let total = capacity.total_for(cache_type);
                if total == 0 {
                    continue;
                }
                let ratio = capacity.used_for(cache_type) as f64 / total as f64;
                if ratio > HIGH_WATERMARK {
                    overfull.push((*node_id, ratio));
                } else if ratio < LOW_WATERMARK {
                    underfull.push(*node_id);
                }
            }
            if overfull.is_empty() || underfull.is_empty() {
                continue;
            }
            overfull.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());

            let mut dest_cycle = underfull.into_iter().cycle();
            for (node_id, _) in overfull {
                let mut entries = catalog.index_for(cache_type).entries_for_node(node_id);
                entries.sort_by_key(|e| e.last_access);
                // Move the single oldest entry; the next tick re-evaluates
                // whether the node is still overfull.
                if let (Some(entry), Some(dest)) = (entries.into_iter().next(), dest_cycle.next()) {
                    moves.push(Move {
                        from_node: node_id,
                        to_node: dest,
                        key: TypedNodeCacheKey {
                            key: NodeCacheKey::new(entry.semantic_id, entry.entry_id),
                            cache_type,
                        },
                    });
                }
            }
        }

        moves
    }
}

/// Co-locates entries whose semantic id shares a common operator-subgraph
/// prefix (everything up to the last `/`), moving the minority copies onto
/// the node holding the majority.
pub struct GraphStrategy;

impl ReorgStrategy for GraphStrategy {
    fn plan(&self, catalog: &Catalog) -> Vec<Move> {
        let mut moves = Vec::new();
        for cache_type in CacheType::ALL {
            let mut by_prefix: std::collections::HashMap<String, Vec<(u32, String, u64)>> =
                std::collections::HashMap::new();
            for node in catalog.nodes() {
                for entry in catalog.index_for(cache_type).entries_for_node(node.id) {
                    let prefix = graph_prefix(&entry.semantic_id);
                    by_prefix.entry(prefix).or_default().push((
                        node.id,
                        entry.semantic_id.clone(),
                        entry.entry_id,
                    ));
                }
            }

            for group in by_prefix.values() {
                if group.len() < 2 {
                    continue;
                }
                let mut counts: std::collections::HashMap<u32, usize> =
                    std::collections::HashMap::new();
                for (node_id, ..) in group {
                    *counts.entry(*node_id).or_default() += 1;
                }
                let majority_node = *counts.iter().max_by_key(|(_, count)| **count).unwrap().0;

                for (node_id, semantic_id, entry_id) in group {
                    if *node_id != majority_node {
                        moves.push(Move {
                            from_node: *node_id,
                            to_node: majority_node,
                            key: TypedNodeCacheKey {
                                key: NodeCacheKey::new(semantic_id.clone(), *entry_id),
                                cache_type,
                            },
                        });
                    }
                }
            }
        }
        moves
    }
}

fn graph_prefix(semantic_id: &str) -> String {
    match semantic_id.rfind('/') {
        Some(i) => semantic_id[..i].to_string(),
        None => semantic_id.to_string(),
    }
}

/// Co-locates entries whose cubes lie in the same spatial quadrant (sign of
/// the cube's x/y midpoint), moving minority copies onto the node holding
/// the majority for that quadrant.
pub struct GeoStrategy;

impl ReorgStrategy for GeoStrategy {
    fn plan(&self, catalog: &Catalog) -> Vec<Move> {
        let mut moves = Vec::new();
        for cache_type in CacheType::ALL {
            let mut by_quadrant: std::collections::HashMap<(i8, i8), Vec<(u32, String, u64)>> =
                std::collections::HashMap::new();
            for node in catalog.nodes() {
                for entry in catalog.index_for(cache_type).entries_for_node(node.id) {
                    let cube = entry.bounds.query.cube;
                    let mid_x = (cube.dim(0).a + cube.dim(0).b) / 2.0;
                    let mid_y = (cube.dim(1).a + cube.dim(1).b) / 2.0;
                    let quadrant = (mid_x.signum() as i8, mid_y.signum() as i8);
                    by_quadrant.entry(quadrant).or_default().push((
                        node.id,
                        entry.semantic_id.clone(),
                        entry.entry_id,
                    ));
                }
            }

            for group in by_quadrant.values() {
                if group.len() < 2 {
                    continue;
                }
                let mut counts: std::collections::HashMap<u32, usize> =
                    std::collections::HashMap::new();
                for (node_id, ..) in group {
                    *counts.entry(*node_id).or_default() += 1;
                }
                let majority_node = *counts.iter().max_by_key(|(_, count)| **count).unwrap().0;

                for (node_id, semantic_id, entry_id) in group {
                    if *node_id != majority_node {
                        moves.push(Move {
                            from_node: *node_id,
                            to_node: majority_node,
                            key: TypedNodeCacheKey {
                                key: NodeCacheKey::new(semantic_id.clone(), *entry_id),
                                cache_type,
                            },
                        });
                    }
                }
            }
        }
        moves
    }
}

pub fn from_config(kind: crate::config::ReorgStrategyKind) -> Box<dyn ReorgStrategy> {
    use crate::config::ReorgStrategyKind;
    match kind {
        ReorgStrategyKind::Capacity => Box::new(CapacityStrategy),
        ReorgStrategyKind::Graph => Box::new(GraphStrategy),
        ReorgStrategyKind::Geo => Box::new(GeoStrategy),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Interval;
    use crate::model::{Capacity, CacheCube, NodeCacheRef, ProfilingData, QueryCube, ResolutionInfo};

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

    fn bounds_at(mid_x: f64, mid_y: f64) -> CacheCube {
        CacheCube::new(
            QueryCube::new(
                Interval::new(mid_x - 1.0, mid_x + 1.0),
                Interval::new(mid_y - 1.0, mid_y + 1.0),
                Interval::new(0.0, 1.0),
                4326,
                0,
            ),
            ResolutionInfo::unconstrained(),
        )
    }

    fn seed_entry(catalog: &Catalog, node_id: u32, semantic_id: &str, entry_id: u64, last_access: u64, bounds: CacheCube) {
        catalog.add_entry(
            node_id,
            NodeCacheRef {
                semantic_id: semantic_id.to_string(),
                entry_id,
                cache_type: CacheType::Raster,
                bounds,
                size: 10,
                profile: profile(),
                last_access,
                access_count: 0,
            },
        );
    }

    #[test]
    fn capacity_strategy_moves_oldest_entry_off_an_overfull_node() {
        let catalog = Catalog::new();
        let full = catalog.register_node("full".to_string(), 9000);
        let empty = catalog.register_node("empty".to_string(), 9001);

        let mut overfull_capacity = Capacity::default();
        overfull_capacity.raster_total = 100;
        overfull_capacity.raster_used = 95;
        catalog.set_capacity(full, overfull_capacity);

        let mut underfull_capacity = Capacity::default();
        underfull_capacity.raster_total = 100;
        underfull_capacity.raster_used = 10;
        catalog.set_capacity(empty, underfull_capacity);

        let bounds = bounds_at(0.0, 0.0);
        seed_entry(&catalog, full, "sem", 1, 5, bounds);
        seed_entry(&catalog, full, "sem", 2, 50, bounds);

        let moves = CapacityStrategy.plan(&catalog);
        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0].from_node, full);
        assert_eq!(moves[0].to_node, empty);
        assert_eq!(moves[0].key.key.entry_id, 1);
    }

    #[test]
    fn capacity_strategy_is_a_no_op_when_nothing_crosses_the_watermark() {
        let catalog = Catalog::new();
        let node = catalog.register_node("host".to_string(), 9000);
        let mut capacity = Capacity::default();
        capacity.raster_total = 100;
        capacity.raster_used = 50;
        catalog.set_capacity(node, capacity);
        seed_entry(&catalog, node, "sem", 1, 5, bounds_at(0.0, 0.0));

        assert!(CapacityStrategy.plan(&catalog).is_empty());
    }

    #[test]
    fn graph_strategy_colocates_minority_entries_onto_the_majority_node() {
        let catalog = Catalog::new();
        let majority = catalog.register_node("a".to_string(), 9000);
        let minority = catalog.register_node("b".to_string(), 9001);

        seed_entry(&catalog, majority, "layers/ndvi/2024", 1, 0, bounds_at(0.0, 0.0));
        seed_entry(&catalog, majority, "layers/ndvi/2025", 2, 0, bounds_at(0.0, 0.0));
        seed_entry(&catalog, minority, "layers/ndvi/2023", 3, 0, bounds_at(0.0, 0.0));

        let moves = GraphStrategy.plan(&catalog);
        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0].from_node, minority);
        assert_eq!(moves[0].to_node, majority);
        assert_eq!(moves[0].key.key.entry_id, 3);
    }

    #[test]
    fn geo_strategy_colocates_minority_entries_in_the_same_quadrant() {
        let catalog = Catalog::new();
        let majority = catalog.register_node("a".to_string(), 9000);
        let minority = catalog.register_node("b".to_string(), 9001);

        seed_entry(&catalog, majority, "sem-a", 1, 0, bounds_at(10.0, 10.0));
        seed_entry(&catalog, majority, "sem-b", 2, 0, bounds_at(12.0, 12.0));
        seed_entry(&catalog, minority, "sem-c", 3, 0, bounds_at(14.0, 14.0));

        let moves = GeoStrategy.plan(&catalog);
        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0].from_node, minority);
        assert_eq!(moves[0].to_node, majority);
    }

    #[test]
    fn geo_strategy_leaves_different_quadrants_untouched() {
        let catalog = Catalog::new();
        let node_a = catalog.register_node("a".to_string(), 9000);
        let node_b = catalog.register_node("b".to_string(), 9001);

        seed_entry(&catalog, node_a, "sem-a", 1, 0, bounds_at(10.0, 10.0));
        seed_entry(&catalog, node_b, "sem-b", 2, 0, bounds_at(-10.0, -10.0));

        assert!(GeoStrategy.plan(&catalog).is_empty());
    }
}
