//! Executes one `WorkerCommand` against this node's operator graph and
//! cache stores, writing whatever intermediate and terminal `WorkerReply`s
//! it produces straight back onto the worker socket (§4.6).

use crate::cache::puzzle::{puzzle_raster, RasterContribution, RasterGeometry};
use crate::core::Cube3;
use crate::error::Result;
use crate::model::{CacheCube, CacheRef, CacheType, DeliveryResponse, NodeCacheRef, ProfilingData, QueryCube, ResolutionInfo};
use crate::net::framing::ReadBuffer;
use crate::net::protocol::{self, SubqueryReply, WorkerCommand, WorkerReply};
use crate::node::connection;
use crate::node::operator::{RASTER_BPP, RASTER_NO_DATA};
use crate::node::state::NodeState;
use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::warn;

/// Run one command to completion, writing its terminal reply (`Done` or a
/// synthesized `Error`) to `socket`. Intermediate replies (`NewEntry`,
/// `RasterQueryRequested`) are written inline as they occur.
pub async fn execute_command(socket: &mut TcpStream, state: &NodeState, command: WorkerCommand) -> Result<()> {
    let outcome: Result<WorkerReply> = match command {
        WorkerCommand::CreateRaster { semantic_id, query } => create_raster(socket, state, &semantic_id, query).await,
        WorkerCommand::DeliverRaster { cache_id, .. } => deliver_raster(state, cache_id),
        WorkerCommand::PuzzleRaster {
            semantic_id,
            query,
            covered,
            remainder,
            refs,
            ..
        } => puzzle_raster_command(socket, state, &semantic_id, query, covered, remainder, refs).await,
    };
    let reply = outcome.unwrap_or_else(|e| WorkerReply::Error(e.to_string()));
    connection::write_reply(socket, &reply).await
}

fn resolution_for(state: &NodeState, query: &QueryCube) -> ResolutionInfo {
    let (width, height) = state.operator.pixel_dimensions(&query.cube);
    let scale_x = query.cube.dim(0).distance() / width.max(1) as f64;
    let scale_y = query.cube.dim(1).distance() / height.max(1) as f64;
    ResolutionInfo::raster(scale_x, scale_y)
}

/// Pixel offset and extent of `slab` within the overall query's pixel
/// grid, derived from the same scale the operator graph sized the query
/// itself at.
fn pixel_rect(query: &QueryCube, slab: &Cube3, scale_x: f64, scale_y: f64) -> (usize, usize, usize, usize) {
    let origin_x = query.cube.dim(0).a;
    let origin_y = query.cube.dim(1).a;
    let offset_x = ((slab.dim(0).a - origin_x) / scale_x).round().max(0.0) as usize;
    let offset_y = ((slab.dim(1).a - origin_y) / scale_y).round().max(0.0) as usize;
    let width = (slab.dim(0).distance() / scale_x).round().max(1.0) as usize;
    let height = (slab.dim(1).distance() / scale_y).round().max(1.0) as usize;
    (offset_x, offset_y, width, height)
}

fn zero_profile() -> ProfilingData {
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

fn add_profile(acc: &mut ProfilingData, other: &ProfilingData) {
    acc.own_cpu += other.own_cpu;
    acc.own_gpu += other.own_gpu;
    acc.own_io += other.own_io;
    acc.subtree_cpu += other.subtree_cpu;
    acc.subtree_gpu += other.subtree_gpu;
    acc.subtree_io += other.subtree_io;
    acc.uncached_cpu += other.uncached_cpu;
    acc.uncached_gpu += other.uncached_gpu;
    acc.uncached_io += other.uncached_io;
}

async fn create_raster(socket: &mut TcpStream, state: &NodeState, semantic_id: &str, query: QueryCube) -> Result<WorkerReply> {
    let output = state.operator.evaluate(semantic_id, &query).await?;
    let bounds = CacheCube::new(query, resolution_for(state, &query));

    if state.strategy.do_cache(&output.profile, output.bytes.len() as u64) {
        let store = state.store_for(CacheType::Raster);
        match store.put(semantic_id.to_string(), output.bytes.clone(), bounds, output.profile) {
            Ok(entry_id) => {
                let node_cache_ref = NodeCacheRef {
                    semantic_id: semantic_id.to_string(),
                    entry_id,
                    cache_type: CacheType::Raster,
                    bounds,
                    size: output.bytes.len() as u64,
                    profile: output.profile,
                    last_access: 0,
                    access_count: 0,
                };
                connection::write_reply(socket, &WorkerReply::NewEntry(node_cache_ref)).await?;
            }
            Err(e) => warn!(error = %e, semantic_id, "failed to cache freshly computed raster"),
        }
    }

    let delivery_id = state.register_delivery(Arc::new(output.bytes));
    Ok(WorkerReply::Done(DeliveryResponse {
        foreign: state.self_ref(),
        delivery_id,
    }))
}

fn deliver_raster(state: &NodeState, cache_id: u64) -> Result<WorkerReply> {
    let (payload, _) = state.store_for(CacheType::Raster).get(cache_id)?;
    let delivery_id = state.register_delivery(payload);
    Ok(WorkerReply::Done(DeliveryResponse {
        foreign: state.self_ref(),
        delivery_id,
    }))
}

/// Stitch a puzzled raster from already-resolved references plus a set of
/// remainder slabs, resolving each remainder through one round of
/// `RASTER_QUERY_REQUESTED` before falling back to recomputing it locally.
///
/// A `PartialHit` reply for a remainder slab is treated the same as a
/// `Miss`: placing its sub-references at their exact pixel offsets would
/// need bounds this protocol doesn't carry, so the slab is recomputed in
/// full rather than puzzled a level deeper.
async fn puzzle_raster_command(
    socket: &mut TcpStream,
    state: &NodeState,
    semantic_id: &str,
    query: QueryCube,
    covered: Cube3,
    remainder: Vec<Cube3>,
    refs: Vec<CacheRef>,
) -> Result<WorkerReply> {
    let (width, height) = state.operator.pixel_dimensions(&query.cube);
    let target = RasterGeometry {
        width,
        height,
        bpp: RASTER_BPP,
    };
    let scale_x = query.cube.dim(0).distance() / width.max(1) as f64;
    let scale_y = query.cube.dim(1).distance() / height.max(1) as f64;

    let mut remainders = Vec::new();
    let mut references = Vec::new();
    let mut accrued = zero_profile();

    for slab in &remainder {
        let sub_query = QueryCube::new(slab.dim(0), slab.dim(1), slab.dim(2), query.epsg, query.timetype);
        connection::write_reply(
            socket,
            &WorkerReply::RasterQueryRequested {
                semantic_id: semantic_id.to_string(),
                query: sub_query,
            },
        )
        .await?;
        let subquery_reply = {
            let mut rb = ReadBuffer::new(socket);
            protocol::read_subquery_reply(&mut rb).await?
        };
        let (ox, oy, w, h) = pixel_rect(&query, slab, scale_x, scale_y);
        match subquery_reply {
            SubqueryReply::Hit(cache_ref) => {
                let bytes = connection::fetch_remote_raster(&cache_ref, semantic_id).await?;
                references.push(RasterContribution {
                    offset_x: ox,
                    offset_y: oy,
                    geometry: RasterGeometry { width: w, height: h, bpp: RASTER_BPP },
                    data: bytes,
                });
            }
            SubqueryReply::PartialHit { .. } | SubqueryReply::Miss => {
                let output = state.operator.evaluate(semantic_id, &sub_query).await?;
                add_profile(&mut accrued, &output.profile);
                remainders.push(RasterContribution {
                    offset_x: ox,
                    offset_y: oy,
                    geometry: RasterGeometry { width: w, height: h, bpp: RASTER_BPP },
                    data: output.bytes,
                });
            }
        }
    }

    // `refs` carries only `(foreign, entry_id)` pairs, not each reference's
    // own bounds, so every ref is blitted at the full `covered` rect --
    // exact when `covered` is a single ref (the common case) and a
    // documented approximation when several refs jointly tile it.
    let (cox, coy, cw, ch) = pixel_rect(&query, &covered, scale_x, scale_y);
    for cache_ref in &refs {
        let bytes = connection::fetch_remote_raster(cache_ref, semantic_id).await?;
        references.push(RasterContribution {
            offset_x: cox,
            offset_y: coy,
            geometry: RasterGeometry { width: cw, height: ch, bpp: RASTER_BPP },
            data: bytes,
        });
    }

    let stitched = puzzle_raster(target, &RASTER_NO_DATA, remainders, references)?;
    let bounds = CacheCube::new(query, ResolutionInfo::raster(scale_x, scale_y));

    if state.strategy.do_cache(&accrued, stitched.len() as u64) {
        let store = state.store_for(CacheType::Raster);
        if let Ok(entry_id) = store.put(semantic_id.to_string(), stitched.clone(), bounds, accrued) {
            let node_cache_ref = NodeCacheRef {
                semantic_id: semantic_id.to_string(),
                entry_id,
                cache_type: CacheType::Raster,
                bounds,
                size: stitched.len() as u64,
                profile: accrued,
                last_access: 0,
                access_count: 0,
            };
            connection::write_reply(socket, &WorkerReply::NewEntry(node_cache_ref)).await?;
        }
    }

    let delivery_id = state.register_delivery(Arc::new(stitched));
    Ok(WorkerReply::Done(DeliveryResponse {
        foreign: state.self_ref(),
        delivery_id,
    }))
}
