//! Message shapes and magic numbers for the control, worker and client
//! connection protocols (§6). Encode/decode functions are plain functions
//! over [`ReadBuffer`]/[`WriteBuffer`] rather than a derive, since the wire
//! shapes are hand-picked subsets of the catalog types, not 1:1 struct
//! dumps.

use crate::core::Interval;
use crate::error::{Error, NetworkError, Result};
pub use crate::model::{
    CacheCube, CacheRef, CacheType, Capacity, CacheStats, CatalogEntry, DeliveryResponse,
    ForeignRef, NodeCacheRef, NodeEntryStats, NodeHandshake, NodeStats, ProfilingData,
    QueryCube, RequestType, ResolutionInfo, ResolutionType, TypedNodeCacheKey,
};
use crate::net::framing::{ReadBuffer, WriteBuffer};
use tokio::io::AsyncRead;

/// First 4 bytes of a new node-port connection, identifying its role.
/// Unknown values cause the server to drop the connection without reply.
pub mod magic {
    pub const CLIENT: u32 = 0xC1_E2_A3_B4;
    pub const WORKER: u32 = 0xB0_0B_1E_55;
    pub const CONTROL: u32 = 0xC0_47_20_01;
    pub const DELIVERY: u32 = 0xDE_71_5E_59;
    pub const REORG: u32 = 0x6E_02_60_01;
}

/// Role a freshly-accepted node-port connection identifies itself as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    Client,
    Worker,
    Control,
    Delivery,
    /// Node-to-node: another node pushing a reorganization-moved entry
    /// onto this one (§4.7).
    Reorg,
}

impl ConnectionRole {
    pub fn from_magic(value: u32) -> Result<Self> {
        match value {
            magic::CLIENT => Ok(ConnectionRole::Client),
            magic::WORKER => Ok(ConnectionRole::Worker),
            magic::CONTROL => Ok(ConnectionRole::Control),
            magic::DELIVERY => Ok(ConnectionRole::Delivery),
            magic::REORG => Ok(ConnectionRole::Reorg),
            other => Err(NetworkError::UnexpectedMagic(other).into()),
        }
    }

    pub fn magic(self) -> u32 {
        match self {
            ConnectionRole::Client => magic::CLIENT,
            ConnectionRole::Worker => magic::WORKER,
            ConnectionRole::Control => magic::CONTROL,
            ConnectionRole::Delivery => magic::DELIVERY,
            ConnectionRole::Reorg => magic::REORG,
        }
    }
}

/// How strictly a delivered/puzzled result must match the requested
/// extent; threaded through `CMD_DELIVER_RASTER`/`CMD_PUZZLE_RASTER`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    Exact,
    AllowLossy,
}

impl QueryMode {
    fn to_u8(self) -> u8 {
        match self {
            QueryMode::Exact => 0,
            QueryMode::AllowLossy => 1,
        }
    }

    fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(QueryMode::Exact),
            1 => Ok(QueryMode::AllowLossy),
            other => Err(NetworkError::Framing(format!("bad query mode tag {other}")).into()),
        }
    }
}

fn cache_type_to_u8(t: CacheType) -> u8 {
    match t {
        CacheType::Raster => 0,
        CacheType::Point => 1,
        CacheType::Line => 2,
        CacheType::Polygon => 3,
        CacheType::Plot => 4,
    }
}

fn cache_type_from_u8(v: u8) -> Result<CacheType> {
    match v {
        0 => Ok(CacheType::Raster),
        1 => Ok(CacheType::Point),
        2 => Ok(CacheType::Line),
        3 => Ok(CacheType::Polygon),
        4 => Ok(CacheType::Plot),
        other => Err(NetworkError::Framing(format!("bad cache type tag {other}")).into()),
    }
}

fn request_type_to_u8(t: RequestType) -> u8 {
    match t {
        RequestType::Raster => 0,
        RequestType::Points => 1,
        RequestType::Lines => 2,
        RequestType::Polygons => 3,
        RequestType::Plot => 4,
    }
}

fn request_type_from_u8(v: u8) -> Result<RequestType> {
    match v {
        0 => Ok(RequestType::Raster),
        1 => Ok(RequestType::Points),
        2 => Ok(RequestType::Lines),
        3 => Ok(RequestType::Polygons),
        4 => Ok(RequestType::Plot),
        other => Err(NetworkError::Framing(format!("bad request type tag {other}")).into()),
    }
}

pub fn write_query_cube(wb: &mut WriteBuffer, q: &QueryCube) {
    wb.write_f64(q.cube.dim(0).a)
        .write_f64(q.cube.dim(0).b)
        .write_f64(q.cube.dim(1).a)
        .write_f64(q.cube.dim(1).b)
        .write_f64(q.cube.dim(2).a)
        .write_f64(q.cube.dim(2).b)
        .write_u32(q.epsg)
        .write_u32(q.timetype);
}

pub async fn read_query_cube<R: AsyncRead + Unpin>(rb: &mut ReadBuffer<'_, R>) -> Result<QueryCube> {
    let x = Interval::new(rb.read_f64().await?, rb.read_f64().await?);
    let y = Interval::new(rb.read_f64().await?, rb.read_f64().await?);
    let t = Interval::new(rb.read_f64().await?, rb.read_f64().await?);
    let epsg = rb.read_u32().await?;
    let timetype = rb.read_u32().await?;
    Ok(QueryCube::new(x, y, t, epsg, timetype))
}

pub fn write_resolution_info(wb: &mut WriteBuffer, r: &ResolutionInfo) {
    let restype = match r.restype {
        ResolutionType::Pixels => 0u8,
        ResolutionType::None => 1u8,
    };
    wb.write_u8(restype)
        .write_f64(r.pixel_scale_x.a)
        .write_f64(r.pixel_scale_x.b)
        .write_f64(r.pixel_scale_y.a)
        .write_f64(r.pixel_scale_y.b)
        .write_f64(r.actual_pixel_scale_x)
        .write_f64(r.actual_pixel_scale_y);
}

pub async fn read_resolution_info<R: AsyncRead + Unpin>(
    rb: &mut ReadBuffer<'_, R>,
) -> Result<ResolutionInfo> {
    let restype = match rb.read_u8().await? {
        0 => ResolutionType::Pixels,
        1 => ResolutionType::None,
        other => return Err(NetworkError::Framing(format!("bad restype tag {other}")).into()),
    };
    let pixel_scale_x = Interval::new(rb.read_f64().await?, rb.read_f64().await?);
    let pixel_scale_y = Interval::new(rb.read_f64().await?, rb.read_f64().await?);
    let actual_pixel_scale_x = rb.read_f64().await?;
    let actual_pixel_scale_y = rb.read_f64().await?;
    Ok(ResolutionInfo {
        restype,
        pixel_scale_x,
        pixel_scale_y,
        actual_pixel_scale_x,
        actual_pixel_scale_y,
    })
}

pub fn write_cache_cube(wb: &mut WriteBuffer, c: &CacheCube) {
    write_query_cube(wb, &c.query);
    write_resolution_info(wb, &c.resolution);
}

pub async fn read_cache_cube<R: AsyncRead + Unpin>(rb: &mut ReadBuffer<'_, R>) -> Result<CacheCube> {
    let query = read_query_cube(rb).await?;
    let resolution = read_resolution_info(rb).await?;
    Ok(CacheCube::new(query, resolution))
}

pub fn write_profiling_data(wb: &mut WriteBuffer, p: &ProfilingData) {
    wb.write_f64(p.own_cpu)
        .write_f64(p.own_gpu)
        .write_f64(p.own_io)
        .write_f64(p.subtree_cpu)
        .write_f64(p.subtree_gpu)
        .write_f64(p.subtree_io)
        .write_f64(p.uncached_cpu)
        .write_f64(p.uncached_gpu)
        .write_f64(p.uncached_io);
}

pub async fn read_profiling_data<R: AsyncRead + Unpin>(
    rb: &mut ReadBuffer<'_, R>,
) -> Result<ProfilingData> {
    Ok(ProfilingData {
        own_cpu: rb.read_f64().await?,
        own_gpu: rb.read_f64().await?,
        own_io: rb.read_f64().await?,
        subtree_cpu: rb.read_f64().await?,
        subtree_gpu: rb.read_f64().await?,
        subtree_io: rb.read_f64().await?,
        uncached_cpu: rb.read_f64().await?,
        uncached_gpu: rb.read_f64().await?,
        uncached_io: rb.read_f64().await?,
    })
}

pub fn write_foreign_ref(wb: &mut WriteBuffer, f: &ForeignRef) {
    wb.write_string(&f.host).write_u16(f.port);
}

pub async fn read_foreign_ref<R: AsyncRead + Unpin>(rb: &mut ReadBuffer<'_, R>) -> Result<ForeignRef> {
    Ok(ForeignRef {
        host: rb.read_string().await?,
        port: rb.read_u16().await?,
    })
}

pub fn write_cache_ref(wb: &mut WriteBuffer, r: &CacheRef) {
    write_foreign_ref(wb, &r.foreign);
    wb.write_u64(r.entry_id);
}

pub async fn read_cache_ref<R: AsyncRead + Unpin>(rb: &mut ReadBuffer<'_, R>) -> Result<CacheRef> {
    let foreign = read_foreign_ref(rb).await?;
    let entry_id = rb.read_u64().await?;
    Ok(CacheRef { foreign, entry_id })
}

pub fn write_delivery_response(wb: &mut WriteBuffer, d: &DeliveryResponse) {
    write_foreign_ref(wb, &d.foreign);
    wb.write_blob(d.delivery_id.as_bytes());
}

pub async fn read_delivery_response<R: AsyncRead + Unpin>(
    rb: &mut ReadBuffer<'_, R>,
) -> Result<DeliveryResponse> {
    let foreign = read_foreign_ref(rb).await?;
    let bytes = rb.read_blob().await?;
    let array: [u8; 16] = bytes
        .try_into()
        .map_err(|_| Error::from(NetworkError::Framing("delivery id is not 16 bytes".into())))?;
    Ok(DeliveryResponse {
        foreign,
        delivery_id: uuid::Uuid::from_bytes(array),
    })
}

pub fn write_capacity(wb: &mut WriteBuffer, c: &Capacity) {
    wb.write_u64(c.raster_total)
        .write_u64(c.raster_used)
        .write_u64(c.points_total)
        .write_u64(c.points_used)
        .write_u64(c.lines_total)
        .write_u64(c.lines_used)
        .write_u64(c.polygons_total)
        .write_u64(c.polygons_used)
        .write_u64(c.plots_total)
        .write_u64(c.plots_used);
}

pub async fn read_capacity<R: AsyncRead + Unpin>(rb: &mut ReadBuffer<'_, R>) -> Result<Capacity> {
    Ok(Capacity {
        raster_total: rb.read_u64().await?,
        raster_used: rb.read_u64().await?,
        points_total: rb.read_u64().await?,
        points_used: rb.read_u64().await?,
        lines_total: rb.read_u64().await?,
        lines_used: rb.read_u64().await?,
        polygons_total: rb.read_u64().await?,
        polygons_used: rb.read_u64().await?,
        plots_total: rb.read_u64().await?,
        plots_used: rb.read_u64().await?,
    })
}

pub fn write_node_cache_ref(wb: &mut WriteBuffer, e: &NodeCacheRef) {
    wb.write_string(&e.semantic_id).write_u64(e.entry_id);
    wb.write_u8(cache_type_to_u8(e.cache_type));
    write_cache_cube(wb, &e.bounds);
    wb.write_u64(e.size);
    write_profiling_data(wb, &e.profile);
    wb.write_u64(e.last_access).write_u64(e.access_count);
}

pub async fn read_node_cache_ref<R: AsyncRead + Unpin>(
    rb: &mut ReadBuffer<'_, R>,
) -> Result<NodeCacheRef> {
    let semantic_id = rb.read_string().await?;
    let entry_id = rb.read_u64().await?;
    let cache_type = cache_type_from_u8(rb.read_u8().await?)?;
    let bounds = read_cache_cube(rb).await?;
    let size = rb.read_u64().await?;
    let profile = read_profiling_data(rb).await?;
    let last_access = rb.read_u64().await?;
    let access_count = rb.read_u64().await?;
    Ok(NodeCacheRef {
        semantic_id,
        entry_id,
        cache_type,
        bounds,
        size,
        profile,
        last_access,
        access_count,
    })
}

/// `HELLO`: what a node sends when its control connection registers.
pub fn write_node_handshake(wb: &mut WriteBuffer, h: &NodeHandshake) {
    wb.write_string(&h.host).write_u16(h.port);
    write_capacity(wb, &h.capacity);
    wb.write_u64(h.entries.len() as u64);
    for e in &h.entries {
        write_node_cache_ref(wb, e);
    }
}

pub async fn read_node_handshake<R: AsyncRead + Unpin>(
    rb: &mut ReadBuffer<'_, R>,
) -> Result<NodeHandshake> {
    let host = rb.read_string().await?;
    let port = rb.read_u16().await?;
    let capacity = read_capacity(rb).await?;
    let count = rb.read_count().await?;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        entries.push(read_node_cache_ref(rb).await?);
    }
    Ok(NodeHandshake {
        host,
        port,
        capacity,
        entries,
    })
}

pub fn write_node_entry_stats(wb: &mut WriteBuffer, s: &NodeEntryStats) {
    wb.write_u64(s.entry_id)
        .write_u64(s.last_access)
        .write_u64(s.access_count);
}

pub async fn read_node_entry_stats<R: AsyncRead + Unpin>(
    rb: &mut ReadBuffer<'_, R>,
) -> Result<NodeEntryStats> {
    Ok(NodeEntryStats {
        entry_id: rb.read_u64().await?,
        last_access: rb.read_u64().await?,
        access_count: rb.read_u64().await?,
    })
}

pub fn write_cache_stats(wb: &mut WriteBuffer, s: &CacheStats) {
    wb.write_u8(cache_type_to_u8(s.cache_type));
    wb.write_u64(s.entries.len() as u64);
    for (semantic_id, per_entry) in &s.entries {
        wb.write_string(semantic_id);
        wb.write_u64(per_entry.len() as u64);
        for e in per_entry {
            write_node_entry_stats(wb, e);
        }
    }
}

pub async fn read_cache_stats<R: AsyncRead + Unpin>(rb: &mut ReadBuffer<'_, R>) -> Result<CacheStats> {
    let cache_type = cache_type_from_u8(rb.read_u8().await?)?;
    let groups = rb.read_count().await?;
    let mut entries = std::collections::HashMap::with_capacity(groups);
    for _ in 0..groups {
        let semantic_id = rb.read_string().await?;
        let count = rb.read_count().await?;
        let mut stats = Vec::with_capacity(count);
        for _ in 0..count {
            stats.push(read_node_entry_stats(rb).await?);
        }
        entries.insert(semantic_id, stats);
    }
    Ok(CacheStats {
        cache_type,
        entries,
    })
}

/// Body of a `ControlReply::Stats` -- the answer to a `GET_STATS` request.
pub fn write_node_stats(wb: &mut WriteBuffer, s: &NodeStats) {
    write_capacity(wb, &s.capacity);
    wb.write_u64(s.stats.len() as u64);
    for cs in &s.stats {
        write_cache_stats(wb, cs);
    }
}

pub async fn read_node_stats<R: AsyncRead + Unpin>(rb: &mut ReadBuffer<'_, R>) -> Result<NodeStats> {
    let capacity = read_capacity(rb).await?;
    let count = rb.read_count().await?;
    let mut stats = Vec::with_capacity(count);
    for _ in 0..count {
        stats.push(read_cache_stats(rb).await?);
    }
    Ok(NodeStats { capacity, stats })
}

pub fn write_typed_key(wb: &mut WriteBuffer, k: &TypedNodeCacheKey) {
    wb.write_string(&k.key.semantic_id);
    wb.write_u64(k.key.entry_id);
    wb.write_u8(cache_type_to_u8(k.cache_type));
}

pub async fn read_typed_key<R: AsyncRead + Unpin>(
    rb: &mut ReadBuffer<'_, R>,
) -> Result<TypedNodeCacheKey> {
    let semantic_id = rb.read_string().await?;
    let entry_id = rb.read_u64().await?;
    let cache_type = cache_type_from_u8(rb.read_u8().await?)?;
    Ok(TypedNodeCacheKey {
        key: crate::model::NodeCacheKey::new(semantic_id, entry_id),
        cache_type,
    })
}

/// One reorganization directive: move an entry from one node to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Move {
    pub from_node: u32,
    pub to_node: u32,
    pub key: TypedNodeCacheKey,
}

/// `REORG` body: a set of moves the index pushes to a source control
/// connection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReorgDescription {
    pub moves: Vec<Move>,
}

pub fn write_reorg_description(wb: &mut WriteBuffer, r: &ReorgDescription) {
    wb.write_u64(r.moves.len() as u64);
    for m in &r.moves {
        wb.write_u32(m.from_node).write_u32(m.to_node);
        write_typed_key(wb, &m.key);
    }
}

pub async fn read_reorg_description<R: AsyncRead + Unpin>(
    rb: &mut ReadBuffer<'_, R>,
) -> Result<ReorgDescription> {
    let count = rb.read_count().await?;
    let mut moves = Vec::with_capacity(count);
    for _ in 0..count {
        let from_node = rb.read_u32().await?;
        let to_node = rb.read_u32().await?;
        let key = read_typed_key(rb).await?;
        moves.push(Move {
            from_node,
            to_node,
            key,
        });
    }
    Ok(ReorgDescription { moves })
}

/// A command the index pushes down an established control connection
/// (§4.7). Every command gets exactly one [`ControlReply`] in return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    GetStats,
    Reorg {
        description: ReorgDescription,
        /// Dialable address for every `to_node` named in `description`, so
        /// the receiving node can push moved entries without holding its
        /// own copy of the catalog.
        destinations: std::collections::HashMap<u32, ForeignRef>,
    },
}

pub fn write_control_command(wb: &mut WriteBuffer, cmd: &ControlCommand) {
    match cmd {
        ControlCommand::GetStats => {
            wb.write_u8(0);
        }
        ControlCommand::Reorg {
            description,
            destinations,
        } => {
            wb.write_u8(1);
            write_reorg_description(wb, description);
            wb.write_u64(destinations.len() as u64);
            for (node_id, foreign) in destinations {
                wb.write_u32(*node_id);
                write_foreign_ref(wb, foreign);
            }
        }
    }
}

pub async fn read_control_command<R: AsyncRead + Unpin>(
    rb: &mut ReadBuffer<'_, R>,
) -> Result<ControlCommand> {
    match rb.read_u8().await? {
        0 => Ok(ControlCommand::GetStats),
        1 => {
            let description = read_reorg_description(rb).await?;
            let count = rb.read_count().await?;
            let mut destinations = std::collections::HashMap::with_capacity(count);
            for _ in 0..count {
                let node_id = rb.read_u32().await?;
                let foreign = read_foreign_ref(rb).await?;
                destinations.insert(node_id, foreign);
            }
            Ok(ControlCommand::Reorg {
                description,
                destinations,
            })
        }
        other => Err(NetworkError::Framing(format!("bad control command tag {other}")).into()),
    }
}

/// A node's answer to a [`ControlCommand`]. `ReorgAck` echoes back only the
/// moves that were actually completed, which may be a subset of what was
/// asked for if an entry was already gone by the time the command arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlReply {
    Stats(NodeStats),
    ReorgAck(ReorgDescription),
}

pub fn write_control_reply(wb: &mut WriteBuffer, reply: &ControlReply) {
    match reply {
        ControlReply::Stats(stats) => {
            wb.write_u8(0);
            write_node_stats(wb, stats);
        }
        ControlReply::ReorgAck(description) => {
            wb.write_u8(1);
            write_reorg_description(wb, description);
        }
    }
}

pub async fn read_control_reply<R: AsyncRead + Unpin>(
    rb: &mut ReadBuffer<'_, R>,
) -> Result<ControlReply> {
    match rb.read_u8().await? {
        0 => Ok(ControlReply::Stats(read_node_stats(rb).await?)),
        1 => Ok(ControlReply::ReorgAck(read_reorg_description(rb).await?)),
        other => Err(NetworkError::Framing(format!("bad control reply tag {other}")).into()),
    }
}

/// Body of a `REORG` push connection: one relocated entry's payload and the
/// metadata the destination node needs to admit it straight into its store.
#[derive(Debug, Clone, PartialEq)]
pub struct ReorgPush {
    pub semantic_id: String,
    pub entry_id: u64,
    pub cache_type: CacheType,
    pub bounds: CacheCube,
    pub profile: ProfilingData,
    pub payload: Vec<u8>,
}

pub fn write_reorg_push(wb: &mut WriteBuffer, p: &ReorgPush) {
    wb.write_string(&p.semantic_id);
    wb.write_u64(p.entry_id);
    wb.write_u8(cache_type_to_u8(p.cache_type));
    write_cache_cube(wb, &p.bounds);
    write_profiling_data(wb, &p.profile);
    wb.write_blob(&p.payload);
}

pub async fn read_reorg_push<R: AsyncRead + Unpin>(rb: &mut ReadBuffer<'_, R>) -> Result<ReorgPush> {
    let semantic_id = rb.read_string().await?;
    let entry_id = rb.read_u64().await?;
    let cache_type = cache_type_from_u8(rb.read_u8().await?)?;
    let bounds = read_cache_cube(rb).await?;
    let profile = read_profiling_data(rb).await?;
    let payload = rb.read_blob().await?;
    Ok(ReorgPush {
        semantic_id,
        entry_id,
        cache_type,
        bounds,
        profile,
        payload,
    })
}

/// Ack sent back over a `REORG` push connection once the entry has been
/// admitted (or rejected) by the destination node's store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReorgPushAck {
    Ok,
    Error(String),
}

pub fn write_reorg_push_ack(wb: &mut WriteBuffer, ack: &ReorgPushAck) {
    match ack {
        ReorgPushAck::Ok => {
            wb.write_u8(0);
        }
        ReorgPushAck::Error(msg) => {
            wb.write_u8(1);
            wb.write_string(msg);
        }
    }
}

pub async fn read_reorg_push_ack<R: AsyncRead + Unpin>(
    rb: &mut ReadBuffer<'_, R>,
) -> Result<ReorgPushAck> {
    match rb.read_u8().await? {
        0 => Ok(ReorgPushAck::Ok),
        1 => Ok(ReorgPushAck::Error(rb.read_string().await?)),
        other => Err(NetworkError::Framing(format!("bad reorg push ack tag {other}")).into()),
    }
}

/// A request arriving on the client-facing frontend connection.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientRequest {
    pub request_type: RequestType,
    pub semantic_id: String,
    pub query: CacheCube,
}

pub fn write_client_request(wb: &mut WriteBuffer, r: &ClientRequest) {
    wb.write_u8(request_type_to_u8(r.request_type));
    wb.write_string(&r.semantic_id);
    write_cache_cube(wb, &r.query);
}

pub async fn read_client_request<R: AsyncRead + Unpin>(
    rb: &mut ReadBuffer<'_, R>,
) -> Result<ClientRequest> {
    let request_type = request_type_from_u8(rb.read_u8().await?)?;
    let semantic_id = rb.read_string().await?;
    let query = read_cache_cube(rb).await?;
    Ok(ClientRequest {
        request_type,
        semantic_id,
        query,
    })
}

/// Worker command issued by the index over a worker connection (§4.6).
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerCommand {
    CreateRaster {
        semantic_id: String,
        query: QueryCube,
    },
    DeliverRaster {
        semantic_id: String,
        query: QueryCube,
        cache_id: u64,
        query_mode: QueryMode,
    },
    PuzzleRaster {
        semantic_id: String,
        query: QueryCube,
        covered: crate::core::Cube3,
        remainder: Vec<crate::core::Cube3>,
        refs: Vec<CacheRef>,
        query_mode: QueryMode,
    },
}

fn write_cube3(wb: &mut WriteBuffer, c: &crate::core::Cube3) {
    for i in 0..3 {
        wb.write_f64(c.dim(i).a).write_f64(c.dim(i).b);
    }
}

async fn read_cube3<R: AsyncRead + Unpin>(rb: &mut ReadBuffer<'_, R>) -> Result<crate::core::Cube3> {
    let mut dims = [Interval::new(0.0, 0.0); 3];
    for d in &mut dims {
        *d = Interval::new(rb.read_f64().await?, rb.read_f64().await?);
    }
    Ok(crate::core::Cube3::new(dims))
}

pub fn write_worker_command(wb: &mut WriteBuffer, cmd: &WorkerCommand) {
    match cmd {
        WorkerCommand::CreateRaster { semantic_id, query } => {
            wb.write_u8(0);
            wb.write_string(semantic_id);
            write_query_cube(wb, query);
        }
        WorkerCommand::DeliverRaster {
            semantic_id,
            query,
            cache_id,
            query_mode,
        } => {
            wb.write_u8(1);
            wb.write_string(semantic_id);
            write_query_cube(wb, query);
            wb.write_u64(*cache_id);
            wb.write_u8(query_mode.to_u8());
        }
        WorkerCommand::PuzzleRaster {
            semantic_id,
            query,
            covered,
            remainder,
            refs,
            query_mode,
        } => {
            wb.write_u8(2);
            wb.write_string(semantic_id);
            write_query_cube(wb, query);
            write_cube3(wb, covered);
            wb.write_u64(remainder.len() as u64);
            for r in remainder {
                write_cube3(wb, r);
            }
            wb.write_u64(refs.len() as u64);
            for r in refs {
                write_cache_ref(wb, r);
            }
            wb.write_u8(query_mode.to_u8());
        }
    }
}

pub async fn read_worker_command<R: AsyncRead + Unpin>(
    rb: &mut ReadBuffer<'_, R>,
) -> Result<WorkerCommand> {
    match rb.read_u8().await? {
        0 => Ok(WorkerCommand::CreateRaster {
            semantic_id: rb.read_string().await?,
            query: read_query_cube(rb).await?,
        }),
        1 => {
            let semantic_id = rb.read_string().await?;
            let query = read_query_cube(rb).await?;
            let cache_id = rb.read_u64().await?;
            let query_mode = QueryMode::from_u8(rb.read_u8().await?)?;
            Ok(WorkerCommand::DeliverRaster {
                semantic_id,
                query,
                cache_id,
                query_mode,
            })
        }
        2 => {
            let semantic_id = rb.read_string().await?;
            let query = read_query_cube(rb).await?;
            let covered = read_cube3(rb).await?;
            let remainder_count = rb.read_count().await?;
            let mut remainder = Vec::with_capacity(remainder_count);
            for _ in 0..remainder_count {
                remainder.push(read_cube3(rb).await?);
            }
            let refs_count = rb.read_count().await?;
            let mut refs = Vec::with_capacity(refs_count);
            for _ in 0..refs_count {
                refs.push(read_cache_ref(rb).await?);
            }
            let query_mode = QueryMode::from_u8(rb.read_u8().await?)?;
            Ok(WorkerCommand::PuzzleRaster {
                semantic_id,
                query,
                covered,
                remainder,
                refs,
                query_mode,
            })
        }
        other => Err(NetworkError::Framing(format!("bad worker command tag {other}")).into()),
    }
}

/// Terminal or intermediate reply on a worker connection (§4.6, §7).
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerReply {
    Done(DeliveryResponse),
    Error(String),
    NewEntry(NodeCacheRef),
    RasterQueryRequested {
        semantic_id: String,
        query: QueryCube,
    },
}

pub fn write_worker_reply(wb: &mut WriteBuffer, reply: &WorkerReply) {
    match reply {
        WorkerReply::Done(d) => {
            wb.write_u8(0);
            write_delivery_response(wb, d);
        }
        WorkerReply::Error(msg) => {
            wb.write_u8(1);
            wb.write_string(msg);
        }
        WorkerReply::NewEntry(e) => {
            wb.write_u8(2);
            write_node_cache_ref(wb, e);
        }
        WorkerReply::RasterQueryRequested { semantic_id, query } => {
            wb.write_u8(3);
            wb.write_string(semantic_id);
            write_query_cube(wb, query);
        }
    }
}

pub async fn read_worker_reply<R: AsyncRead + Unpin>(
    rb: &mut ReadBuffer<'_, R>,
) -> Result<WorkerReply> {
    match rb.read_u8().await? {
        0 => Ok(WorkerReply::Done(read_delivery_response(rb).await?)),
        1 => Ok(WorkerReply::Error(rb.read_string().await?)),
        2 => Ok(WorkerReply::NewEntry(read_node_cache_ref(rb).await?)),
        3 => Ok(WorkerReply::RasterQueryRequested {
            semantic_id: rb.read_string().await?,
            query: read_query_cube(rb).await?,
        }),
        other => Err(NetworkError::Framing(format!("bad worker reply tag {other}")).into()),
    }
}

/// The index's answer to a worker's recursive sub-query during a puzzle
/// (§4.6, §4.7).
#[derive(Debug, Clone, PartialEq)]
pub enum SubqueryReply {
    Hit(CacheRef),
    PartialHit {
        covered: crate::core::Cube3,
        remainder: Vec<crate::core::Cube3>,
        refs: Vec<CacheRef>,
    },
    Miss,
}

pub fn write_subquery_reply(wb: &mut WriteBuffer, reply: &SubqueryReply) {
    match reply {
        SubqueryReply::Hit(r) => {
            wb.write_u8(0);
            write_cache_ref(wb, r);
        }
        SubqueryReply::PartialHit {
            covered,
            remainder,
            refs,
        } => {
            wb.write_u8(1);
            write_cube3(wb, covered);
            wb.write_u64(remainder.len() as u64);
            for r in remainder {
                write_cube3(wb, r);
            }
            wb.write_u64(refs.len() as u64);
            for r in refs {
                write_cache_ref(wb, r);
            }
        }
        SubqueryReply::Miss => {
            wb.write_u8(2);
        }
    }
}

pub async fn read_subquery_reply<R: AsyncRead + Unpin>(
    rb: &mut ReadBuffer<'_, R>,
) -> Result<SubqueryReply> {
    match rb.read_u8().await? {
        0 => Ok(SubqueryReply::Hit(read_cache_ref(rb).await?)),
        1 => {
            let covered = read_cube3(rb).await?;
            let remainder_count = rb.read_count().await?;
            let mut remainder = Vec::with_capacity(remainder_count);
            for _ in 0..remainder_count {
                remainder.push(read_cube3(rb).await?);
            }
            let refs_count = rb.read_count().await?;
            let mut refs = Vec::with_capacity(refs_count);
            for _ in 0..refs_count {
                refs.push(read_cache_ref(rb).await?);
            }
            Ok(SubqueryReply::PartialHit {
                covered,
                remainder,
                refs,
            })
        }
        2 => Ok(SubqueryReply::Miss),
        other => Err(NetworkError::Framing(format!("bad subquery reply tag {other}")).into()),
    }
}

/// Build a [`CatalogEntry`] from a handshake's [`NodeCacheRef`] and the
/// node id the index assigned to the registering control connection.
pub fn catalog_entry_from_handshake(node_id: u32, entry: NodeCacheRef) -> CatalogEntry {
    entry.into_catalog_entry(node_id)
}

/// What a delivery connection asks for: either the ephemeral id minted for
/// one client/puzzle transfer, or a direct fetch of a still-cached entry (a
/// puzzle worker pulling a reference from a peer node).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryRequest {
    ByDeliveryId(uuid::Uuid),
    ByEntry {
        cache_type: CacheType,
        semantic_id: String,
        entry_id: u64,
    },
}

pub fn write_delivery_request(wb: &mut WriteBuffer, req: &DeliveryRequest) {
    match req {
        DeliveryRequest::ByDeliveryId(id) => {
            wb.write_u8(0);
            wb.write_blob(id.as_bytes());
        }
        DeliveryRequest::ByEntry {
            cache_type,
            semantic_id,
            entry_id,
        } => {
            wb.write_u8(1);
            wb.write_u8(cache_type_to_u8(*cache_type));
            wb.write_string(semantic_id);
            wb.write_u64(*entry_id);
        }
    }
}

pub async fn read_delivery_request<R: AsyncRead + Unpin>(
    rb: &mut ReadBuffer<'_, R>,
) -> Result<DeliveryRequest> {
    match rb.read_u8().await? {
        0 => {
            let bytes = rb.read_blob().await?;
            let array: [u8; 16] = bytes
                .try_into()
                .map_err(|_| Error::from(NetworkError::Framing("delivery id is not 16 bytes".into())))?;
            Ok(DeliveryRequest::ByDeliveryId(uuid::Uuid::from_bytes(array)))
        }
        1 => Ok(DeliveryRequest::ByEntry {
            cache_type: cache_type_from_u8(rb.read_u8().await?)?,
            semantic_id: rb.read_string().await?,
            entry_id: rb.read_u64().await?,
        }),
        other => Err(NetworkError::Framing(format!("bad delivery request tag {other}")).into()),
    }
}

/// Reply streamed back over a delivery connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryReply {
    Found(Vec<u8>),
    NotFound,
}

pub fn write_delivery_reply(wb: &mut WriteBuffer, reply: &DeliveryReply) {
    match reply {
        DeliveryReply::Found(bytes) => {
            wb.write_u8(0);
            wb.write_blob(bytes);
        }
        DeliveryReply::NotFound => {
            wb.write_u8(1);
        }
    }
}

pub async fn read_delivery_reply<R: AsyncRead + Unpin>(
    rb: &mut ReadBuffer<'_, R>,
) -> Result<DeliveryReply> {
    match rb.read_u8().await? {
        0 => Ok(DeliveryReply::Found(rb.read_blob().await?)),
        1 => Ok(DeliveryReply::NotFound),
        other => Err(NetworkError::Framing(format!("bad delivery reply tag {other}")).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Interval;

    #[tokio::test]
    async fn query_cube_round_trips() {
        let q = QueryCube::new(
            Interval::new(0.0, 10.0),
            Interval::new(0.0, 10.0),
            Interval::new(0.0, 1.0),
            4326,
            0,
        );
        let mut wb = WriteBuffer::new();
        write_query_cube(&mut wb, &q);
        let mut wire = Vec::new();
        wb.flush(&mut wire).await.unwrap();

        let mut cursor = std::io::Cursor::new(wire);
        let mut rb = ReadBuffer::new(&mut cursor);
        let decoded = read_query_cube(&mut rb).await.unwrap();
        assert_eq!(decoded, q);
    }

    #[tokio::test]
    async fn unknown_magic_is_rejected() {
        assert!(ConnectionRole::from_magic(0xdead_beef).is_err());
    }

    #[tokio::test]
    async fn client_request_round_trips() {
        let req = ClientRequest {
            request_type: RequestType::Raster,
            semantic_id: "sem".to_string(),
            query: CacheCube::new(
                QueryCube::new(
                    Interval::new(0.0, 1.0),
                    Interval::new(0.0, 1.0),
                    Interval::new(0.0, 1.0),
                    4326,
                    0,
                ),
                ResolutionInfo::raster(1.0, 1.0),
            ),
        };
        let mut wb = WriteBuffer::new();
        write_client_request(&mut wb, &req);
        let mut wire = Vec::new();
        wb.flush(&mut wire).await.unwrap();

        let mut cursor = std::io::Cursor::new(wire);
        let mut rb = ReadBuffer::new(&mut cursor);
        let decoded = read_client_request(&mut rb).await.unwrap();
        assert_eq!(decoded, req);
    }

    #[tokio::test]
    async fn control_command_reorg_round_trips() {
        let mut destinations = std::collections::HashMap::new();
        destinations.insert(
            7,
            ForeignRef {
                host: "10.0.0.2".to_string(),
                port: 9100,
            },
        );
        let cmd = ControlCommand::Reorg {
            description: ReorgDescription {
                moves: vec![Move {
                    from_node: 3,
                    to_node: 7,
                    key: TypedNodeCacheKey {
                        key: crate::model::NodeCacheKey::new("sem".to_string(), 42),
                        cache_type: CacheType::Raster,
                    },
                }],
            },
            destinations,
        };
        let mut wb = WriteBuffer::new();
        write_control_command(&mut wb, &cmd);
        let mut wire = Vec::new();
        wb.flush(&mut wire).await.unwrap();

        let mut cursor = std::io::Cursor::new(wire);
        let mut rb = ReadBuffer::new(&mut cursor);
        let decoded = read_control_command(&mut rb).await.unwrap();
        assert_eq!(decoded, cmd);
    }

    #[tokio::test]
    async fn control_reply_get_stats_round_trips() {
        let reply = ControlReply::Stats(NodeStats {
            capacity: Capacity::default(),
            stats: Vec::new(),
        });
        let mut wb = WriteBuffer::new();
        write_control_reply(&mut wb, &reply);
        let mut wire = Vec::new();
        wb.flush(&mut wire).await.unwrap();

        let mut cursor = std::io::Cursor::new(wire);
        let mut rb = ReadBuffer::new(&mut cursor);
        let decoded = read_control_reply(&mut rb).await.unwrap();
        assert_eq!(decoded, reply);
    }

    #[tokio::test]
    async fn reorg_push_round_trips() {
        let push = ReorgPush {
            semantic_id: "sem/moved".to_string(),
            entry_id: 42,
            cache_type: CacheType::Raster,
            bounds: CacheCube::new(
                QueryCube::new(
                    Interval::new(0.0, 1.0),
                    Interval::new(0.0, 1.0),
                    Interval::new(0.0, 1.0),
                    4326,
                    0,
                ),
                ResolutionInfo::raster(1.0, 1.0),
            ),
            profile: ProfilingData {
                own_cpu: 1.0,
                own_gpu: 0.0,
                own_io: 0.0,
                subtree_cpu: 1.0,
                subtree_gpu: 0.0,
                subtree_io: 0.0,
                uncached_cpu: 0.0,
                uncached_gpu: 0.0,
                uncached_io: 0.0,
            },
            payload: vec![1, 2, 3, 4],
        };
        let mut wb = WriteBuffer::new();
        write_reorg_push(&mut wb, &push);
        let mut wire = Vec::new();
        wb.flush(&mut wire).await.unwrap();

        let mut cursor = std::io::Cursor::new(wire);
        let mut rb = ReadBuffer::new(&mut cursor);
        let decoded = read_reorg_push(&mut rb).await.unwrap();
        assert_eq!(decoded, push);
    }

    #[tokio::test]
    async fn reorg_role_magic_round_trips() {
        assert_eq!(ConnectionRole::from_magic(magic::REORG).unwrap(), ConnectionRole::Reorg);
        assert_eq!(ConnectionRole::Reorg.magic(), magic::REORG);
    }
}
