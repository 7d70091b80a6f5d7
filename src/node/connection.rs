//! Outbound connections a node opens to the index (control, worker) and
//! inbound connections it serves on its own listening port (delivery, the
//! rare local client shortcut).

use crate::error::{Error, NetworkError, Result};
use crate::model::{CacheRef, CacheType, ForeignRef, NodeHandshake};
use crate::net::framing::{ReadBuffer, WriteBuffer};
use crate::net::protocol::{
    self, magic, ConnectionRole, ControlCommand, ControlReply, DeliveryReply, DeliveryRequest,
    Move, ReorgDescription, ReorgPush, ReorgPushAck, WorkerReply,
};
use crate::node::state::NodeState;
use crate::node::worker;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

/// Dial the index's node port, send `HELLO`, and return the still-open
/// socket plus the node id the index assigned. The control connection's
/// lifetime *is* this node's registration: once the socket drops, the
/// index discards its shadow catalog entries and any node id it handed out
/// is no longer valid.
pub async fn dial_control(index_addr: &(String, u16), state: &NodeState) -> Result<(TcpStream, u32)> {
    let mut socket = TcpStream::connect((index_addr.0.as_str(), index_addr.1))
        .await
        .map_err(NetworkError::Io)?;

    let mut wb = WriteBuffer::new();
    wb.write_u32(magic::CONTROL);
    wb.flush(&mut socket).await?;

    let handshake = NodeHandshake {
        host: state.self_ref().host,
        port: state.self_ref().port,
        capacity: state.capacity_report(),
        entries: state.handshake_entries(),
    };
    let mut wb = WriteBuffer::new();
    protocol::write_node_handshake(&mut wb, &handshake);
    wb.flush(&mut socket).await?;

    let node_id = {
        let mut rb = ReadBuffer::new(&mut socket);
        rb.read_u32().await?
    };
    Ok((socket, node_id))
}

/// Loop over an already-registered control socket: read one
/// [`ControlCommand`] the index sends, answer it, write back the matching
/// [`ControlReply`], until the socket errors.
pub async fn run_control_session(mut socket: TcpStream, node_id: u32, state: &NodeState) -> Result<()> {
    loop {
        let command = {
            let mut rb = ReadBuffer::new(&mut socket);
            protocol::read_control_command(&mut rb).await?
        };
        let reply = match command {
            ControlCommand::GetStats => ControlReply::Stats(state.stats_report()),
            ControlCommand::Reorg { description, destinations } => {
                handle_reorg(state, node_id, description, destinations).await
            }
        };
        let mut wb = WriteBuffer::new();
        protocol::write_control_reply(&mut wb, &reply);
        wb.flush(&mut socket).await?;
    }
}

/// Carry out every move in `description` that names this node as the
/// source, concurrently, and report back the subset that actually
/// completed.
async fn handle_reorg(
    state: &NodeState,
    node_id: u32,
    description: ReorgDescription,
    destinations: HashMap<u32, ForeignRef>,
) -> ControlReply {
    let mine: Vec<Move> = description
        .moves
        .into_iter()
        .filter(|mv| mv.from_node == node_id)
        .collect();

    let outcomes = futures::future::join_all(mine.into_iter().map(|mv| {
        let destinations = &destinations;
        async move {
            match relocate_entry(state, &mv, destinations).await {
                Ok(()) => Some(mv),
                Err(e) => {
                    warn!(error = %e, entry_id = mv.key.key.entry_id, "reorg move failed");
                    None
                }
            }
        }
    }))
    .await;

    ControlReply::ReorgAck(ReorgDescription {
        moves: outcomes.into_iter().flatten().collect(),
    })
}

/// Fetch a moved entry's payload, push it to its destination node, then
/// evict the local copy once the destination has confirmed it landed.
async fn relocate_entry(state: &NodeState, mv: &Move, destinations: &HashMap<u32, ForeignRef>) -> Result<()> {
    let dest = destinations
        .get(&mv.to_node)
        .ok_or_else(|| NetworkError::Framing("reorg move has no destination address".to_string()))?;
    let store = state.store_for(mv.key.cache_type);
    let (payload, meta) = store.get(mv.key.key.entry_id)?;
    push_entry_to_node(
        dest,
        &mv.key.key.semantic_id,
        mv.key.cache_type,
        mv.key.key.entry_id,
        meta.bounds,
        meta.profile,
        (*payload).clone(),
    )
    .await?;
    store.remove(mv.key.key.entry_id)
}

/// Dial a peer node directly and push one relocated entry onto it.
async fn push_entry_to_node(
    dest: &ForeignRef,
    semantic_id: &str,
    cache_type: CacheType,
    entry_id: u64,
    bounds: crate::model::CacheCube,
    profile: crate::model::ProfilingData,
    payload: Vec<u8>,
) -> Result<()> {
    let mut socket = TcpStream::connect((dest.host.as_str(), dest.port))
        .await
        .map_err(NetworkError::Io)?;

    let mut wb = WriteBuffer::new();
    wb.write_u32(magic::REORG);
    protocol::write_reorg_push(
        &mut wb,
        &ReorgPush {
            semantic_id: semantic_id.to_string(),
            cache_type,
            bounds,
            profile,
            payload,
            entry_id,
        },
    );
    wb.flush(&mut socket).await?;

    let ack = {
        let mut rb = ReadBuffer::new(&mut socket);
        protocol::read_reorg_push_ack(&mut rb).await?
    };
    match ack {
        ReorgPushAck::Ok => Ok(()),
        ReorgPushAck::Error(message) => Err(Error::Worker(message)),
    }
}

/// Dial the index's node port as a worker, then loop: read one
/// `WorkerCommand`, execute it, write back whatever replies it produces.
pub async fn run_worker_connection(index_addr: &(String, u16), node_id: u32, state: &NodeState) -> Result<()> {
    let mut socket = TcpStream::connect((index_addr.0.as_str(), index_addr.1))
        .await
        .map_err(NetworkError::Io)?;

    let mut wb = WriteBuffer::new();
    wb.write_u32(magic::WORKER);
    wb.write_u32(node_id);
    wb.flush(&mut socket).await?;

    loop {
        let command = {
            let mut rb = ReadBuffer::new(&mut socket);
            protocol::read_worker_command(&mut rb).await?
        };
        worker::execute_command(&mut socket, state, command).await?;
    }
}

/// Write one `WorkerReply` and flush.
pub(crate) async fn write_reply(socket: &mut TcpStream, reply: &WorkerReply) -> Result<()> {
    let mut wb = WriteBuffer::new();
    protocol::write_worker_reply(&mut wb, reply);
    wb.flush(socket).await
}

/// Fetch a still-cached entry from a peer node's delivery port, the path a
/// puzzle worker uses to pull a reference it doesn't itself hold.
pub(crate) async fn fetch_remote_raster(cache_ref: &CacheRef, semantic_id: &str) -> Result<Vec<u8>> {
    let mut socket = TcpStream::connect((cache_ref.foreign.host.as_str(), cache_ref.foreign.port))
        .await
        .map_err(NetworkError::Io)?;

    let mut wb = WriteBuffer::new();
    wb.write_u32(magic::DELIVERY);
    protocol::write_delivery_request(
        &mut wb,
        &DeliveryRequest::ByEntry {
            cache_type: CacheType::Raster,
            semantic_id: semantic_id.to_string(),
            entry_id: cache_ref.entry_id,
        },
    );
    wb.flush(&mut socket).await?;

    let reply = {
        let mut rb = ReadBuffer::new(&mut socket);
        protocol::read_delivery_reply(&mut rb).await?
    };
    match reply {
        DeliveryReply::Found(bytes) => Ok(bytes),
        DeliveryReply::NotFound => Err(crate::error::Error::NotFound(format!(
            "entry {} not found on {}:{}",
            cache_ref.entry_id, cache_ref.foreign.host, cache_ref.foreign.port
        ))),
    }
}

/// Accept loop for this node's own listening port: delivery pulls (by
/// ephemeral id or by entry) and the rare local client shortcut.
pub async fn run_delivery_listener(listener: TcpListener, state: Arc<NodeState>) {
    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "delivery listener accept failed");
                continue;
            }
        };
        debug!(%peer, "accepted node-port connection");
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_inbound(socket, &state).await {
                debug!(error = %e, %peer, "node-port connection ended");
            }
        });
    }
}

async fn handle_inbound(mut socket: TcpStream, state: &NodeState) -> Result<()> {
    let role = {
        use tokio::io::AsyncReadExt;
        let magic = socket.read_u32_le().await.map_err(NetworkError::Io)?;
        ConnectionRole::from_magic(magic)?
    };

    match role {
        ConnectionRole::Delivery => {
            let request = {
                let mut rb = ReadBuffer::new(&mut socket);
                protocol::read_delivery_request(&mut rb).await?
            };
            let payload = match request {
                DeliveryRequest::ByDeliveryId(id) => state.take_delivery(&id),
                DeliveryRequest::ByEntry { cache_type, entry_id, .. } => {
                    state.store_for(cache_type).get(entry_id).ok().map(|(bytes, _)| bytes)
                }
            };
            let reply = match payload {
                Some(bytes) => DeliveryReply::Found((*bytes).clone()),
                None => DeliveryReply::NotFound,
            };
            let mut wb = WriteBuffer::new();
            protocol::write_delivery_reply(&mut wb, &reply);
            wb.flush(&mut socket).await
        }
        ConnectionRole::Client => {
            // Local shortcut: a client on the same host as a node may dial
            // it directly and skip the index entirely. Rarely exercised in
            // practice since the cache manager normally goes through the
            // frontend connection, but the wire role exists for it.
            let request = {
                let mut rb = ReadBuffer::new(&mut socket);
                protocol::read_client_request(&mut rb).await?
            };
            let output = state.operator.evaluate(&request.semantic_id, &request.query.query).await?;
            let mut wb = WriteBuffer::new();
            protocol::write_delivery_reply(&mut wb, &DeliveryReply::Found(output.bytes));
            wb.flush(&mut socket).await
        }
        ConnectionRole::Reorg => {
            let push = {
                let mut rb = ReadBuffer::new(&mut socket);
                protocol::read_reorg_push(&mut rb).await?
            };
            let ack = match state.store_for(push.cache_type).put_with_id(
                push.entry_id,
                push.semantic_id,
                push.payload,
                push.bounds,
                push.profile,
            ) {
                Ok(()) => ReorgPushAck::Ok,
                Err(e) => ReorgPushAck::Error(e.to_string()),
            };
            let mut wb = WriteBuffer::new();
            protocol::write_reorg_push_ack(&mut wb, &ack);
            wb.flush(&mut socket).await
        }
        ConnectionRole::Control | ConnectionRole::Worker => Err(NetworkError::Framing(
            "control/worker roles dial out, they never arrive on a node's own port".to_string(),
        )
        .into()),
    }
}
