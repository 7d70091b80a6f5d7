//! Per-connection tasks for the index server's two listening ports.
//!
//! Each accepted socket becomes one lightweight tokio task that only knows
//! how to decode its own protocol and forward decoded events to the single
//! [`super::server::IndexCore`] actor task, which owns the catalog and
//! scheduler exclusively -- the tokio equivalent of "the Index's catalog is
//! accessed only by the reactor thread and needs no lock" (§5).

use crate::error::Result;
use crate::model::{Capacity, DeliveryResponse, NodeCacheRef, QueryCube};
use crate::net::framing::{ReadBuffer, WriteBuffer};
use crate::net::protocol::{
    self, ClientRequest, ConnectionRole, ControlCommand, ControlReply, Move, NodeStats,
    SubqueryReply, WorkerCommand, WorkerReply,
};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

/// Outcome of a scheduled job, reported back to the client task.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Delivered(DeliveryResponse),
    Failed(String),
}

/// Messages the per-connection tasks send into the [`super::server::IndexCore`]
/// actor.
pub enum IndexMessage {
    ClientRequest {
        request: ClientRequest,
        respond: oneshot::Sender<JobOutcome>,
    },
    WorkerConnected {
        node_id: u32,
        conn_id: u64,
        command_tx: mpsc::Sender<WorkerCommand>,
    },
    WorkerReply {
        node_id: u32,
        conn_id: u64,
        reply: WorkerReply,
    },
    WorkerDisconnected {
        conn_id: u64,
    },
    ControlConnected {
        host: String,
        port: u16,
        capacity: Capacity,
        entries: Vec<NodeCacheRef>,
        command_tx: mpsc::Sender<ControlCommand>,
        respond: oneshot::Sender<u32>,
    },
    ControlStatsReply {
        node_id: u32,
        stats: NodeStats,
    },
    /// A node's answer to a `REORG` command: the moves it actually carried
    /// out, which the catalog can now treat as authoritative.
    ControlReorgAck {
        node_id: u32,
        moves: Vec<Move>,
    },
    ControlDisconnected {
        node_id: u32,
    },
    /// A worker mid-command asked the index to resolve a raster sub-query
    /// (`RASTER_QUERY_REQUESTED`), blocking that worker connection until
    /// answered.
    SubqueryRequest {
        semantic_id: String,
        query: QueryCube,
        respond: oneshot::Sender<SubqueryReply>,
    },
    Tick,
}

/// Handle the client-facing frontend connection: read one request, forward
/// it to the core, write back whatever it decides.
pub async fn handle_client_connection(
    mut socket: TcpStream,
    core: mpsc::Sender<IndexMessage>,
) -> Result<()> {
    let request = {
        let mut rb = ReadBuffer::new(&mut socket);
        protocol::read_client_request(&mut rb).await?
    };

    let (respond, wait) = oneshot::channel();
    if core
        .send(IndexMessage::ClientRequest { request, respond })
        .await
        .is_err()
    {
        return Ok(());
    }

    let outcome = wait.await.unwrap_or(JobOutcome::Failed(
        "index shut down before the job completed".to_string(),
    ));

    let mut wb = WriteBuffer::new();
    match outcome {
        JobOutcome::Delivered(delivery) => {
            wb.write_u8(0);
            protocol::write_delivery_response(&mut wb, &delivery);
        }
        JobOutcome::Failed(message) => {
            wb.write_u8(1);
            wb.write_string(&message);
        }
    }
    wb.flush(&mut socket).await?;
    Ok(())
}

/// Handle a worker connection from a node: relay commands from the core to
/// the socket and replies from the socket back to the core, until the
/// socket errors (marking the connection faulty).
pub async fn handle_worker_connection(
    mut socket: TcpStream,
    node_id: u32,
    conn_id: u64,
    core: mpsc::Sender<IndexMessage>,
) {
    let (command_tx, mut command_rx) = mpsc::channel::<WorkerCommand>(8);
    if core
        .send(IndexMessage::WorkerConnected {
            node_id,
            conn_id,
            command_tx,
        })
        .await
        .is_err()
    {
        return;
    }

    'outer: while let Some(command) = command_rx.recv().await {
        let mut wb = WriteBuffer::new();
        protocol::write_worker_command(&mut wb, &command);
        if wb.flush(&mut socket).await.is_err() {
            break;
        }

        // A puzzle worker command can cycle through any number of
        // RASTER_QUERY_REQUESTED/subquery-reply round trips before its
        // terminal DONE/ERROR/NEW_ENTRY reply.
        loop {
            let reply = {
                let mut rb = ReadBuffer::new(&mut socket);
                protocol::read_worker_reply(&mut rb).await
            };
            let reply = match reply {
                Ok(reply) => reply,
                Err(_) => break 'outer,
            };

            if let WorkerReply::RasterQueryRequested { semantic_id, query } = reply {
                let (respond, wait) = oneshot::channel();
                if core
                    .send(IndexMessage::SubqueryRequest {
                        semantic_id,
                        query,
                        respond,
                    })
                    .await
                    .is_err()
                {
                    break 'outer;
                }
                let subquery_reply = wait.await.unwrap_or(SubqueryReply::Miss);
                let mut wb = WriteBuffer::new();
                protocol::write_subquery_reply(&mut wb, &subquery_reply);
                if wb.flush(&mut socket).await.is_err() {
                    break 'outer;
                }
                continue;
            }

            let terminal = matches!(reply, WorkerReply::Done(_) | WorkerReply::Error(_));
            if core
                .send(IndexMessage::WorkerReply { node_id, conn_id, reply })
                .await
                .is_err()
            {
                break 'outer;
            }
            if terminal {
                break;
            }
        }
    }

    let _ = core.send(IndexMessage::WorkerDisconnected { conn_id }).await;
}

/// Handle a control connection from a node: `HELLO` handshake, acknowledge
/// with the assigned node id, then relay [`ControlCommand`]s from the core
/// to the socket and the node's [`ControlReply`] back to the core -- the
/// same request/reply shape as [`handle_worker_connection`], just driven by
/// the index's tick rather than a client request.
pub async fn handle_control_connection(mut socket: TcpStream, core: mpsc::Sender<IndexMessage>) -> Result<()> {
    let handshake = {
        let mut rb = ReadBuffer::new(&mut socket);
        protocol::read_node_handshake(&mut rb).await?
    };

    let (command_tx, mut command_rx) = mpsc::channel::<ControlCommand>(8);
    let (respond, wait) = oneshot::channel();
    if core
        .send(IndexMessage::ControlConnected {
            host: handshake.host,
            port: handshake.port,
            capacity: handshake.capacity,
            entries: handshake.entries,
            command_tx,
            respond,
        })
        .await
        .is_err()
    {
        return Ok(());
    }
    let node_id = wait.await.unwrap_or(0);

    let mut wb = WriteBuffer::new();
    wb.write_u32(node_id);
    wb.flush(&mut socket).await?;

    while let Some(command) = command_rx.recv().await {
        let mut wb = WriteBuffer::new();
        protocol::write_control_command(&mut wb, &command);
        if wb.flush(&mut socket).await.is_err() {
            break;
        }

        let reply = {
            let mut rb = ReadBuffer::new(&mut socket);
            protocol::read_control_reply(&mut rb).await
        };
        let reply = match reply {
            Ok(reply) => reply,
            Err(_) => break,
        };

        let forwarded = match reply {
            ControlReply::Stats(stats) => {
                core.send(IndexMessage::ControlStatsReply { node_id, stats }).await
            }
            ControlReply::ReorgAck(description) => {
                core.send(IndexMessage::ControlReorgAck {
                    node_id,
                    moves: description.moves,
                })
                .await
            }
        };
        if forwarded.is_err() {
            break;
        }
    }

    let _ = core.send(IndexMessage::ControlDisconnected { node_id }).await;
    Ok(())
}

/// 4-byte role header every node-port connection starts with.
pub async fn read_role(socket: &mut TcpStream) -> Result<ConnectionRole> {
    use tokio::io::AsyncReadExt;
    let magic = socket.read_u32_le().await.map_err(crate::error::NetworkError::Io)?;
    ConnectionRole::from_magic(magic)
}
