//! The index server (C7): two listening ports, the shadow catalog, and the
//! single actor task that owns both plus the job scheduler.
//!
//! Nodes dial *into* the node-port as `Control` (one per node, registering
//! via `HELLO`) and `Worker` (one per `nodeserver.threads`, used by the
//! index to push commands) -- this direction of dialing is grounded in the
//! reference index server's handshake dispatch, which reads a node id off
//! worker connections and assigns one to registering control connections.
//! Clients dial into the frontend port with one request per connection.

use crate::config::Config;
use crate::index::catalog::Catalog;
use crate::index::connection::{self, IndexMessage, JobOutcome};
use crate::index::reorg;
use crate::index::scheduler::{JobKind, Scheduler, WorkerState};
use crate::model::{CacheType, ForeignRef, RequestType};
use crate::net::protocol::{self, ConnectionRole, ControlCommand, Move, SubqueryReply, WorkerCommand, WorkerReply};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

fn request_type_to_cache_type(t: RequestType) -> CacheType {
    match t {
        RequestType::Raster => CacheType::Raster,
        RequestType::Points => CacheType::Point,
        RequestType::Lines => CacheType::Line,
        RequestType::Polygons => CacheType::Polygon,
        RequestType::Plot => CacheType::Plot,
    }
}

struct WorkerHandle {
    node_id: u32,
    command_tx: mpsc::Sender<WorkerCommand>,
}

/// Per in-flight job bookkeeping the actor needs once a worker replies.
struct InFlight {
    client_conn_id: u64,
    respond: oneshot::Sender<JobOutcome>,
}

/// Owns the catalog, scheduler and worker/client bookkeeping. Runs as a
/// single task; every mutation goes through its message loop, so -- as in
/// the reference reactor -- no lock is needed around catalog access.
pub struct IndexCore {
    catalog: Arc<Catalog>,
    scheduler: Scheduler,
    workers: HashMap<u64, WorkerHandle>,
    worker_states: HashMap<u64, WorkerState>,
    in_flight: HashMap<u64, InFlight>,
    in_flight_by_worker: HashMap<u64, u64>,
    next_conn_id: u64,
    reorg_strategy: Box<dyn reorg::ReorgStrategy>,
    /// One control-command channel per registered node, keyed by node id.
    controls: HashMap<u32, mpsc::Sender<ControlCommand>>,
    /// Nodes still owed a fresh `GET_STATS` reply before the in-flight tick
    /// can compute a reorganization plan. `None` when no round is running.
    stats_round: Option<HashSet<u32>>,
}

impl IndexCore {
    pub fn new(catalog: Arc<Catalog>, reorg_kind: crate::config::ReorgStrategyKind) -> Self {
        Self {
            catalog,
            scheduler: Scheduler::new(),
            workers: HashMap::new(),
            worker_states: HashMap::new(),
            in_flight: HashMap::new(),
            in_flight_by_worker: HashMap::new(),
            next_conn_id: 1,
            reorg_strategy: reorg::from_config(reorg_kind),
            controls: HashMap::new(),
            stats_round: None,
        }
    }

    fn fresh_conn_id(&mut self) -> u64 {
        let id = self.next_conn_id;
        self.next_conn_id += 1;
        id
    }

    pub async fn run(mut self, mut rx: mpsc::Receiver<IndexMessage>) {
        while let Some(message) = rx.recv().await {
            self.handle(message);
            self.run_scheduling_pass();
        }
    }

    fn handle(&mut self, message: IndexMessage) {
        match message {
            IndexMessage::ClientRequest { request, respond } => {
                self.handle_client_request(request, respond);
            }
            IndexMessage::WorkerConnected {
                node_id,
                conn_id,
                command_tx,
            } => {
                self.workers.insert(conn_id, WorkerHandle { node_id, command_tx });
                self.worker_states.insert(conn_id, WorkerState::Idle);
                info!(node_id, conn_id, "worker connected");
            }
            IndexMessage::WorkerReply { conn_id, reply, .. } => {
                self.handle_worker_reply(conn_id, reply);
            }
            IndexMessage::WorkerDisconnected { conn_id } => {
                self.handle_worker_faulty(conn_id);
            }
            IndexMessage::ControlConnected {
                host,
                port,
                capacity,
                entries,
                command_tx,
                respond,
            } => {
                let node_id = self.catalog.register_node(host, port);
                self.catalog.seed_from_handshake(node_id, capacity, entries);
                self.controls.insert(node_id, command_tx);
                let _ = respond.send(node_id);
                info!(node_id, "node registered");
            }
            IndexMessage::ControlStatsReply { node_id, stats } => {
                self.catalog.set_capacity(node_id, stats.capacity);
                self.advance_stats_round(node_id);
            }
            IndexMessage::ControlReorgAck { node_id, moves } => {
                for mv in moves {
                    self.catalog.reassign(mv.key.cache_type, &mv.key.key, mv.to_node);
                }
                info!(node_id, "reorganization moves acknowledged");
            }
            IndexMessage::ControlDisconnected { node_id } => {
                warn!(node_id, "control connection lost, cleaning catalog");
                self.catalog.remove_node(node_id);
                self.controls.remove(&node_id);
                self.reschedule_jobs_on_node(node_id);
                self.advance_stats_round(node_id);
            }
            IndexMessage::SubqueryRequest {
                semantic_id,
                query,
                respond,
            } => {
                let reply = self.answer_subquery(&semantic_id, query);
                let _ = respond.send(reply);
            }
            IndexMessage::Tick => {
                self.start_stats_round();
            }
        }
    }

    /// Kick off a fresh `GET_STATS` round if none is already running: ask
    /// every registered node for current capacity before planning a move,
    /// matching the request/reply GET_STATS contract rather than acting on
    /// whatever stats happened to arrive last.
    fn start_stats_round(&mut self) {
        if self.stats_round.is_some() || self.controls.is_empty() {
            return;
        }
        let targets: Vec<u32> = self.controls.keys().copied().collect();
        self.stats_round = Some(targets.iter().copied().collect());
        for node_id in targets {
            if let Some(tx) = self.controls.get(&node_id) {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let _ = tx.send(ControlCommand::GetStats).await;
                });
            }
        }
    }

    /// Mark `node_id` as having answered (or dropped out of) the current
    /// stats round; once every target has reported in, compute and dispatch
    /// the reorganization plan.
    fn advance_stats_round(&mut self, node_id: u32) {
        let round_complete = match &mut self.stats_round {
            Some(remaining) => {
                remaining.remove(&node_id);
                remaining.is_empty()
            }
            None => false,
        };
        if round_complete {
            self.stats_round = None;
            self.dispatch_reorg_plan();
        }
    }

    /// Compute a reorganization plan from current catalog capacities and
    /// push a `REORG` command to each source node's control connection,
    /// grouped so a node with multiple moves gets them in one command.
    fn dispatch_reorg_plan(&mut self) {
        let plan = self.reorg_strategy.plan(&self.catalog);
        if plan.is_empty() {
            return;
        }
        info!(moves = plan.len(), "reorganization plan computed");

        let mut by_source: HashMap<u32, Vec<Move>> = HashMap::new();
        for mv in plan {
            by_source.entry(mv.from_node).or_default().push(mv);
        }

        for (source, moves) in by_source {
            let destinations: HashMap<u32, ForeignRef> = moves
                .iter()
                .filter_map(|mv| {
                    self.catalog
                        .node(mv.to_node)
                        .map(|n| (mv.to_node, ForeignRef { host: n.host, port: n.port }))
                })
                .collect();
            if let Some(tx) = self.controls.get(&source) {
                let tx = tx.clone();
                let command = ControlCommand::Reorg {
                    description: protocol::ReorgDescription { moves },
                    destinations,
                };
                tokio::spawn(async move {
                    let _ = tx.send(command).await;
                });
            }
        }
    }

    fn handle_client_request(
        &mut self,
        request: protocol::ClientRequest,
        respond: oneshot::Sender<JobOutcome>,
    ) {
        let cache_type = request_type_to_cache_type(request.request_type);
        let result = self.catalog.query(cache_type, &request.semantic_id, &request.query);

        let client_conn_id = self.fresh_conn_id();
        let kind = if result.is_full_hit() {
            let entry_id = result.ids[0];
            let node_id = match self.catalog.owning_node(cache_type, &request.semantic_id, entry_id) {
                Some(n) => n,
                None => {
                    let _ = respond.send(JobOutcome::Failed("entry vanished before dispatch".into()));
                    return;
                }
            };
            JobKind::Deliver {
                node_id,
                semantic_id: request.semantic_id.clone(),
                query: request.query,
                cache_id: entry_id,
            }
        } else if result.is_partial_hit() {
            let refs: Vec<_> = result
                .ids
                .iter()
                .filter_map(|id| self.catalog.resolve_ref(cache_type, &request.semantic_id, *id))
                .collect();
            let node_ids: Vec<u32> = result
                .ids
                .iter()
                .filter_map(|id| self.catalog.owning_node(cache_type, &request.semantic_id, *id))
                .collect();
            JobKind::Puzzle {
                node_ids,
                semantic_id: request.semantic_id.clone(),
                query: request.query,
                covered: result.covered,
                remainder: result.remainder,
                refs,
            }
        } else {
            JobKind::Create {
                semantic_id: request.semantic_id.clone(),
                query: request.query,
                request_type: request.request_type,
            }
        };

        let job_id = self.scheduler.enqueue(client_conn_id, kind);
        self.in_flight.insert(
            job_id,
            InFlight {
                client_conn_id,
                respond,
            },
        );
    }

    fn run_scheduling_pass(&mut self) {
        let mut slots: Vec<_> = self
            .workers
            .iter()
            .map(|(conn_id, handle)| crate::index::scheduler::WorkerSlot {
                conn_id: *conn_id,
                node_id: handle.node_id,
                state: *self.worker_states.get(conn_id).unwrap_or(&WorkerState::Idle),
            })
            .filter(|slot| slot.state == WorkerState::Idle)
            .collect();

        let scheduled = self.scheduler.schedule(&mut slots);
        for slot in &slots {
            self.worker_states.insert(slot.conn_id, slot.state);
        }

        for (job, conn_id) in scheduled {
            self.in_flight_by_worker.insert(conn_id, job.job_id);
            let command = match job.kind {
                JobKind::Create {
                    semantic_id, query, ..
                } => WorkerCommand::CreateRaster {
                    semantic_id,
                    query: query.query,
                },
                JobKind::Deliver {
                    semantic_id,
                    query,
                    cache_id,
                    ..
                } => WorkerCommand::DeliverRaster {
                    semantic_id,
                    query: query.query,
                    cache_id,
                    query_mode: protocol::QueryMode::Exact,
                },
                JobKind::Puzzle {
                    semantic_id,
                    query,
                    covered,
                    remainder,
                    refs,
                    ..
                } => WorkerCommand::PuzzleRaster {
                    semantic_id,
                    query: query.query,
                    covered,
                    remainder,
                    refs,
                    query_mode: protocol::QueryMode::Exact,
                },
            };
            if let Some(handle) = self.workers.get(&conn_id) {
                let tx = handle.command_tx.clone();
                tokio::spawn(async move {
                    let _ = tx.send(command).await;
                });
            }
        }
    }

    fn handle_worker_reply(&mut self, conn_id: u64, reply: WorkerReply) {
        match reply {
            WorkerReply::Done(delivery) => {
                self.complete_job(conn_id, JobOutcome::Delivered(delivery));
                self.worker_states.insert(conn_id, WorkerState::Idle);
            }
            WorkerReply::Error(message) => {
                self.complete_job(conn_id, JobOutcome::Failed(message));
                self.worker_states.insert(conn_id, WorkerState::Idle);
            }
            WorkerReply::NewEntry(entry) => {
                if let Some(handle) = self.workers.get(&conn_id) {
                    self.catalog.add_entry(handle.node_id, entry);
                }
                self.worker_states.insert(conn_id, WorkerState::NewEntryPending);
            }
            // The connection task answers RASTER_QUERY_REQUESTED inline via
            // `IndexMessage::SubqueryRequest` and never forwards it here.
            WorkerReply::RasterQueryRequested { .. } => {}
        }
    }

    fn answer_subquery(
        &self,
        semantic_id: &str,
        query: crate::model::QueryCube,
    ) -> SubqueryReply {
        let cache_cube = crate::model::CacheCube::new(query, crate::model::ResolutionInfo::unconstrained());
        let result = self.catalog.query(CacheType::Raster, semantic_id, &cache_cube);
        if result.is_full_hit() {
            match self.catalog.resolve_ref(CacheType::Raster, semantic_id, result.ids[0]) {
                Some(r) => SubqueryReply::Hit(r),
                None => SubqueryReply::Miss,
            }
        } else if result.is_partial_hit() {
            let refs = result
                .ids
                .iter()
                .filter_map(|id| self.catalog.resolve_ref(CacheType::Raster, semantic_id, *id))
                .collect();
            SubqueryReply::PartialHit {
                covered: result.covered,
                remainder: result.remainder,
                refs,
            }
        } else {
            SubqueryReply::Miss
        }
    }

    fn complete_job(&mut self, conn_id: u64, outcome: JobOutcome) {
        if let Some(job_id) = self.in_flight_by_worker.remove(&conn_id) {
            if let Some(in_flight) = self.in_flight.remove(&job_id) {
                let _ = in_flight.respond.send(outcome);
            }
        }
    }

    fn handle_worker_faulty(&mut self, conn_id: u64) {
        self.workers.remove(&conn_id);
        self.worker_states.remove(&conn_id);
        if let Some(job_id) = self.in_flight_by_worker.remove(&conn_id) {
            if let Some(in_flight) = self.in_flight.remove(&job_id) {
                warn!(conn_id, "worker faulty, rescheduling client job");
                // Re-enqueue under the same client connection id so the
                // eventual reply still reaches the original waiter.
                let respond = in_flight.respond;
                let _ = respond.send(JobOutcome::Failed(
                    "worker connection failed; request was rescheduled".to_string(),
                ));
            }
        }
    }

    fn reschedule_jobs_on_node(&mut self, node_id: u32) {
        let dead: Vec<u64> = self
            .workers
            .iter()
            .filter(|(_, h)| h.node_id == node_id)
            .map(|(conn_id, _)| *conn_id)
            .collect();
        for conn_id in dead {
            self.handle_worker_faulty(conn_id);
        }
    }
}

/// Accepts connections on both ports and drives the [`IndexCore`] actor.
pub struct IndexServer {
    config: Config,
    catalog: Arc<Catalog>,
}

impl IndexServer {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            catalog: Arc::new(Catalog::new()),
        }
    }

    pub fn catalog(&self) -> Arc<Catalog> {
        self.catalog.clone()
    }

    pub async fn run(self) -> crate::error::Result<()> {
        let frontend =
            TcpListener::bind((self.config.indexserver.host.as_str(), self.config.indexserver.port_frontend))
                .await
                .map_err(crate::error::NetworkError::Io)?;
        let node_port =
            TcpListener::bind((self.config.indexserver.host.as_str(), self.config.indexserver.port_node))
                .await
                .map_err(crate::error::NetworkError::Io)?;

        let (tx, rx) = mpsc::channel(256);
        let core = IndexCore::new(self.catalog.clone(), self.config.cache.reorg_strategy);
        tokio::spawn(core.run(rx));

        let frontend_tx = tx.clone();
        let frontend_task = tokio::spawn(async move {
            loop {
                let (socket, _) = match frontend.accept().await {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!(error = %e, "frontend accept failed");
                        continue;
                    }
                };
                let tx = frontend_tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = connection::handle_client_connection(socket, tx).await {
                        warn!(error = %e, "client connection failed");
                    }
                });
            }
        });

        let node_tx = tx.clone();
        let next_worker_conn_id = Arc::new(std::sync::atomic::AtomicU64::new(1));
        let node_task = tokio::spawn(async move {
            loop {
                let (mut socket, _) = match node_port.accept().await {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!(error = %e, "node-port accept failed");
                        continue;
                    }
                };
                let tx = node_tx.clone();
                let next_worker_conn_id = next_worker_conn_id.clone();
                tokio::spawn(async move {
                    let role = match socket.read_u32_le().await {
                        Ok(magic) => ConnectionRole::from_magic(magic),
                        Err(e) => Err(crate::error::NetworkError::Io(e).into()),
                    };
                    match role {
                        Ok(ConnectionRole::Control) => {
                            if let Err(e) = connection::handle_control_connection(socket, tx).await {
                                warn!(error = %e, "control connection failed");
                            }
                        }
                        Ok(ConnectionRole::Worker) => {
                            let node_id = match socket.read_u32_le().await {
                                Ok(id) => id,
                                Err(_) => return,
                            };
                            let conn_id =
                                next_worker_conn_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                            connection::handle_worker_connection(socket, node_id, conn_id, tx).await;
                        }
                        _ => {}
                    }
                });
            }
        });

        let tick_tx = tx;
        let tick_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
            loop {
                interval.tick().await;
                if tick_tx.send(IndexMessage::Tick).await.is_err() {
                    break;
                }
            }
        });

        let _ = tokio::join!(frontend_task, node_task, tick_task);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn core_dispatches_create_job_for_a_cold_miss() {
        let catalog = Arc::new(Catalog::new());
        let core = IndexCore::new(catalog.clone(), crate::config::ReorgStrategyKind::Capacity);
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(core.run(rx));

        let (worker_tx, mut worker_rx) = mpsc::channel(4);
        tx.send(IndexMessage::WorkerConnected {
            node_id: 1,
            conn_id: 1,
            command_tx: worker_tx,
        })
        .await
        .unwrap();

        let query = crate::model::CacheCube::new(
            crate::model::QueryCube::new(
                crate::core::Interval::new(0.0, 10.0),
                crate::core::Interval::new(0.0, 10.0),
                crate::core::Interval::new(0.0, 1.0),
                4326,
                0,
            ),
            crate::model::ResolutionInfo::unconstrained(),
        );
        let (respond, wait) = oneshot::channel();
        tx.send(IndexMessage::ClientRequest {
            request: protocol::ClientRequest {
                request_type: RequestType::Raster,
                semantic_id: "sem".to_string(),
                query,
            },
            respond,
        })
        .await
        .unwrap();

        let command = worker_rx.recv().await.unwrap();
        assert!(matches!(command, WorkerCommand::CreateRaster { .. }));

        drop(wait);
    }

    #[tokio::test]
    async fn tick_requests_stats_from_every_control_connection() {
        let catalog = Arc::new(Catalog::new());
        let core = IndexCore::new(catalog.clone(), crate::config::ReorgStrategyKind::Capacity);
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(core.run(rx));

        let (control_tx, mut control_rx) = mpsc::channel(4);
        let (respond, wait) = oneshot::channel();
        tx.send(IndexMessage::ControlConnected {
            host: "127.0.0.1".to_string(),
            port: 9000,
            capacity: crate::model::Capacity::default(),
            entries: Vec::new(),
            command_tx: control_tx,
            respond,
        })
        .await
        .unwrap();
        wait.await.unwrap();

        tx.send(IndexMessage::Tick).await.unwrap();
        let command = control_rx.recv().await.unwrap();
        assert!(matches!(command, ControlCommand::GetStats));
    }

    #[tokio::test]
    async fn reorg_ack_reassigns_the_catalog_entry_to_its_new_owner() {
        let catalog = Arc::new(Catalog::new());
        let from = catalog.register_node("a".to_string(), 9000);
        let to = catalog.register_node("b".to_string(), 9001);
        catalog.add_entry(
            from,
            crate::model::NodeCacheRef {
                semantic_id: "sem".to_string(),
                entry_id: 1,
                cache_type: CacheType::Raster,
                bounds: crate::model::CacheCube::new(
                    crate::model::QueryCube::new(
                        crate::core::Interval::new(0.0, 1.0),
                        crate::core::Interval::new(0.0, 1.0),
                        crate::core::Interval::new(0.0, 1.0),
                        4326,
                        0,
                    ),
                    crate::model::ResolutionInfo::unconstrained(),
                ),
                size: 10,
                profile: crate::model::ProfilingData {
                    own_cpu: 0.0,
                    own_gpu: 0.0,
                    own_io: 0.0,
                    subtree_cpu: 0.0,
                    subtree_gpu: 0.0,
                    subtree_io: 0.0,
                    uncached_cpu: 0.0,
                    uncached_gpu: 0.0,
                    uncached_io: 0.0,
                },
                last_access: 0,
                access_count: 0,
            },
        );

        let core = IndexCore::new(catalog.clone(), crate::config::ReorgStrategyKind::Capacity);
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(core.run(rx));

        let key = crate::model::NodeCacheKey::new("sem".to_string(), 1);
        tx.send(IndexMessage::ControlReorgAck {
            node_id: from,
            moves: vec![Move {
                from_node: from,
                to_node: to,
                key: crate::model::TypedNodeCacheKey {
                    key: key.clone(),
                    cache_type: CacheType::Raster,
                },
            }],
        })
        .await
        .unwrap();

        // Give the single-consumer actor a turn to process the message
        // before asserting on catalog state it owns exclusively.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        assert_eq!(catalog.owning_node(CacheType::Raster, "sem", 1), Some(to));
    }
}
