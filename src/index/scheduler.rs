//! Job descriptions and the first-fit scheduling pass over idle worker
//! connections (C7, §4.7).

use crate::core::Cube3;
use crate::model::{CacheCube, CacheRef, RequestType};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lifecycle of a worker connection, collapsing the cyclic
/// worker-index-worker puzzle sub-query exchange into one state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Running,
    SubqueryWaiting,
    NewEntryPending,
    Done,
    Error,
    Faulty,
}

/// What the scheduler knows about one worker connection: which node it
/// belongs to and whether it is free to take a job.
#[derive(Debug, Clone, Copy)]
pub struct WorkerSlot {
    pub conn_id: u64,
    pub node_id: u32,
    pub state: WorkerState,
}

impl WorkerSlot {
    pub fn is_idle(&self) -> bool {
        matches!(self.state, WorkerState::Idle)
    }
}

/// The work a `JobDescription` asks some worker to perform, and the
/// locality constraint the scheduler must respect.
#[derive(Debug, Clone, PartialEq)]
pub enum JobKind {
    /// Any idle worker: compute from scratch.
    Create {
        semantic_id: String,
        query: CacheCube,
        request_type: RequestType,
    },
    /// An idle worker on `node_id` specifically: local cache hit.
    Deliver {
        node_id: u32,
        semantic_id: String,
        query: CacheCube,
        cache_id: u64,
    },
    /// An idle worker on any of `node_ids`: a puzzle combining references
    /// from those nodes with recomputed remainder slabs.
    Puzzle {
        node_ids: Vec<u32>,
        semantic_id: String,
        query: CacheCube,
        covered: Cube3,
        remainder: Vec<Cube3>,
        refs: Vec<CacheRef>,
    },
}

/// A unit of work pending dispatch to a worker, tied back to the client
/// connection awaiting its result.
#[derive(Debug, Clone, PartialEq)]
pub struct JobDescription {
    pub job_id: u64,
    pub client_conn_id: u64,
    pub kind: JobKind,
}

impl JobDescription {
    /// Whether `worker` is idle and satisfies this job's locality
    /// constraint.
    pub fn matches(&self, worker: &WorkerSlot) -> bool {
        if !worker.is_idle() {
            return false;
        }
        match &self.kind {
            JobKind::Create { .. } => true,
            JobKind::Deliver { node_id, .. } => worker.node_id == *node_id,
            JobKind::Puzzle { node_ids, .. } => node_ids.contains(&worker.node_id),
        }
    }
}

/// FIFO of pending jobs plus the first-fit scheduling pass.
#[derive(Default)]
pub struct Scheduler {
    pending: VecDeque<JobDescription>,
    next_job_id: AtomicU64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            next_job_id: AtomicU64::new(1),
        }
    }

    /// Queue a job, returning its assigned id.
    pub fn enqueue(&mut self, client_conn_id: u64, kind: JobKind) -> u64 {
        let job_id = self.next_job_id.fetch_add(1, Ordering::Relaxed);
        self.pending.push_back(JobDescription {
            job_id,
            client_conn_id,
            kind,
        });
        job_id
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// One scheduling pass: walk pending jobs in FIFO order, assigning each
    /// to the first matching idle worker (by `workers` iteration order).
    /// Scheduled workers are marked [`WorkerState::Running`] in place.
    /// Jobs with no match stay queued, at their original relative order,
    /// for the next pass.
    pub fn schedule(&mut self, workers: &mut [WorkerSlot]) -> Vec<(JobDescription, u64)> {
        let mut scheduled = Vec::new();
        let mut still_pending = VecDeque::with_capacity(self.pending.len());

        while let Some(job) = self.pending.pop_front() {
            let slot = workers.iter_mut().find(|w| job.matches(w));
            match slot {
                Some(worker) => {
                    worker.state = WorkerState::Running;
                    let conn_id = worker.conn_id;
                    scheduled.push((job, conn_id));
                }
                None => still_pending.push_back(job),
            }
        }

        self.pending = still_pending;
        scheduled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Interval;
    use crate::model::{QueryCube, ResolutionInfo};

    fn cube() -> CacheCube {
        CacheCube::new(
            QueryCube::new(
                Interval::new(0.0, 1.0),
                Interval::new(0.0, 1.0),
                Interval::new(0.0, 1.0),
                4326,
                0,
            ),
            ResolutionInfo::unconstrained(),
        )
    }

    #[test]
    fn create_job_matches_any_idle_worker() {
        let mut scheduler = Scheduler::new();
        scheduler.enqueue(
            1,
            JobKind::Create {
                semantic_id: "sem".into(),
                query: cube(),
                request_type: RequestType::Raster,
            },
        );

        let mut workers = vec![WorkerSlot {
            conn_id: 100,
            node_id: 5,
            state: WorkerState::Idle,
        }];
        let scheduled = scheduler.schedule(&mut workers);
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].1, 100);
        assert_eq!(workers[0].state, WorkerState::Running);
    }

    #[test]
    fn deliver_job_requires_worker_on_the_named_node() {
        let mut scheduler = Scheduler::new();
        scheduler.enqueue(
            1,
            JobKind::Deliver {
                node_id: 2,
                semantic_id: "sem".into(),
                query: cube(),
                cache_id: 9,
            },
        );

        let mut workers = vec![
            WorkerSlot {
                conn_id: 100,
                node_id: 1,
                state: WorkerState::Idle,
            },
            WorkerSlot {
                conn_id: 200,
                node_id: 2,
                state: WorkerState::Idle,
            },
        ];
        let scheduled = scheduler.schedule(&mut workers);
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].1, 200);
    }

    #[test]
    fn unmatched_job_stays_queued_for_the_next_pass() {
        let mut scheduler = Scheduler::new();
        scheduler.enqueue(
            1,
            JobKind::Deliver {
                node_id: 99,
                semantic_id: "sem".into(),
                query: cube(),
                cache_id: 9,
            },
        );

        let mut workers = vec![WorkerSlot {
            conn_id: 100,
            node_id: 1,
            state: WorkerState::Idle,
        }];
        let scheduled = scheduler.schedule(&mut workers);
        assert!(scheduled.is_empty());
        assert_eq!(scheduler.pending_len(), 1);
    }

    #[test]
    fn puzzle_job_matches_worker_on_any_contributing_node() {
        let mut scheduler = Scheduler::new();
        scheduler.enqueue(
            1,
            JobKind::Puzzle {
                node_ids: vec![3, 4],
                semantic_id: "sem".into(),
                query: cube(),
                covered: cube().query.cube,
                remainder: vec![],
                refs: vec![],
            },
        );

        let mut workers = vec![WorkerSlot {
            conn_id: 300,
            node_id: 4,
            state: WorkerState::Idle,
        }];
        let scheduled = scheduler.schedule(&mut workers);
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].1, 300);
    }
}
