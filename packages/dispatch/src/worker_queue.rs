//! The external worker queue collaborator: the broker the Dispatcher enqueues
//! onto and the Wait Coordinator subscribes to. Out of scope per spec.md §1
//! beyond its interface (§6); grounded on the teacher's `seesaw::JobQueue`
//! adapter shape (`kernel/job_queue.rs`), generalized from a single
//! `enqueue`/`schedule` pair to the enqueue/materialize/await-completion
//! surface this subsystem needs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

use crate::error::WorkerQueueError;
use crate::types::{JobCompletion, JobHandle, ScrapePayload};

#[async_trait]
pub trait WorkerQueue: Send + Sync {
    /// Places a job on the queue and returns its handle.
    async fn enqueue(
        &self,
        job_id: Uuid,
        payload: &ScrapePayload,
        priority: i32,
    ) -> Result<JobHandle, WorkerQueueError>;

    /// Resolves a job id to a live handle, or `None` if it hasn't
    /// materialized yet (Wait Coordinator step 1).
    async fn handle_for(&self, job_id: Uuid) -> Result<Option<JobHandle>, WorkerQueueError>;

    /// Awaits the job's completion event. Implementations should prefer a
    /// subscription primitive over polling (Design Notes); this reference
    /// implementation uses a `tokio::sync::watch` channel.
    async fn await_completion(&self, handle: JobHandle) -> Result<JobCompletion, WorkerQueueError>;

    /// Publishes a synthetic `TimedOutInQueue` completion for a job the
    /// Drainer dropped while parked past its `hold_deadline` (spec.md §4.4
    /// step 4). Keeps the Drainer and the worker queue communicating only
    /// through publish/consume, never a direct call (Design Notes).
    async fn publish_timeout(&self, job_id: Uuid) -> Result<(), WorkerQueueError>;
}

struct Slot {
    handle: JobHandle,
    completion: watch::Receiver<Option<JobCompletion>>,
    sender: watch::Sender<Option<JobCompletion>>,
}

/// In-memory worker queue double. A production deployment would back this
/// with the actual broker (e.g. a Redis-backed BullMQ-equivalent); this
/// reference implementation exercises the exact trait the Dispatcher and
/// Wait Coordinator depend on.
#[derive(Default)]
pub struct LocalWorkerQueue {
    slots: Arc<Mutex<HashMap<Uuid, Slot>>>,
}

impl LocalWorkerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/operator hook: complete a job as if the worker finished it.
    pub async fn complete(&self, job_id: Uuid, completion: JobCompletion) {
        let slots = self.slots.lock().await;
        if let Some(slot) = slots.get(&job_id) {
            let _ = slot.sender.send(Some(completion));
        }
    }
}

#[async_trait]
impl WorkerQueue for LocalWorkerQueue {
    async fn enqueue(
        &self,
        job_id: Uuid,
        _payload: &ScrapePayload,
        _priority: i32,
    ) -> Result<JobHandle, WorkerQueueError> {
        let handle = JobHandle { job_id };
        let (tx, rx) = watch::channel(None);
        self.slots.lock().await.insert(
            job_id,
            Slot {
                handle,
                completion: rx,
                sender: tx,
            },
        );
        Ok(handle)
    }

    async fn handle_for(&self, job_id: Uuid) -> Result<Option<JobHandle>, WorkerQueueError> {
        Ok(self.slots.lock().await.get(&job_id).map(|s| s.handle))
    }

    async fn await_completion(&self, handle: JobHandle) -> Result<JobCompletion, WorkerQueueError> {
        let mut rx = {
            let slots = self.slots.lock().await;
            slots
                .get(&handle.job_id)
                .ok_or_else(|| WorkerQueueError::Unavailable(format!("unknown job {}", handle.job_id)))?
                .completion
                .clone()
        };

        loop {
            if let Some(completion) = rx.borrow().clone() {
                return Ok(completion);
            }
            rx.changed()
                .await
                .map_err(|_| WorkerQueueError::Unavailable("queue closed".to_string()))?;
        }
    }

    async fn publish_timeout(&self, job_id: Uuid) -> Result<(), WorkerQueueError> {
        // The job never had a handle if it was parked; synthesize one so the
        // Wait Coordinator's poll sees it materialize with a terminal state.
        let mut slots = self.slots.lock().await;
        let slot = slots.entry(job_id).or_insert_with(|| {
            let (tx, rx) = watch::channel(None);
            Slot {
                handle: JobHandle { job_id },
                completion: rx,
                sender: tx,
            }
        });
        let _ = slot.sender.send(Some(JobCompletion::TimedOutInQueue));
        Ok(())
    }
}
