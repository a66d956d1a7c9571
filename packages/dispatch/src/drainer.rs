//! The Drainer (spec.md §4.4): promotes deferred entries into the active
//! path as capacity frees, triggered either by a periodic sweep or by an
//! explicit call after a worker reports completion.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::admission::AdmissionController;
use crate::directory::{effective_ceiling, CrawlDirectory, TenantDirectory};
use crate::dispatcher::Dispatcher;
use crate::error::DispatchError;
use crate::ledger::Ledger;
use crate::types::{DeferredEntry, Job, ScrapePayload};
use crate::worker_queue::WorkerQueue;

/// Which of spec.md §4.4's two trigger sources caused this drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainTrigger {
    PeriodicSweep,
    CompletionCallback,
}

pub struct Drainer<L, T, C, Q> {
    ledger: Arc<L>,
    admission: Arc<AdmissionController<L, T, C>>,
    dispatcher: Arc<Dispatcher<L, T, C, Q>>,
    queue: Arc<Q>,
    default_ceiling: u32,
}

impl<L, T, C, Q> Drainer<L, T, C, Q>
where
    L: Ledger + 'static,
    T: TenantDirectory,
    C: CrawlDirectory,
    Q: WorkerQueue,
{
    pub fn new(
        ledger: Arc<L>,
        admission: Arc<AdmissionController<L, T, C>>,
        dispatcher: Arc<Dispatcher<L, T, C, Q>>,
        queue: Arc<Q>,
        default_ceiling: u32,
    ) -> Self {
        Self {
            ledger,
            admission,
            dispatcher,
            queue,
            default_ceiling,
        }
    }

    fn deferred_entry_to_job(entry: &DeferredEntry) -> Job {
        Job {
            id: entry.job_id,
            team_id: entry.team_id.clone(),
            crawl_id: entry.crawl_id.clone(),
            priority: entry.priority,
            mode: entry.mode,
            timeout_ms: entry.timeout_ms,
            payload: ScrapePayload {
                was_deferred: true,
                ..entry.payload.clone()
            },
            is_extract: entry.is_extract,
            from_extract: entry.from_extract,
            direct_to_worker: false,
        }
    }

    /// Procedure for tenant T (spec.md §4.4 steps 1-4). Returns the number
    /// of entries promoted.
    ///
    /// Tenants can have deferred entries spanning several concurrency modes
    /// at once (§3's per-mode ceilings share a single active-entry count but
    /// compare it against a different ceiling per job's own mode), so step 2's
    /// "free capacity" can't be reduced to one scalar computed up front: each
    /// popped entry's own mode ceiling is re-checked against the
    /// current active count as it is considered for promotion.
    pub async fn drain_tenant(&self, team_id: &str, _trigger: DrainTrigger) -> Result<usize, DispatchError> {
        let now = Utc::now();

        // Step 4 runs unconditionally so the "promoted, or timed out within
        // hold_deadline" invariant holds even when capacity never frees
        // (SPEC_FULL.md §11.2).
        let expired = self.ledger.evict_expired_deferred(team_id, now).await?;
        for entry in &expired {
            warn!(job_id = %entry.job_id, team_id, "deferred job timed out in queue");
            if let Err(e) = self.queue.publish_timeout(entry.job_id).await {
                warn!(job_id = %entry.job_id, error = %e, "failed to publish queue timeout");
            }
        }

        // Step 1.
        self.ledger.clean_expired(team_id, now).await?;

        let backlog = self.ledger.count_deferred(team_id).await?;
        if backlog == 0 {
            return Ok(0);
        }

        // Step 3: pop the whole backlog rather than a single precomputed
        // "free" count, since that count would otherwise have to assume one
        // mode for every entry.
        let popped = self.ledger.pop_deferred(team_id, backlog).await?;
        let mut promoted = 0usize;

        for entry in popped {
            if let Some(crawl_id) = entry.crawl_id.clone() {
                if let Some(record) = self.admission.crawl_record(&crawl_id).await {
                    if let Some(crawl_ceiling) = record.ceiling() {
                        let crawl_active = self.ledger.count_crawl_active(&crawl_id, now).await?;
                        if crawl_active >= crawl_ceiling {
                            // Still blocked: push back, preserving enqueue_at
                            // (spec.md §4.4 step 3).
                            self.ledger.push_deferred(team_id, entry).await?;
                            continue;
                        }
                    }
                }
            }

            // Step 2, re-evaluated per entry: the tenant ceiling applicable
            // to this entry's own mode (§4.2 step 3), checked against the
            // tenant's current (shared) active count.
            let mode = entry.mode.concurrency_mode(entry.is_extract);
            let ceiling = effective_ceiling(
                self.admission.tenant_ceiling(team_id, mode).await,
                self.default_ceiling,
            );
            let active = self.ledger.count_active(team_id, now).await?;
            if active >= ceiling {
                self.ledger.push_deferred(team_id, entry).await?;
                continue;
            }

            let crawl_bounded = match &entry.crawl_id {
                Some(crawl_id) => self.admission.crawl_bounded(crawl_id).await,
                None => false,
            };

            let job = Self::deferred_entry_to_job(&entry);
            self.dispatcher.admit_deferred(job, crawl_bounded).await?;
            promoted += 1;
        }

        if promoted > 0 {
            info!(team_id, promoted, "drained deferred jobs");
        }
        Ok(promoted)
    }

    /// Trigger source (ii): a worker reports completion of `job_id` for
    /// tenant `team_id` (and, for crawl jobs, crawl `crawl_id`). Releases the
    /// Active-Job Entries explicitly (spec.md §3 "destroyed explicitly when
    /// the worker reports completion") then drains the freed capacity. The
    /// worker queue and the Ledger stay decoupled: this is driven by the
    /// completion event the caller already observed, not a call back into
    /// the queue itself (Design Notes).
    pub async fn release_and_drain(
        &self,
        team_id: &str,
        crawl_id: Option<&str>,
        job_id: uuid::Uuid,
    ) -> Result<usize, DispatchError> {
        self.ledger.remove_active(team_id, job_id).await?;
        if let Some(crawl_id) = crawl_id {
            self.ledger.remove_crawl_active(crawl_id, job_id).await?;
        }
        self.drain_tenant(team_id, DrainTrigger::CompletionCallback).await
    }

    /// Periodic sweep trigger: drains every tenant with a non-empty deferred
    /// backlog (SPEC_FULL.md §11.1).
    pub async fn sweep(&self) -> Result<usize, DispatchError> {
        let tenants = self.ledger.list_tenants_with_deferred().await?;
        let mut total = 0usize;
        for team_id in tenants {
            total += self.drain_tenant(&team_id, DrainTrigger::PeriodicSweep).await?;
        }
        Ok(total)
    }
}
