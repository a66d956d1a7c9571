//! The Dispatcher (spec.md §4.3): turns an admission verdict into Ledger
//! writes and worker-queue enqueues, or into a parked deferred entry.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info};
use uuid::Uuid;

use crate::admission::AdmissionController;
use crate::directory::{CrawlDirectory, TenantDirectory};
use crate::error::DispatchError;
use crate::ledger::Ledger;
use crate::notify::NotificationGate;
use crate::types::{
    DeferredEntry, Job, JobHandle, NotificationKind, Verdict, DEFAULT_ACTIVE_ENTRY_TTL_MS,
};
use crate::worker_queue::WorkerQueue;

pub struct Dispatcher<L, T, C, Q> {
    ledger: Arc<L>,
    admission: AdmissionController<L, T, C>,
    queue: Arc<Q>,
    notifier: NotificationGate<L>,
    active_entry_ttl_ms: u64,
}

impl<L, T, C, Q> Dispatcher<L, T, C, Q>
where
    L: Ledger + 'static,
    T: TenantDirectory,
    C: CrawlDirectory,
    Q: WorkerQueue,
{
    pub fn new(
        ledger: Arc<L>,
        tenants: Arc<T>,
        crawls: Arc<C>,
        queue: Arc<Q>,
        notifier: NotificationGate<L>,
        default_ceiling: u32,
        active_entry_ttl_ms: u64,
    ) -> Self {
        let admission = AdmissionController::new(ledger.clone(), tenants, crawls, default_ceiling);
        Self {
            ledger,
            admission,
            queue,
            notifier,
            active_entry_ttl_ms,
        }
    }

    /// `submit_one` (spec.md §6): returns a worker-queue handle on admit,
    /// `None` on defer.
    pub async fn submit_one(&self, mut job: Job) -> Result<Option<JobHandle>, DispatchError> {
        let crawl_bounded = match &job.crawl_id {
            Some(crawl_id) => self.crawl_bounded(crawl_id).await,
            None => false,
        };

        let decision = self.admission.admit_one(&job).await?;
        self.apply(&mut job, decision.verdict, crawl_bounded).await
    }

    /// `submit_many` (spec.md §6): the bulk form. The implementation
    /// partitions by tenant regardless of whether the caller already
    /// grouped jobs homogeneously.
    pub async fn submit_many(&self, jobs: Vec<Job>) -> Result<Vec<Option<JobHandle>>, DispatchError> {
        let mut by_tenant: HashMap<String, Vec<Job>> = HashMap::new();
        let mut order: Vec<(String, usize)> = Vec::with_capacity(jobs.len());

        for job in jobs {
            let team_id = job.team_id.clone();
            let bucket = by_tenant.entry(team_id.clone()).or_default();
            order.push((team_id, bucket.len()));
            bucket.push(job);
        }

        let mut handles_by_tenant: HashMap<String, Vec<Option<JobHandle>>> = HashMap::new();

        for (team_id, tenant_jobs) in by_tenant {
            let crawl_bounded: Vec<bool> = {
                let mut flags = Vec::with_capacity(tenant_jobs.len());
                for job in &tenant_jobs {
                    flags.push(match &job.crawl_id {
                        Some(crawl_id) => self.crawl_bounded(crawl_id).await,
                        None => false,
                    });
                }
                flags
            };

            let decision = self.admission.admit_bulk(&team_id, &tenant_jobs).await?;

            if decision.notify {
                self.notifier
                    .maybe_notify(&team_id, NotificationKind::ConcurrencyLimitReached, Utc::now())
                    .await;
            }

            let mut handles = Vec::with_capacity(tenant_jobs.len());
            for ((mut job, verdict), bounded) in tenant_jobs
                .into_iter()
                .zip(decision.verdicts)
                .zip(crawl_bounded)
            {
                handles.push(self.apply(&mut job, verdict, bounded).await?);
            }
            handles_by_tenant.insert(team_id, handles);
        }

        // Restore original submission order.
        let mut slots: HashMap<String, std::collections::VecDeque<Option<JobHandle>>> = handles_by_tenant
            .into_iter()
            .map(|(k, v)| (k, v.into()))
            .collect();
        let mut result = Vec::with_capacity(order.len());
        for (team_id, _) in order {
            result.push(slots.get_mut(&team_id).and_then(|q| q.pop_front()).flatten());
        }
        Ok(result)
    }

    async fn crawl_bounded(&self, crawl_id: &str) -> bool {
        self.admission.crawl_bounded(crawl_id).await
    }

    /// Runs the ADMIT path for a job the Drainer already decided has a free
    /// slot (spec.md §4.4 step 3's "otherwise run the ADMIT path for it").
    pub async fn admit_deferred(
        &self,
        mut job: Job,
        crawl_bounded: bool,
    ) -> Result<Option<JobHandle>, DispatchError> {
        self.admit(&mut job, crawl_bounded).await
    }

    async fn apply(
        &self,
        job: &mut Job,
        verdict: Verdict,
        crawl_bounded: bool,
    ) -> Result<Option<JobHandle>, DispatchError> {
        match verdict {
            Verdict::Admit => self.admit(job, crawl_bounded).await,
            Verdict::DeferTenant | Verdict::DeferCrawl => self.defer(job).await,
        }
    }

    async fn admit(&self, job: &mut Job, crawl_bounded: bool) -> Result<Option<JobHandle>, DispatchError> {
        self.ledger
            .push_active(&job.team_id, job.id, self.active_entry_ttl_ms)
            .await?;

        if crawl_bounded {
            if let Some(crawl_id) = &job.crawl_id {
                self.ledger
                    .crawl_push_active(crawl_id, job.id, self.active_entry_ttl_ms)
                    .await?;
            }
        }

        match self.queue.enqueue(job.id, &job.payload, job.priority).await {
            Ok(handle) => {
                info!(job_id = %job.id, team_id = %job.team_id, "admitted job");
                Ok(Some(handle))
            }
            Err(e) => {
                // Logged, not rolled back: the Active-Job Entry self-heals
                // via TTL (spec.md §4.3 Failure semantics).
                error!(job_id = %job.id, error = %e, "worker queue enqueue failed after admission");
                Err(e.into())
            }
        }
    }

    async fn defer(&self, job: &mut Job) -> Result<Option<JobHandle>, DispatchError> {
        job.payload.was_deferred = true;

        let now = Utc::now();
        let hold_deadline = if job.crawl_id.is_none() {
            Some(now + chrono::Duration::milliseconds(job.timeout_ms as i64))
        } else {
            None
        };

        let entry = DeferredEntry {
            job_id: job.id,
            team_id: job.team_id.clone(),
            crawl_id: job.crawl_id.clone(),
            payload: job.payload.clone(),
            priority: job.priority,
            enqueue_at: now,
            hold_deadline,
            timeout_ms: job.timeout_ms,
            mode: job.mode,
            is_extract: job.is_extract,
            from_extract: job.from_extract,
        };

        self.ledger.push_deferred(&job.team_id, entry).await?;
        info!(job_id = %job.id, team_id = %job.team_id, "deferred job");
        Ok(None)
    }
}

/// Helper used by `Job::id` generation at the HTTP boundary (out of scope
/// here); re-exported for callers that need a fresh id when the client
/// didn't supply one.
pub fn new_job_id() -> Uuid {
    Uuid::new_v4()
}

pub const DEFAULT_TTL_MS: u64 = DEFAULT_ACTIVE_ENTRY_TTL_MS;
