//! The Admission Controller (spec.md §4.2): decides ADMIT / DEFER_TENANT /
//! DEFER_CRAWL for a single job or a same-tenant batch.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use crate::directory::{effective_ceiling, CrawlDirectory, TenantDirectory};
use crate::error::AdmissionError;
use crate::ledger::Ledger;
use crate::types::{CrawlRecord, Job, Verdict};

pub struct AdmissionController<L, T, C> {
    ledger: Arc<L>,
    tenants: Arc<T>,
    crawls: Arc<C>,
    default_ceiling: u32,
}

/// Per-job verdict plus a flag telling the caller whether this single
/// submission should trigger the Notification Gate (spec.md §4.2 step 5,
/// applied to the degenerate one-job batch).
pub struct SingleVerdict {
    pub verdict: Verdict,
    pub notify: bool,
}

/// Result of a same-tenant bulk submission: one verdict per input job, in
/// input order, plus whether the Notification Gate should fire for the
/// batch as a whole.
pub struct BulkVerdict {
    pub verdicts: Vec<Verdict>,
    pub notify: bool,
}

impl<L, T, C> AdmissionController<L, T, C>
where
    L: Ledger,
    T: TenantDirectory,
    C: CrawlDirectory,
{
    pub fn new(ledger: Arc<L>, tenants: Arc<T>, crawls: Arc<C>, default_ceiling: u32) -> Self {
        Self {
            ledger,
            tenants,
            crawls,
            default_ceiling,
        }
    }

    /// The per-crawl ceiling gate shared by the single- and bulk-admission
    /// paths (spec.md §4.2 step 2).
    async fn crawl_free_slots(&self, crawl_id: &str, count: u32) -> Result<Option<u32>, AdmissionError> {
        let record: Option<CrawlRecord> = self.crawls.record(crawl_id).await;
        match record.and_then(|r| r.ceiling()) {
            None => Ok(None),
            Some(ceiling) => {
                let active = self.ledger.count_crawl_active(crawl_id, Utc::now()).await?;
                Ok(Some(ceiling.saturating_sub(active).min(count)))
            }
        }
    }

    /// Exposes the raw tenant ceiling lookup for the Drainer, which repeats
    /// the Admission Controller's ceiling resolution for its own freed-slot
    /// computation (spec.md §4.4 step 2).
    pub async fn tenant_ceiling(&self, team_id: &str, mode: crate::types::ConcurrencyMode) -> Option<u32> {
        self.tenants.ceiling(team_id, mode).await
    }

    /// Exposes the raw crawl record lookup for the Drainer's per-crawl
    /// re-evaluation of popped entries (spec.md §4.4 step 3).
    pub async fn crawl_record(&self, crawl_id: &str) -> Option<CrawlRecord> {
        self.crawls.record(crawl_id).await
    }

    /// Whether a crawl has a bounded ceiling (`max_concurrency` or `delay`),
    /// used by the Dispatcher to decide whether a job also needs a
    /// crawl-scoped Active-Job Entry (spec.md §4.3 step (b)). A directory
    /// read failure degrades to "unbounded" (spec.md §7).
    pub async fn crawl_bounded(&self, crawl_id: &str) -> bool {
        self.crawls
            .record(crawl_id)
            .await
            .map(|r| r.is_bounded())
            .unwrap_or(false)
    }

    /// Single-job admission (spec.md §4.2, "Algorithm (per single job)").
    pub async fn admit_one(&self, job: &Job) -> Result<SingleVerdict, AdmissionError> {
        if job.direct_to_worker {
            // Open Question (spec.md §9): whether directToWorker still writes
            // an Active-Job Entry. The Dispatcher writes one regardless
            // (resolved in DESIGN.md); the controller itself only decides
            // the verdict.
            return Ok(SingleVerdict {
                verdict: Verdict::Admit,
                notify: false,
            });
        }

        if let Some(crawl_id) = &job.crawl_id {
            if let Some(free_crawl) = self.crawl_free_slots(crawl_id, 1).await? {
                if free_crawl == 0 {
                    return Ok(SingleVerdict {
                        verdict: Verdict::DeferCrawl,
                        notify: false,
                    });
                }
            }
        }

        let mode = job.mode.concurrency_mode(job.is_extract);
        let ceiling = effective_ceiling(self.tenants.ceiling(&job.team_id, mode).await, self.default_ceiling);

        let now = Utc::now();
        self.ledger.clean_expired(&job.team_id, now).await?;
        let active = self.ledger.count_active(&job.team_id, now).await?;

        if active >= ceiling {
            // A lone deferred job never exceeds 2x ceiling by itself, so a
            // single submission alone never crosses the notify threshold
            // (spec.md §4.2 step 5 is inherently a bulk-submission concern);
            // ad-hoc single-job saturation notifications accumulate via the
            // Drainer/backlog growing across many single submissions, which
            // the bulk path (repeated per-request) already covers.
            return Ok(SingleVerdict {
                verdict: Verdict::DeferTenant,
                notify: false,
            });
        }

        Ok(SingleVerdict {
            verdict: Verdict::Admit,
            notify: false,
        })
    }

    /// Bulk admission for a same-tenant batch (spec.md §4.2, "Algorithm (bulk
    /// submission of many jobs for the same tenant)"). `jobs` must all share
    /// `team_id`; the Dispatcher partitions a mixed-tenant submission before
    /// calling this.
    pub async fn admit_bulk(&self, team_id: &str, jobs: &[Job]) -> Result<BulkVerdict, AdmissionError> {
        debug_assert!(jobs.iter().all(|j| j.team_id == team_id));

        let mode = jobs
            .first()
            .map(|j| j.mode.concurrency_mode(j.is_extract))
            .unwrap_or(crate::types::ConcurrencyMode::Crawl);
        let ceiling = effective_ceiling(self.tenants.ceiling(team_id, mode).await, self.default_ceiling);

        // Step 1: partition by crawl_id.
        let mut buckets: HashMap<Option<String>, Vec<usize>> = HashMap::new();
        for (i, job) in jobs.iter().enumerate() {
            buckets.entry(job.crawl_id.clone()).or_default().push(i);
        }

        let mut potentially_admissible: Vec<usize> = Vec::new();
        let mut forced_defer_crawl: Vec<usize> = Vec::new();

        for (crawl_id, indices) in &buckets {
            match crawl_id {
                None => potentially_admissible.extend(indices.iter().copied()),
                Some(cid) => {
                    let free_crawl = self.crawl_free_slots(cid, indices.len() as u32).await?;
                    match free_crawl {
                        None => potentially_admissible.extend(indices.iter().copied()),
                        Some(free) => {
                            let split = (free as usize).min(indices.len());
                            potentially_admissible.extend(indices[..split].iter().copied());
                            forced_defer_crawl.extend(indices[split..].iter().copied());
                        }
                    }
                }
            }
        }

        // Input order is deterministic for admission, independent of bucket
        // iteration order (spec.md: "input order — deterministic").
        potentially_admissible.sort_unstable();
        forced_defer_crawl.sort_unstable();

        let now = Utc::now();
        self.ledger.clean_expired(team_id, now).await?;
        let active = self.ledger.count_active(team_id, now).await?;
        let free_tenant = ceiling.saturating_sub(active);
        let admit_count = (free_tenant as usize).min(potentially_admissible.len());

        let mut verdicts = vec![Verdict::Admit; jobs.len()];
        for (rank, &idx) in potentially_admissible.iter().enumerate() {
            verdicts[idx] = if rank < admit_count {
                Verdict::Admit
            } else {
                Verdict::DeferTenant
            };
        }
        for &idx in &forced_defer_crawl {
            verdicts[idx] = Verdict::DeferCrawl;
        }
        for (idx, job) in jobs.iter().enumerate() {
            if job.direct_to_worker {
                verdicts[idx] = Verdict::Admit;
            }
        }

        let backlog = potentially_admissible.len().saturating_sub(admit_count) as u32;
        let is_crawl_or_batch = jobs.iter().any(|j| j.is_crawl_or_batch());
        let notify = backlog > ceiling && !is_crawl_or_batch;

        Ok(BulkVerdict { verdicts, notify })
    }
}
