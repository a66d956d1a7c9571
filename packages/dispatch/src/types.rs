//! Data model shared across the Ledger, Admission Controller, Dispatcher,
//! Drainer, Wait Coordinator and Notification Gate.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Closed set of scrape modes, per the "dynamic any-typed payload" design
/// note: unknown options still round-trip through `extra`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobMode {
    SingleUrls,
    Crawl,
    Extract,
    ExtractAgentPreview,
}

impl JobMode {
    /// The mode used to key the per-tenant concurrency ceiling lookup.
    pub fn concurrency_mode(self, is_extract: bool) -> ConcurrencyMode {
        if is_extract {
            match self {
                JobMode::ExtractAgentPreview => ConcurrencyMode::ExtractAgentPreview,
                _ => ConcurrencyMode::Extract,
            }
        } else {
            ConcurrencyMode::Crawl
        }
    }
}

/// The three plan-derived concurrency buckets a tenant's ceiling can apply to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConcurrencyMode {
    Crawl,
    Extract,
    ExtractAgentPreview,
}

impl ConcurrencyMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ConcurrencyMode::Crawl => "crawl",
            ConcurrencyMode::Extract => "extract",
            ConcurrencyMode::ExtractAgentPreview => "extract-agent-preview",
        }
    }
}

impl fmt::Display for ConcurrencyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed scrape options plus an opaque extension map for fields this crate
/// does not need to interpret.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ScrapeOptions {
    #[serde(default)]
    pub formats: Vec<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The payload a job carries end to end: the worker queue message body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScrapePayload {
    pub url: String,
    #[serde(default)]
    pub options: ScrapeOptions,
    /// Set by the Dispatcher when this job is parked, per §4.3.
    #[serde(default)]
    pub was_deferred: bool,
}

/// The unit of admission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub team_id: String,
    pub crawl_id: Option<String>,
    /// Lower is more urgent.
    pub priority: i32,
    pub mode: JobMode,
    pub timeout_ms: u64,
    pub payload: ScrapePayload,
    pub is_extract: bool,
    pub from_extract: bool,
    /// Administrative override: bypasses all limit checks (§4.2 step 1).
    pub direct_to_worker: bool,
}

pub const DEFAULT_JOB_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 180_000;
pub const DEFAULT_CONCURRENCY_CEILING: u32 = 2;
pub const DEFAULT_ACTIVE_ENTRY_TTL_MS: u64 = 60_000;

impl Job {
    /// `crawl_id` is present and carries a `delay` or `max_concurrency`, i.e.
    /// this job also occupies a crawl-scoped slot (§4.3).
    pub fn has_bounded_crawl(&self, crawl: Option<&CrawlRecord>) -> bool {
        self.crawl_id.is_some() && crawl.map(|c| c.is_bounded()).unwrap_or(false)
    }

    /// True when this job is part of a crawl or batch-scrape submission,
    /// which suppresses the Notification Gate (§4.6).
    pub fn is_crawl_or_batch(&self) -> bool {
        self.crawl_id.is_some()
    }
}

/// The crawl-level record consulted for the per-crawl ceiling.
#[derive(Debug, Clone, Copy, Default)]
pub struct CrawlRecord {
    pub max_concurrency: Option<u32>,
    pub delay: Option<u64>,
}

impl CrawlRecord {
    pub fn is_bounded(&self) -> bool {
        self.ceiling().is_some()
    }

    /// `max_concurrency` if set, else 1 if `delay` is present, else unbounded.
    pub fn ceiling(&self) -> Option<u32> {
        self.max_concurrency.or(self.delay.map(|_| 1))
    }
}

/// Admission verdict produced by the Admission Controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Admit,
    DeferTenant,
    DeferCrawl,
}

/// A record proving a job currently occupies a slot.
#[derive(Debug, Clone, Copy)]
pub struct ActiveEntry {
    pub job_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// A parked admission awaiting a freed slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeferredEntry {
    pub job_id: Uuid,
    pub team_id: String,
    pub crawl_id: Option<String>,
    pub payload: ScrapePayload,
    pub priority: i32,
    pub enqueue_at: DateTime<Utc>,
    /// `None` means "park indefinitely until drained" (crawl jobs, §3).
    pub hold_deadline: Option<DateTime<Utc>>,
    pub timeout_ms: u64,
    /// Preserved so the Drainer re-derives the correct tenant ceiling mode
    /// on promotion (§4.2 step 3) instead of guessing from `crawl_id` alone.
    pub mode: JobMode,
    pub is_extract: bool,
    pub from_extract: bool,
}

/// A handle to a job that has been placed on the worker queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobHandle {
    pub job_id: Uuid,
}

/// The inline-or-out-of-band result body a completed job produces.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum JobResult {
    /// Result small enough to travel inline through the worker queue.
    Inline(Vec<serde_json::Value>),
    /// Worker persisted the payload out-of-band; fetch it from the blob store.
    OutOfBand,
}

/// A structured failure raised by the worker, serialized across the queue
/// boundary and reconstructed by the caller without loss of kind.
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct TransportableError {
    pub kind: String,
    pub message: String,
    pub cause: Option<Box<TransportableError>>,
}

/// The outcome a worker queue publishes when a job finishes (or is declared
/// timed out by the Drainer on its behalf, per §4.4 step 4).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum JobCompletion {
    Success(JobResult),
    TransportableFailure(TransportableError),
    GenericFailure(String),
    TimedOutInQueue,
}

/// Notification kinds the Notification Gate can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    ConcurrencyLimitReached,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::ConcurrencyLimitReached => "concurrency_limit_reached",
        }
    }
}
