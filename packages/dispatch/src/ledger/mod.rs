//! The Concurrency Ledger: atomic, crash-tolerant counters and lists over an
//! external store, keyed by tenant and by crawl.

mod memory;
mod redis_ledger;

pub use memory::InMemoryLedger;
pub use redis_ledger::RedisLedger;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::LedgerError;
use crate::types::DeferredEntry;

/// Atomic primitives over tenant- and crawl-scoped concurrency state. The
/// Ledger does not interpret job contents (spec.md §4.1).
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Idempotent w.r.t. `job_id`: a duplicate push is a no-op but refreshes
    /// the expiry (spec.md §4.1 Semantics).
    async fn push_active(&self, team_id: &str, job_id: Uuid, ttl_ms: u64) -> Result<(), LedgerError>;

    async fn crawl_push_active(
        &self,
        crawl_id: &str,
        job_id: Uuid,
        ttl_ms: u64,
    ) -> Result<(), LedgerError>;

    /// Explicit release on worker completion/failure (Data Model, "Ownership
    /// & lifecycle"; made an explicit primitive per SPEC_FULL.md §11.3).
    async fn remove_active(&self, team_id: &str, job_id: Uuid) -> Result<(), LedgerError>;

    async fn remove_crawl_active(&self, crawl_id: &str, job_id: Uuid) -> Result<(), LedgerError>;

    /// Count of entries with `expires_at > now`.
    async fn count_active(&self, team_id: &str, now: DateTime<Utc>) -> Result<u32, LedgerError>;

    async fn count_crawl_active(
        &self,
        crawl_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u32, LedgerError>;

    /// Removes entries with `expires_at <= now`. Must be called before each
    /// `count_active` used for an admission decision (spec.md §4.1).
    async fn clean_expired(&self, team_id: &str, now: DateTime<Utc>) -> Result<(), LedgerError>;

    /// Ordered by priority asc, enqueue_at asc. A duplicate `job_id` replaces
    /// the prior entry.
    async fn push_deferred(&self, team_id: &str, entry: DeferredEntry) -> Result<(), LedgerError>;

    async fn count_deferred(&self, team_id: &str) -> Result<u32, LedgerError>;

    /// Pops up to `n` entries in priority/enqueue order, atomically.
    async fn pop_deferred(&self, team_id: &str, n: u32) -> Result<Vec<DeferredEntry>, LedgerError>;

    /// Removes and returns any deferred entries whose `hold_deadline` has
    /// passed, independent of whether capacity has freed. Needed so the
    /// periodic sweep can honor "every deferred ad-hoc job is either
    /// promoted, or fails with timeout, within `hold_deadline`" even under
    /// sustained saturation (SPEC_FULL.md §11.2).
    async fn evict_expired_deferred(
        &self,
        team_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<DeferredEntry>, LedgerError>;

    /// Discovery hook for the periodic sweep trigger (SPEC_FULL.md §11.1).
    async fn list_tenants_with_deferred(&self) -> Result<Vec<String>, LedgerError>;

    /// Last-sent timestamp for a tenant's notification kind.
    async fn notification_last_sent(
        &self,
        team_id: &str,
        kind: &str,
    ) -> Result<Option<DateTime<Utc>>, LedgerError>;

    async fn notification_mark_sent(
        &self,
        team_id: &str,
        kind: &str,
        at: DateTime<Utc>,
    ) -> Result<(), LedgerError>;
}
