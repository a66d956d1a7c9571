//! In-memory Ledger double used by the unit and integration test suites.
//!
//! Implements the exact semantics of `RedisLedger` (ordering, idempotence,
//! TTL expiry) without a live store, so admission/dispatch/drain logic under
//! test runs against the same trait the production Redis-backed Ledger
//! implements (teacher pattern: `kernel::test_dependencies::TestDependencies`
//! swaps trait objects for fakes rather than stubbing behavior separately).

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::LedgerError;
use crate::types::DeferredEntry;

use super::Ledger;

#[derive(Default)]
struct State {
    active: HashMap<String, HashMap<Uuid, DateTime<Utc>>>,
    crawl_active: HashMap<String, HashMap<Uuid, DateTime<Utc>>>,
    deferred: HashMap<String, Vec<DeferredEntry>>,
    notify_last_sent: HashMap<String, HashMap<String, DateTime<Utc>>>,
}

#[derive(Default)]
pub struct InMemoryLedger {
    state: Mutex<State>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn sort_deferred(entries: &mut Vec<DeferredEntry>) {
        entries.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.enqueue_at.cmp(&b.enqueue_at)));
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn push_active(&self, team_id: &str, job_id: Uuid, ttl_ms: u64) -> Result<(), LedgerError> {
        let mut state = self.state.lock().unwrap();
        let expires_at = Utc::now() + chrono::Duration::milliseconds(ttl_ms as i64);
        state
            .active
            .entry(team_id.to_string())
            .or_default()
            .insert(job_id, expires_at);
        Ok(())
    }

    async fn crawl_push_active(
        &self,
        crawl_id: &str,
        job_id: Uuid,
        ttl_ms: u64,
    ) -> Result<(), LedgerError> {
        let mut state = self.state.lock().unwrap();
        let expires_at = Utc::now() + chrono::Duration::milliseconds(ttl_ms as i64);
        state
            .crawl_active
            .entry(crawl_id.to_string())
            .or_default()
            .insert(job_id, expires_at);
        Ok(())
    }

    async fn remove_active(&self, team_id: &str, job_id: Uuid) -> Result<(), LedgerError> {
        let mut state = self.state.lock().unwrap();
        if let Some(entries) = state.active.get_mut(team_id) {
            entries.remove(&job_id);
        }
        Ok(())
    }

    async fn remove_crawl_active(&self, crawl_id: &str, job_id: Uuid) -> Result<(), LedgerError> {
        let mut state = self.state.lock().unwrap();
        if let Some(entries) = state.crawl_active.get_mut(crawl_id) {
            entries.remove(&job_id);
        }
        Ok(())
    }

    async fn count_active(&self, team_id: &str, now: DateTime<Utc>) -> Result<u32, LedgerError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .active
            .get(team_id)
            .map(|entries| entries.values().filter(|&&exp| exp > now).count() as u32)
            .unwrap_or(0))
    }

    async fn count_crawl_active(
        &self,
        crawl_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u32, LedgerError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .crawl_active
            .get(crawl_id)
            .map(|entries| entries.values().filter(|&&exp| exp > now).count() as u32)
            .unwrap_or(0))
    }

    async fn clean_expired(&self, team_id: &str, now: DateTime<Utc>) -> Result<(), LedgerError> {
        let mut state = self.state.lock().unwrap();
        if let Some(entries) = state.active.get_mut(team_id) {
            entries.retain(|_, &mut exp| exp > now);
        }
        Ok(())
    }

    async fn push_deferred(&self, team_id: &str, entry: DeferredEntry) -> Result<(), LedgerError> {
        let mut state = self.state.lock().unwrap();
        let entries = state.deferred.entry(team_id.to_string()).or_default();
        entries.retain(|e| e.job_id != entry.job_id);
        entries.push(entry);
        Self::sort_deferred(entries);
        Ok(())
    }

    async fn count_deferred(&self, team_id: &str) -> Result<u32, LedgerError> {
        let state = self.state.lock().unwrap();
        Ok(state.deferred.get(team_id).map(|e| e.len() as u32).unwrap_or(0))
    }

    async fn pop_deferred(&self, team_id: &str, n: u32) -> Result<Vec<DeferredEntry>, LedgerError> {
        let mut state = self.state.lock().unwrap();
        let entries = state.deferred.entry(team_id.to_string()).or_default();
        let n = (n as usize).min(entries.len());
        Ok(entries.drain(0..n).collect())
    }

    async fn evict_expired_deferred(
        &self,
        team_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<DeferredEntry>, LedgerError> {
        let mut state = self.state.lock().unwrap();
        let entries = state.deferred.entry(team_id.to_string()).or_default();
        let (expired, kept): (Vec<_>, Vec<_>) = entries.drain(..).partition(|e| {
            e.hold_deadline.map(|deadline| deadline <= now).unwrap_or(false)
        });
        *entries = kept;
        Ok(expired)
    }

    async fn list_tenants_with_deferred(&self) -> Result<Vec<String>, LedgerError> {
        let state = self.state.lock().unwrap();
        let tenants: HashSet<&String> = state
            .deferred
            .iter()
            .filter(|(_, entries)| !entries.is_empty())
            .map(|(team, _)| team)
            .collect();
        Ok(tenants.into_iter().cloned().collect())
    }

    async fn notification_last_sent(
        &self,
        team_id: &str,
        kind: &str,
    ) -> Result<Option<DateTime<Utc>>, LedgerError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .notify_last_sent
            .get(team_id)
            .and_then(|kinds| kinds.get(kind))
            .copied())
    }

    async fn notification_mark_sent(
        &self,
        team_id: &str,
        kind: &str,
        at: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let mut state = self.state.lock().unwrap();
        state
            .notify_last_sent
            .entry(team_id.to_string())
            .or_default()
            .insert(kind.to_string(), at);
        Ok(())
    }
}
