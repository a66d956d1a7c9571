//! External directory lookups consulted by the Admission Controller: tenant
//! plan ceilings and crawl configuration. These are out-of-scope collaborators
//! per spec.md §1 — only their interfaces are specified here (§6).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::types::{ConcurrencyMode, CrawlRecord};

/// Resolves a tenant's plan-derived concurrency ceiling for a given mode.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// `None` means "no record" — the caller degrades to the default
    /// ceiling (spec.md §4.2, §7).
    async fn ceiling(&self, team_id: &str, mode: ConcurrencyMode) -> Option<u32>;
}

/// Resolves a crawl's configuration for the per-crawl ceiling gate.
#[async_trait]
pub trait CrawlDirectory: Send + Sync {
    /// `None` means "no record" — the caller treats the crawl as unbounded
    /// (spec.md §4.2 tie-break).
    async fn record(&self, crawl_id: &str) -> Option<CrawlRecord>;
}

/// Simple in-process directory double, keyed by (team_id, mode) / crawl_id.
/// Used by tests and by the example wiring in `bin/server.rs`.
#[derive(Default)]
pub struct StaticDirectory {
    ceilings: Mutex<HashMap<(String, ConcurrencyMode), u32>>,
    crawls: Mutex<HashMap<String, CrawlRecord>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ceiling(&self, team_id: impl Into<String>, mode: ConcurrencyMode, ceiling: u32) {
        self.ceilings.lock().unwrap().insert((team_id.into(), mode), ceiling);
    }

    pub fn set_crawl(&self, crawl_id: impl Into<String>, record: CrawlRecord) {
        self.crawls.lock().unwrap().insert(crawl_id.into(), record);
    }
}

#[async_trait]
impl TenantDirectory for StaticDirectory {
    async fn ceiling(&self, team_id: &str, mode: ConcurrencyMode) -> Option<u32> {
        self.ceilings.lock().unwrap().get(&(team_id.to_string(), mode)).copied()
    }
}

#[async_trait]
impl CrawlDirectory for StaticDirectory {
    async fn record(&self, crawl_id: &str) -> Option<CrawlRecord> {
        self.crawls.lock().unwrap().get(crawl_id).copied()
    }
}

/// Resolves the effective ceiling for admission: the directory's value, or
/// the crate-wide default (spec.md: "Missing tenant record ⇒ ceiling = 2").
pub fn effective_ceiling(directory_value: Option<u32>, default_ceiling: u32) -> u32 {
    directory_value.unwrap_or(default_ceiling)
}
