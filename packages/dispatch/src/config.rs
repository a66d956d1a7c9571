//! Application configuration loaded from environment variables.

use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

use crate::types::{
    DEFAULT_ACTIVE_ENTRY_TTL_MS, DEFAULT_CONCURRENCY_CEILING, DEFAULT_JOB_TIMEOUT_MS,
    DEFAULT_WAIT_TIMEOUT_MS,
};

/// Configuration surface named in spec.md §6, plus the ambient sweep cadence
/// added in SPEC_FULL.md §10.3.
#[derive(Debug, Clone)]
pub struct Config {
    pub redis_url: String,
    pub port: u16,
    pub default_concurrency_ceiling: u32,
    pub active_entry_ttl_ms: u64,
    pub scrape_timeout_ms: u64,
    pub wait_timeout_ms: u64,
    pub notification_resend_days: i64,
    pub drain_sweep_interval_ms: u64,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("{key} must be a valid value: {e}")),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to the
    /// defaults named in spec.md where a variable is unset.
    pub fn from_env() -> Result<Self> {
        let _ = dotenv();

        Ok(Self {
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            port: env_or("PORT", 8080u16).context("PORT must be a valid number")?,
            default_concurrency_ceiling: env_or(
                "DEFAULT_CONCURRENCY_CEILING",
                DEFAULT_CONCURRENCY_CEILING,
            )
            .context("DEFAULT_CONCURRENCY_CEILING must be a valid number")?,
            active_entry_ttl_ms: env_or("ACTIVE_ENTRY_TTL_MS", DEFAULT_ACTIVE_ENTRY_TTL_MS)
                .context("ACTIVE_ENTRY_TTL_MS must be a valid number")?,
            scrape_timeout_ms: env_or("SCRAPE_TIMEOUT_MS", DEFAULT_JOB_TIMEOUT_MS)
                .context("SCRAPE_TIMEOUT_MS must be a valid number")?,
            wait_timeout_ms: env_or("WAIT_TIMEOUT_MS", DEFAULT_WAIT_TIMEOUT_MS)
                .context("WAIT_TIMEOUT_MS must be a valid number")?,
            notification_resend_days: env_or("NOTIFICATION_RESEND_DAYS", 15i64)
                .context("NOTIFICATION_RESEND_DAYS must be a valid number")?,
            drain_sweep_interval_ms: env_or("DRAIN_SWEEP_INTERVAL_MS", 5_000u64)
                .context("DRAIN_SWEEP_INTERVAL_MS must be a valid number")?,
        })
    }
}
