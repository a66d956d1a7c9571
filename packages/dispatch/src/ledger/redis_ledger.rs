//! Redis-backed Concurrency Ledger.
//!
//! Active-job sets are Redis sorted sets keyed by tenant/crawl, scored by
//! expiry (epoch millis) so `count_active`/`clean_expired` are single
//! `ZCOUNT`/`ZREMRANGEBYSCORE` calls. Deferred entries live in three
//! structures per tenant so admission order, payload lookup and timeout
//! eviction are each O(log N) or O(1): an `order` zset (priority,
//! enqueue_at), a `meta` hash (job_id -> serialized `DeferredEntry`), and a
//! `deadlines` zset indexing only entries that have a `hold_deadline`.
//! Pop/evict mutate all three atomically via Lua scripts, since a Redis
//! cluster can have many concurrent admitter processes (spec.md §5).

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use redis::AsyncCommands;
use uuid::Uuid;

use crate::error::LedgerError;
use crate::types::DeferredEntry;

use super::Ledger;

const TENANTS_WITH_DEFERRED_KEY: &str = "ledger:tenants_with_deferred";

pub struct RedisLedger {
    pool: deadpool_redis::Pool,
}

impl RedisLedger {
    pub fn new(pool: deadpool_redis::Pool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection, LedgerError> {
        Ok(self.pool.get().await?)
    }

    fn active_key(team_id: &str) -> String {
        format!("ledger:active:{team_id}")
    }

    fn crawl_active_key(crawl_id: &str) -> String {
        format!("ledger:crawl_active:{crawl_id}")
    }

    fn order_key(team_id: &str) -> String {
        format!("ledger:deferred:{team_id}:order")
    }

    fn meta_key(team_id: &str) -> String {
        format!("ledger:deferred:{team_id}:meta")
    }

    fn deadlines_key(team_id: &str) -> String {
        format!("ledger:deferred:{team_id}:deadlines")
    }

    fn notify_key(team_id: &str) -> String {
        format!("ledger:notify:{team_id}")
    }

    fn order_score(priority: i32, enqueue_at: DateTime<Utc>) -> f64 {
        // Priority dominates; enqueue_at breaks ties within a priority band.
        // Valid until roughly year 2255 (enqueue_at millis < 1e13).
        (priority as f64) * 1e13 + (enqueue_at.timestamp_millis() as f64)
    }
}

const POP_SCRIPT: &str = r#"
local ids = redis.call('ZRANGE', KEYS[1], 0, tonumber(ARGV[1]) - 1)
if #ids == 0 then return {} end
local metas = redis.call('HMGET', KEYS[2], unpack(ids))
redis.call('ZREM', KEYS[1], unpack(ids))
redis.call('HDEL', KEYS[2], unpack(ids))
redis.call('ZREM', KEYS[3], unpack(ids))
if redis.call('ZCARD', KEYS[1]) == 0 then
  redis.call('SREM', KEYS[4], ARGV[2])
end
return metas
"#;

const EVICT_SCRIPT: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[3], '-inf', ARGV[1])
if #ids == 0 then return {} end
local metas = redis.call('HMGET', KEYS[2], unpack(ids))
redis.call('ZREM', KEYS[1], unpack(ids))
redis.call('HDEL', KEYS[2], unpack(ids))
redis.call('ZREM', KEYS[3], unpack(ids))
if redis.call('ZCARD', KEYS[1]) == 0 then
  redis.call('SREM', KEYS[4], ARGV[2])
end
return metas
"#;

fn parse_metas(raw: Vec<Option<String>>) -> Result<Vec<DeferredEntry>, LedgerError> {
    raw.into_iter()
        .flatten()
        .map(|s| serde_json::from_str::<DeferredEntry>(&s).map_err(LedgerError::from))
        .collect()
}

#[async_trait]
impl Ledger for RedisLedger {
    async fn push_active(&self, team_id: &str, job_id: Uuid, ttl_ms: u64) -> Result<(), LedgerError> {
        let mut conn = self.conn().await?;
        let expires_at = (Utc::now().timestamp_millis() + ttl_ms as i64) as f64;
        conn.zadd::<_, _, _, ()>(Self::active_key(team_id), job_id.to_string(), expires_at)
            .await?;
        Ok(())
    }

    async fn crawl_push_active(
        &self,
        crawl_id: &str,
        job_id: Uuid,
        ttl_ms: u64,
    ) -> Result<(), LedgerError> {
        let mut conn = self.conn().await?;
        let expires_at = (Utc::now().timestamp_millis() + ttl_ms as i64) as f64;
        conn.zadd::<_, _, _, ()>(Self::crawl_active_key(crawl_id), job_id.to_string(), expires_at)
            .await?;
        Ok(())
    }

    async fn remove_active(&self, team_id: &str, job_id: Uuid) -> Result<(), LedgerError> {
        let mut conn = self.conn().await?;
        conn.zrem::<_, _, ()>(Self::active_key(team_id), job_id.to_string())
            .await?;
        Ok(())
    }

    async fn remove_crawl_active(&self, crawl_id: &str, job_id: Uuid) -> Result<(), LedgerError> {
        let mut conn = self.conn().await?;
        conn.zrem::<_, _, ()>(Self::crawl_active_key(crawl_id), job_id.to_string())
            .await?;
        Ok(())
    }

    async fn count_active(&self, team_id: &str, now: DateTime<Utc>) -> Result<u32, LedgerError> {
        let mut conn = self.conn().await?;
        let count: u32 = conn
            .zcount(
                Self::active_key(team_id),
                format!("({}", now.timestamp_millis()),
                "+inf",
            )
            .await?;
        Ok(count)
    }

    async fn count_crawl_active(
        &self,
        crawl_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u32, LedgerError> {
        let mut conn = self.conn().await?;
        let count: u32 = conn
            .zcount(
                Self::crawl_active_key(crawl_id),
                format!("({}", now.timestamp_millis()),
                "+inf",
            )
            .await?;
        Ok(count)
    }

    async fn clean_expired(&self, team_id: &str, now: DateTime<Utc>) -> Result<(), LedgerError> {
        let mut conn = self.conn().await?;
        conn.zrembyscore::<_, _, _, ()>(Self::active_key(team_id), "-inf", now.timestamp_millis())
            .await?;
        Ok(())
    }

    async fn push_deferred(&self, team_id: &str, entry: DeferredEntry) -> Result<(), LedgerError> {
        let mut conn = self.conn().await?;
        let order_score = Self::order_score(entry.priority, entry.enqueue_at);
        let job_id = entry.job_id.to_string();
        let payload = serde_json::to_string(&entry)?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .zadd(Self::order_key(team_id), &job_id, order_score)
            .hset(Self::meta_key(team_id), &job_id, &payload)
            .sadd(TENANTS_WITH_DEFERRED_KEY, team_id);

        if let Some(deadline) = entry.hold_deadline {
            pipe.zadd(Self::deadlines_key(team_id), &job_id, deadline.timestamp_millis());
        } else {
            pipe.zrem(Self::deadlines_key(team_id), &job_id);
        }

        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn count_deferred(&self, team_id: &str) -> Result<u32, LedgerError> {
        let mut conn = self.conn().await?;
        let count: u32 = conn.zcard(Self::order_key(team_id)).await?;
        Ok(count)
    }

    async fn pop_deferred(&self, team_id: &str, n: u32) -> Result<Vec<DeferredEntry>, LedgerError> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        let raw: Vec<Option<String>> = redis::Script::new(POP_SCRIPT)
            .key(Self::order_key(team_id))
            .key(Self::meta_key(team_id))
            .key(Self::deadlines_key(team_id))
            .key(TENANTS_WITH_DEFERRED_KEY)
            .arg(n)
            .arg(team_id)
            .invoke_async(&mut conn)
            .await?;
        parse_metas(raw)
    }

    async fn evict_expired_deferred(
        &self,
        team_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<DeferredEntry>, LedgerError> {
        let mut conn = self.conn().await?;
        let raw: Vec<Option<String>> = redis::Script::new(EVICT_SCRIPT)
            .key(Self::order_key(team_id))
            .key(Self::meta_key(team_id))
            .key(Self::deadlines_key(team_id))
            .key(TENANTS_WITH_DEFERRED_KEY)
            .arg(now.timestamp_millis())
            .arg(team_id)
            .invoke_async(&mut conn)
            .await?;
        parse_metas(raw)
    }

    async fn list_tenants_with_deferred(&self) -> Result<Vec<String>, LedgerError> {
        let mut conn = self.conn().await?;
        let tenants: Vec<String> = conn.smembers(TENANTS_WITH_DEFERRED_KEY).await?;
        Ok(tenants)
    }

    async fn notification_last_sent(
        &self,
        team_id: &str,
        kind: &str,
    ) -> Result<Option<DateTime<Utc>>, LedgerError> {
        let mut conn = self.conn().await?;
        let raw: Option<i64> = conn.hget(Self::notify_key(team_id), kind).await?;
        Ok(raw.and_then(|millis| Utc.timestamp_millis_opt(millis).single()))
    }

    async fn notification_mark_sent(
        &self,
        team_id: &str,
        kind: &str,
        at: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let mut conn = self.conn().await?;
        conn.hset::<_, _, _, ()>(Self::notify_key(team_id), kind, at.timestamp_millis())
            .await?;
        Ok(())
    }
}
