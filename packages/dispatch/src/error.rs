//! Typed error boundary for the admission/dispatch core.
//!
//! Mirrors the teacher's two-tier split: `thiserror` enums at collaborator
//! boundaries, `anyhow` at the wiring layer.

use thiserror::Error;

use crate::types::TransportableError;

/// Errors surfaced by the Concurrency Ledger's atomic primitives.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger store unavailable: {0}")]
    Unavailable(#[from] redis::RedisError),

    #[error("ledger store returned malformed data: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("ledger connection pool exhausted: {0}")]
    Pool(#[from] deadpool_redis::PoolError),
}

/// Errors from the Admission Controller.
#[derive(Error, Debug)]
pub enum AdmissionError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("tenant directory lookup failed: {0}")]
    Directory(String),
}

/// Errors from the external worker queue collaborator.
#[derive(Error, Debug)]
pub enum WorkerQueueError {
    #[error("worker queue unavailable: {0}")]
    Unavailable(String),
}

/// Errors from the Dispatcher.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("worker queue unavailable after admission; active entry will self-heal via TTL: {0}")]
    WorkerQueueUnavailable(#[from] WorkerQueueError),
}

/// Errors from the external blob store collaborator.
#[derive(Error, Debug)]
pub enum BlobStoreError {
    #[error("blob store unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced by `wait_for_job`.
#[derive(Error, Debug)]
pub enum WaitError {
    #[error("job never materialized in the worker queue")]
    ScrapeTimeoutInQueue,

    #[error("job did not complete before the wait deadline")]
    ScrapeTimeout,

    #[error("job completed but no inline result or blob was found")]
    ResultNotFound,

    #[error(transparent)]
    Transportable(#[from] TransportableError),

    #[error("scrape failed: {0}")]
    Generic(String),

    #[error(transparent)]
    WorkerQueue(#[from] WorkerQueueError),

    #[error(transparent)]
    BlobStore(#[from] BlobStoreError),
}

/// Errors from the Notification Gate's suppression store lookups.
#[derive(Error, Debug)]
pub enum NotificationError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("notification delivery failed: {0}")]
    Delivery(String),
}
