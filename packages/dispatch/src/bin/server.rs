//! `dispatch-server`: runs the periodic Drainer sweep against a Redis-backed
//! Concurrency Ledger and exposes a health-check endpoint.

use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use deadpool_redis::{Config as RedisPoolConfig, Runtime};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use dispatch_core::config::Config;
use dispatch_core::directory::StaticDirectory;
use dispatch_core::dispatcher::Dispatcher;
use dispatch_core::drainer::Drainer;
use dispatch_core::ledger::RedisLedger;
use dispatch_core::notify::{LoggingNotificationChannel, NotificationGate};
use dispatch_core::worker_queue::LocalWorkerQueue;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;

    let pool = RedisPoolConfig::from_url(&config.redis_url)
        .create_pool(Some(Runtime::Tokio1))?;

    let ledger = Arc::new(RedisLedger::new(pool));
    // Tenant/crawl directories and the worker queue are external
    // collaborators (spec.md §1); this binary wires the in-process doubles
    // so the drain sweep and health check are runnable standalone.
    let tenants = Arc::new(StaticDirectory::new());
    let crawls = Arc::new(StaticDirectory::new());
    let queue = Arc::new(LocalWorkerQueue::new());
    let notifier = NotificationGate::new(
        ledger.clone(),
        Arc::new(LoggingNotificationChannel),
        config.notification_resend_days,
    );

    let dispatcher = Arc::new(Dispatcher::new(
        ledger.clone(),
        tenants.clone(),
        crawls.clone(),
        queue.clone(),
        notifier,
        config.default_concurrency_ceiling,
        config.active_entry_ttl_ms,
    ));
    let admission = Arc::new(dispatch_core::AdmissionController::new(
        ledger.clone(),
        tenants,
        crawls,
        config.default_concurrency_ceiling,
    ));
    let drainer = Arc::new(Drainer::new(
        ledger,
        admission,
        dispatcher,
        queue,
        config.default_concurrency_ceiling,
    ));

    let sweep_interval = Duration::from_millis(config.drain_sweep_interval_ms);
    let sweep_drainer = drainer.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            ticker.tick().await;
            if let Err(e) = sweep_drainer.sweep().await {
                error!(error = %e, "drain sweep failed");
            }
        }
    });

    let app = Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .layer(TraceLayer::new_for_http());
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(port = config.port, "dispatch-server listening");
    axum::serve(listener, app).await?;

    Ok(())
}
