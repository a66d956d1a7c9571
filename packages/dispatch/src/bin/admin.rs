//! `dispatch-admin`: a small operator CLI for the job admission/dispatch
//! layer (`sweep`, `inspect`), paired with `dispatch-server` the same way the
//! teacher pairs its server binary with a clap-based operator CLI (see
//! DESIGN.md's grounding entry for this module).

use std::sync::Arc;

use clap::{Parser, Subcommand};
use deadpool_redis::{Config as RedisPoolConfig, Runtime};
use tracing::info;

use dispatch_core::admission::AdmissionController;
use dispatch_core::config::Config;
use dispatch_core::directory::StaticDirectory;
use dispatch_core::dispatcher::Dispatcher;
use dispatch_core::drainer::Drainer;
use dispatch_core::ledger::{Ledger, RedisLedger};
use dispatch_core::notify::{LoggingNotificationChannel, NotificationGate};
use dispatch_core::worker_queue::LocalWorkerQueue;

#[derive(Parser)]
#[command(name = "dispatch-admin")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one drain sweep across every tenant with a deferred backlog.
    Sweep,
    /// Print a tenant's current active/deferred counts.
    Inspect {
        #[arg(long)]
        team_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let pool = RedisPoolConfig::from_url(&config.redis_url).create_pool(Some(Runtime::Tokio1))?;
    let ledger = Arc::new(RedisLedger::new(pool));

    match cli.command {
        Command::Sweep => {
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
            let admission = Arc::new(AdmissionController::new(
                ledger.clone(),
                tenants,
                crawls,
                config.default_concurrency_ceiling,
            ));
            let drainer = Drainer::new(
                ledger,
                admission,
                dispatcher,
                queue,
                config.default_concurrency_ceiling,
            );
            let promoted = drainer.sweep().await?;
            info!(promoted, "sweep complete");
            println!("promoted {promoted} deferred jobs");
        }
        Command::Inspect { team_id } => {
            let now = chrono::Utc::now();
            let active = ledger.count_active(&team_id, now).await?;
            let deferred = ledger.count_deferred(&team_id).await?;
            println!("team_id={team_id} active={active} deferred={deferred}");
        }
    }

    Ok(())
}
