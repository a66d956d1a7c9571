//! The Notification Gate (spec.md §4.6): rate-limited "concurrency limit
//! reached" events, fire-and-forget to the delivery channel so a slow or
//! failing transport never blocks admission (Design Notes: "Promise-style
//! fire-and-forget for the A/B mirror" generalizes to any side-effecting
//! notification here).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{error, info};

use crate::error::NotificationError;
use crate::ledger::Ledger;
use crate::types::NotificationKind;

/// Outbound notification channel. Out of scope per spec.md §1 ("Notification
/// delivery (email/transport)") beyond its interface (§6).
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send(&self, team_id: &str, kind: NotificationKind) -> Result<(), NotificationError>;
}

/// Logs the notification instead of delivering it. Useful for local wiring
/// and tests; a production deployment swaps in the real transport.
pub struct LoggingNotificationChannel;

#[async_trait]
impl NotificationChannel for LoggingNotificationChannel {
    async fn send(&self, team_id: &str, kind: NotificationKind) -> Result<(), NotificationError> {
        info!(team_id, kind = kind.as_str(), "would deliver notification");
        Ok(())
    }
}

pub struct NotificationGate<L: Ledger> {
    ledger: Arc<L>,
    channel: Arc<dyn NotificationChannel>,
    resend_interval: Duration,
}

impl<L: Ledger + 'static> NotificationGate<L> {
    pub fn new(ledger: Arc<L>, channel: Arc<dyn NotificationChannel>, resend_days: i64) -> Self {
        Self {
            ledger,
            channel,
            resend_interval: Duration::days(resend_days),
        }
    }

    /// Consults the per-tenant last-sent record and, outside the resend
    /// window, enqueues delivery asynchronously and updates the record.
    /// Delivery failures are logged, never propagated (spec.md §4.6, §7).
    pub async fn maybe_notify(&self, team_id: &str, kind: NotificationKind, now: DateTime<Utc>) {
        let last_sent = match self.ledger.notification_last_sent(team_id, kind.as_str()).await {
            Ok(v) => v,
            Err(e) => {
                error!(team_id, error = %e, "failed to read notification suppression record");
                return;
            }
        };

        if let Some(last_sent) = last_sent {
            if now - last_sent < self.resend_interval {
                return;
            }
        }

        if let Err(e) = self.ledger.notification_mark_sent(team_id, kind.as_str(), now).await {
            error!(team_id, error = %e, "failed to record notification suppression");
            return;
        }

        let channel = self.channel.clone();
        let team_id = team_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = channel.send(&team_id, kind).await {
                error!(team_id, error = %e, "notification delivery failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryLedger;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingChannel {
        sent: AtomicUsize,
    }

    #[async_trait]
    impl NotificationChannel for CountingChannel {
        async fn send(&self, _team_id: &str, _kind: NotificationKind) -> Result<(), NotificationError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn suppresses_within_resend_window() {
        let ledger = Arc::new(InMemoryLedger::new());
        let channel = Arc::new(CountingChannel { sent: AtomicUsize::new(0) });
        let gate = NotificationGate::new(ledger, channel.clone(), 15);

        let now = Utc::now();
        gate.maybe_notify("team-1", NotificationKind::ConcurrencyLimitReached, now).await;
        gate.maybe_notify(
            "team-1",
            NotificationKind::ConcurrencyLimitReached,
            now + Duration::days(1),
        )
        .await;

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(channel.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn resends_after_window_elapses() {
        let ledger = Arc::new(InMemoryLedger::new());
        let channel = Arc::new(CountingChannel { sent: AtomicUsize::new(0) });
        let gate = NotificationGate::new(ledger, channel.clone(), 15);

        let now = Utc::now();
        gate.maybe_notify("team-1", NotificationKind::ConcurrencyLimitReached, now).await;
        gate.maybe_notify(
            "team-1",
            NotificationKind::ConcurrencyLimitReached,
            now + Duration::days(16),
        )
        .await;

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(channel.sent.load(Ordering::SeqCst), 2);
    }
}
