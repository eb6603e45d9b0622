//! Periodic sweep jobs.
//!
//! These jobs keep the relay moving without producer traffic:
//! - polling the approval queue against the alert threshold
//! - draining both retry queues and replaying alerts parked during the cooldown
//! - flushing publish batches whose window elapsed
//! - sending the once-a-day summary
//!
//! Each job returns a short status token for logs. Jobs may overlap with producer calls
//! and with each other; the components they drive are safe under that.

use std::sync::Arc;
use std::time::Duration;

use chrono::Timelike;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::notification::{ApprovalNotifier, NotificationChannel, PublishNotifier};
use crate::store::{DurableStore, keys};
use crate::time::TimeSource;

/// Lifetime of the last-summary marker.
const SUMMARY_MARKER_TTL: Duration = Duration::from_secs(48 * 60 * 60);

/// The sweep jobs, runnable on their own or from [`SweepScheduler`].
pub struct SweepJobs {
    approval: Arc<ApprovalNotifier>,
    publish: Arc<PublishNotifier>,
    channel: Arc<dyn NotificationChannel>,
    store: Arc<dyn DurableStore>,
    clock: Arc<dyn TimeSource>,
}

impl SweepJobs {
    pub fn new(
        approval: Arc<ApprovalNotifier>,
        publish: Arc<PublishNotifier>,
        channel: Arc<dyn NotificationChannel>,
        store: Arc<dyn DurableStore>,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            approval,
            publish,
            channel,
            store,
            clock,
        }
    }

    /// Poll the approval queue and alert if it is over the threshold.
    pub async fn check_approval_queue(&self) -> String {
        let sent = self.approval.check_and_notify().await;
        format!("alert_sent={}", sent)
    }

    /// Run both retry queues, then replay any alert parked during the cooldown.
    pub async fn process_failed_notifications(&self) -> String {
        let approval = self.approval.retry_queue().retry_failed().await;
        let publish = self.publish.retry_queue().retry_failed().await;
        let replayed = self.approval.process_pending().await;

        format!(
            "approval_retries={} publish_retries={} deferred={} pending_replayed={}",
            approval.processed(),
            publish.processed(),
            approval.deferred + publish.deferred,
            replayed
        )
    }

    /// Flush the publish batch if it is due.
    pub async fn flush_expired_batches(&self) -> String {
        let flushed = self.publish.flush_expired_batch().await;
        format!("flushed={}", flushed)
    }

    /// Send today's summary unless it already went out.
    pub async fn send_daily_summary(&self) -> String {
        let today = self.clock.now().date_naive().to_string();

        match self.store.get(keys::DAILY_LAST_SUMMARY).await {
            Ok(Some(last)) if last == today => return "already_sent".to_string(),
            Ok(_) => {}
            Err(e) => {
                // Without the marker we could repeat the summary on every tick.
                warn!(error = %e, "Failed to read daily summary marker, skipping");
                return "skipped".to_string();
            }
        }

        let stats = self.publish.daily_stats(self.clock.now().date_naive()).await;
        let pending = match self.approval.queue_status().await {
            Ok(status) => status.total_pending,
            Err(e) => {
                warn!(error = %e, "Failed to read approval queue for daily summary");
                0
            }
        };

        let result = self
            .channel
            .send_daily_summary(stats.published, pending, stats.failed, stats.top_post.as_deref())
            .await;

        match result {
            Ok(()) => {
                if let Err(e) = self
                    .store
                    .set_with_ttl(keys::DAILY_LAST_SUMMARY, &today, SUMMARY_MARKER_TTL)
                    .await
                {
                    warn!(error = %e, "Failed to record daily summary marker");
                }
                info!(
                    published = stats.published,
                    pending,
                    failed = stats.failed,
                    "Daily summary sent"
                );
                "sent".to_string()
            }
            Err(e) => {
                warn!(error = %e, "Daily summary failed, will try again next sweep");
                format!("failed: {}", e)
            }
        }
    }
}

/// Drives [`SweepJobs`] on a fixed interval.
pub struct SweepScheduler {
    jobs: Arc<SweepJobs>,
    clock: Arc<dyn TimeSource>,
    interval: Duration,
    /// UTC hour from which the daily summary is due.
    daily_summary_hour: u32,
}

impl SweepScheduler {
    pub fn new(
        jobs: Arc<SweepJobs>,
        clock: Arc<dyn TimeSource>,
        interval: Duration,
        daily_summary_hour: u32,
    ) -> Self {
        Self {
            jobs,
            clock,
            interval,
            daily_summary_hour,
        }
    }

    /// Whether the daily summary may be sent at the current time.
    pub fn daily_summary_due(&self) -> bool {
        self.clock.now().hour() >= self.daily_summary_hour
    }

    /// Run every job once.
    pub async fn run_once(&self) {
        let approvals = self.jobs.check_approval_queue().await;
        debug!(status = %approvals, "Approval check done");

        let retries = self.jobs.process_failed_notifications().await;
        debug!(status = %retries, "Retry sweep done");

        let batches = self.jobs.flush_expired_batches().await;
        debug!(status = %batches, "Batch sweep done");

        if self.daily_summary_due() {
            let summary = self.jobs.send_daily_summary().await;
            debug!(status = %summary, "Daily summary check done");
        }
    }

    /// Spawn the sweep loop. The first sweep runs immediately.
    pub fn start(self: Arc<Self>, cancel_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_secs = self.interval.as_secs(), "Sweep scheduler started");

            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        info!("Sweep scheduler shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                }
            }
        })
    }
}
