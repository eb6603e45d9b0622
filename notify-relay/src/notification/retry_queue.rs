//! Durable retry queue with exponential backoff.
//!
//! Each entry moves `PENDING -> RETRYING -> {sent and removed | abandoned and removed}`.
//! A periodic sweep ([`RetryQueue::retry_failed`]) walks the stored list in order and
//! resends whatever is due, backing off per attempt and giving up after
//! [`MAX_RETRY_ATTEMPTS`].
//!
//! A sweep claims an entry by removing it from the list before sending it; entries that
//! still need work are pushed back. Two overlapping sweeps therefore never send the
//! same entry twice.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info, warn};

use super::channels::{ChannelError, ChannelResult, NotificationChannel};
use super::event_bus::EventBus;
use super::events::{NotificationEvent, NotificationEventType};
use crate::store::DurableStore;
use crate::time::TimeSource;

/// Attempts after which an entry is abandoned.
pub const MAX_RETRY_ATTEMPTS: u32 = 5;

/// Lifetime of a retry queue key, refreshed on every push.
const QUEUE_TTL: StdDuration = StdDuration::from_secs(24 * 60 * 60);

/// Wait before the next attempt, indexed by attempts made so far.
pub fn get_backoff_seconds(attempts: u32) -> i64 {
    match attempts {
        1 => 60,
        2 => 300,
        3 => 900,
        4 => 3600,
        _ => 3600,
    }
}

/// Values the channel needs that are not part of the stored payload.
#[derive(Debug, Clone, Default)]
pub struct DeliveryContext {
    pub dashboard_url: String,
}

/// Something that can be parked in a retry queue and resent later.
#[async_trait]
pub trait RetryPayload: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Short name used in logs and events.
    fn kind(&self) -> &'static str;

    /// Resend through `channel`.
    async fn deliver(
        &self,
        channel: &dyn NotificationChannel,
        context: &DeliveryContext,
    ) -> ChannelResult<()>;
}

/// A stored retry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedNotification<P> {
    #[serde(flatten)]
    pub payload: P,
    pub attempts: u32,
    pub queued_at: DateTime<Utc>,
    pub last_attempt: Option<DateTime<Utc>>,
}

impl<P> QueuedNotification<P> {
    pub fn new(payload: P, queued_at: DateTime<Utc>) -> Self {
        Self {
            payload,
            attempts: 0,
            queued_at,
            last_attempt: None,
        }
    }

    /// Whether the backoff for the current attempt count has elapsed.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        match self.last_attempt {
            None => true,
            Some(last) => now >= last + Duration::seconds(get_backoff_seconds(self.attempts)),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= MAX_RETRY_ATTEMPTS
    }
}

/// Outcome counts of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetrySweepReport {
    /// Delivered and removed.
    pub sent: usize,
    /// Removed without delivery (attempt ceiling, bad credentials, corrupt entry).
    pub abandoned: usize,
    /// Failed again and pushed back with one more attempt.
    pub rescheduled: usize,
    /// Throttled by the channel and left as they were.
    pub deferred: usize,
    /// Still inside their backoff window.
    pub skipped: usize,
}

impl RetrySweepReport {
    /// Entries acted upon: sent, abandoned or rescheduled.
    pub fn processed(&self) -> usize {
        self.sent + self.abandoned + self.rescheduled
    }
}

/// A durable list of notifications waiting to be resent.
pub struct RetryQueue<P> {
    key: &'static str,
    store: Arc<dyn DurableStore>,
    clock: Arc<dyn TimeSource>,
    channel: Arc<dyn NotificationChannel>,
    context: DeliveryContext,
    event_bus: Option<Arc<EventBus>>,
    _payload: PhantomData<fn() -> P>,
}

impl<P: RetryPayload> RetryQueue<P> {
    pub fn new(
        key: &'static str,
        store: Arc<dyn DurableStore>,
        clock: Arc<dyn TimeSource>,
        channel: Arc<dyn NotificationChannel>,
        context: DeliveryContext,
    ) -> Self {
        Self {
            key,
            store,
            clock,
            channel,
            context,
            event_bus: None,
            _payload: PhantomData,
        }
    }

    /// Report retry outcomes on the event bus.
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Store key of this queue.
    pub fn key(&self) -> &'static str {
        self.key
    }

    /// Park a payload whose first send failed. Returns whether it was stored.
    pub async fn queue_failed(&self, payload: P) -> bool {
        let kind = payload.kind();
        let entry = QueuedNotification::new(payload, self.clock.now());
        match self.push(&entry).await {
            Ok(()) => {
                info!(queue = self.key, kind, "Notification queued for retry");
                true
            }
            Err(e) => {
                warn!(queue = self.key, kind, error = %e, "Failed to queue notification for retry");
                false
            }
        }
    }

    async fn push(&self, entry: &QueuedNotification<P>) -> crate::Result<()> {
        let raw = serde_json::to_string(entry)?;
        self.store.list_push(self.key, &raw).await?;
        if let Err(e) = self.store.expire(self.key, QUEUE_TTL).await {
            warn!(queue = self.key, error = %e, "Failed to refresh retry queue expiry");
        }
        Ok(())
    }

    /// Number of entries waiting, `0` if the store is unreachable.
    pub async fn get_failed_count(&self) -> usize {
        self.store.list_length(self.key).await.unwrap_or_else(|e| {
            warn!(queue = self.key, error = %e, "Failed to read retry queue length");
            0
        })
    }

    /// Decoded entries in store order. Undecodable entries are skipped.
    pub async fn entries(&self) -> Vec<QueuedNotification<P>> {
        match self.store.list_range(self.key, 0, -1).await {
            Ok(raw) => raw
                .iter()
                .filter_map(|r| serde_json::from_str(r).ok())
                .collect(),
            Err(e) => {
                warn!(queue = self.key, error = %e, "Failed to read retry queue");
                Vec::new()
            }
        }
    }

    /// Resend every entry whose backoff has elapsed.
    pub async fn retry_failed(&self) -> RetrySweepReport {
        let mut report = RetrySweepReport::default();

        let raw_entries = match self.store.list_range(self.key, 0, -1).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(queue = self.key, error = %e, "Failed to read retry queue, skipping sweep");
                return report;
            }
        };

        for raw in raw_entries {
            let entry: QueuedNotification<P> = match serde_json::from_str(&raw) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(queue = self.key, error = %e, "Dropping undecodable retry entry");
                    if self.claim(&raw).await {
                        report.abandoned += 1;
                    }
                    continue;
                }
            };

            let now = self.clock.now();

            if entry.is_exhausted() {
                if self.claim(&raw).await {
                    warn!(
                        queue = self.key,
                        kind = entry.payload.kind(),
                        attempts = entry.attempts,
                        "Abandoning notification after max retries"
                    );
                    self.emit_abandoned(&entry, "max retries exceeded");
                    report.abandoned += 1;
                }
                continue;
            }

            if !entry.is_ready(now) {
                debug!(
                    queue = self.key,
                    attempts = entry.attempts,
                    "Retry entry still backing off"
                );
                report.skipped += 1;
                continue;
            }

            // Another sweep got there first.
            if !self.claim(&raw).await {
                continue;
            }

            match entry.payload.deliver(self.channel.as_ref(), &self.context).await {
                Ok(()) => {
                    info!(
                        queue = self.key,
                        kind = entry.payload.kind(),
                        attempts = entry.attempts,
                        "Retried notification delivered"
                    );
                    self.emit(NotificationEventType::Sent, &entry, json!({ "retried": true }));
                    report.sent += 1;
                }
                Err(ChannelError::RateLimited { retry_after }) => {
                    info!(
                        queue = self.key,
                        retry_after = ?retry_after,
                        "Channel rate limited retry, leaving entry for next sweep"
                    );
                    if let Err(e) = self.restore(&raw).await {
                        warn!(queue = self.key, error = %e, "Failed to restore throttled retry entry");
                    }
                    report.deferred += 1;
                }
                Err(ChannelError::Unauthorized(msg)) => {
                    error!(
                        queue = self.key,
                        kind = entry.payload.kind(),
                        error = %msg,
                        "Channel rejected credentials, abandoning notification"
                    );
                    let mut abandoned = entry;
                    abandoned.attempts = MAX_RETRY_ATTEMPTS;
                    abandoned.last_attempt = Some(now);
                    self.emit_abandoned(&abandoned, "unauthorized");
                    report.abandoned += 1;
                }
                Err(e) => {
                    let mut updated = entry;
                    updated.attempts += 1;
                    updated.last_attempt = Some(now);
                    warn!(
                        queue = self.key,
                        kind = updated.payload.kind(),
                        attempts = updated.attempts,
                        error = %e,
                        "Retry failed, rescheduling"
                    );
                    if let Err(e) = self.push(&updated).await {
                        warn!(queue = self.key, error = %e, "Failed to reschedule retry entry");
                    }
                    self.emit(
                        NotificationEventType::QueuedForRetry,
                        &updated,
                        json!({ "error": e.to_string() }),
                    );
                    report.rescheduled += 1;
                }
            }
        }

        if report != RetrySweepReport::default() {
            info!(
                queue = self.key,
                sent = report.sent,
                abandoned = report.abandoned,
                rescheduled = report.rescheduled,
                deferred = report.deferred,
                skipped = report.skipped,
                "Retry sweep finished"
            );
        }
        report
    }

    /// Remove one copy of `raw`. `true` if this caller removed it.
    async fn claim(&self, raw: &str) -> bool {
        match self.store.list_remove(self.key, raw, 1).await {
            Ok(removed) => removed > 0,
            Err(e) => {
                warn!(queue = self.key, error = %e, "Failed to claim retry entry");
                false
            }
        }
    }

    async fn restore(&self, raw: &str) -> crate::Result<()> {
        self.store.list_push(self.key, raw).await?;
        self.store.expire(self.key, QUEUE_TTL).await?;
        Ok(())
    }

    fn emit(
        &self,
        event_type: NotificationEventType,
        entry: &QueuedNotification<P>,
        extra: serde_json::Value,
    ) {
        let Some(bus) = &self.event_bus else {
            return;
        };
        let mut data = json!({
            "queue": self.key,
            "kind": entry.payload.kind(),
            "attempts": entry.attempts,
        });
        if let (Some(map), serde_json::Value::Object(extra)) = (data.as_object_mut(), extra) {
            map.extend(extra);
        }
        bus.emit(NotificationEvent::at(event_type, data, self.clock.now()));
    }

    fn emit_abandoned(&self, entry: &QueuedNotification<P>, reason: &str) {
        self.emit(
            NotificationEventType::Failed,
            entry,
            json!({ "abandoned": true, "reason": reason }),
        );
    }
}
