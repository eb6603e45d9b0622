//! Publish outcome notifications.
//!
//! Successes are coalesced by the [`Batcher`]; failures are always sent straight away.
//! Anything the channel refuses is handed to the publish retry queue as a
//! [`PublishDelivery`], so a failed batch is retried as a batch.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use super::batcher::{BatchAdd, Batcher};
use super::channels::{ChannelResult, NotificationChannel};
use super::event_bus::EventBus;
use super::events::{NotificationEvent, NotificationEventType};
use super::retry_queue::{DeliveryContext, RetryPayload, RetryQueue};
use super::types::{BatchEntry, PublishFailure, PublishedPost};
use crate::store::{DurableStore, keys};
use crate::time::TimeSource;

/// Lifetime of the per-day statistics lists.
const DAILY_STATS_TTL: StdDuration = StdDuration::from_secs(48 * 60 * 60);

/// A publish notification parked for retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PublishDelivery {
    Failure(PublishFailure),
    Success(BatchEntry),
    Batch { entries: Vec<BatchEntry> },
}

#[async_trait]
impl RetryPayload for PublishDelivery {
    fn kind(&self) -> &'static str {
        match self {
            Self::Failure(_) => "publish_failure",
            Self::Success(_) => "publish_success",
            Self::Batch { .. } => "publish_batch",
        }
    }

    async fn deliver(
        &self,
        channel: &dyn NotificationChannel,
        _context: &DeliveryContext,
    ) -> ChannelResult<()> {
        match self {
            Self::Failure(failure) => channel.send_publish_failure(failure).await,
            Self::Success(entry) => {
                channel
                    .send_publish_success(
                        &entry.title,
                        &entry.target_url,
                        entry.publish_time,
                        &entry.caption_excerpt,
                    )
                    .await
            }
            Self::Batch { entries } => channel.send_publish_batch(entries).await,
        }
    }
}

/// Per-day publishing statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DailyStats {
    pub published: usize,
    pub failed: usize,
    /// Title of the most recently published post.
    pub top_post: Option<String>,
}

/// Turns publish outcomes into operator notifications.
pub struct PublishNotifier {
    enabled: bool,
    channel: Arc<dyn NotificationChannel>,
    batcher: Batcher,
    retry_queue: RetryQueue<PublishDelivery>,
    store: Arc<dyn DurableStore>,
    event_bus: Arc<EventBus>,
    clock: Arc<dyn TimeSource>,
}

impl PublishNotifier {
    pub fn new(
        enabled: bool,
        channel: Arc<dyn NotificationChannel>,
        batcher: Batcher,
        retry_queue: RetryQueue<PublishDelivery>,
        store: Arc<dyn DurableStore>,
        event_bus: Arc<EventBus>,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            enabled,
            channel,
            batcher,
            retry_queue,
            store,
            event_bus,
            clock,
        }
    }

    pub fn batcher(&self) -> &Batcher {
        &self.batcher
    }

    pub fn retry_queue(&self) -> &RetryQueue<PublishDelivery> {
        &self.retry_queue
    }

    /// Report a successful publish.
    ///
    /// Returns `true` when the post was batched or delivered, `false` when disabled or
    /// when the flush failed and was queued for retry.
    pub async fn notify_publish_success(&self, post: &PublishedPost) -> bool {
        if !self.enabled {
            return false;
        }

        let entry = BatchEntry::from(post);
        self.record_daily(keys::daily_published, &post.title).await;
        self.emit(
            NotificationEventType::PublishSuccess,
            json!({
                "item_id": entry.item_id,
                "title": entry.title,
                "target_url": entry.target_url,
                "publish_time": entry.publish_time,
            }),
        );

        match self.batcher.add_to_batch(&entry).await {
            BatchAdd::Batched => {
                debug!(item_id = %entry.item_id, "Publish success batched");
                true
            }
            // A concurrent flush may already have claimed this entry; it sends it then.
            BatchAdd::Due => {
                let entries = self.batcher.get_and_clear_batch().await;
                self.send_entries(entries).await
            }
            BatchAdd::NotStored => {
                let mut entries = self.batcher.get_and_clear_batch().await;
                entries.push(entry);
                self.send_entries(entries).await
            }
        }
    }

    /// Report a failed publish. Failures are never batched.
    pub async fn notify_publish_failed(&self, failure: &PublishFailure) -> bool {
        if !self.enabled {
            return false;
        }

        self.record_daily(keys::daily_failed, &failure.title).await;
        self.emit(
            NotificationEventType::PublishFailed,
            json!({
                "item_id": failure.item_id,
                "title": failure.title,
                "reason": failure.reason,
                "error_kind": failure.error_kind,
            }),
        );

        match self.channel.send_publish_failure(failure).await {
            Ok(()) => {
                info!(item_id = %failure.item_id, error_kind = %failure.error_kind, "Publish failure notification sent");
                self.emit(
                    NotificationEventType::Sent,
                    json!({ "kind": "publish_failure", "item_id": failure.item_id }),
                );
                true
            }
            Err(e) => {
                warn!(item_id = %failure.item_id, error = %e, "Publish failure notification failed, queueing for retry");
                self.park(PublishDelivery::Failure(failure.clone()), &e.to_string())
                    .await;
                false
            }
        }
    }

    /// Flush whatever is in the batch right now. Returns the number of entries taken.
    pub async fn flush_batch(&self) -> usize {
        let entries = self.batcher.get_and_clear_batch().await;
        let count = entries.len();
        if count > 0 {
            self.send_entries(entries).await;
        }
        count
    }

    /// Flush the batch if its window has elapsed or it was orphaned.
    pub async fn flush_expired_batch(&self) -> usize {
        if !self.enabled || !self.batcher.is_window_expired().await {
            return 0;
        }
        self.flush_batch().await
    }

    /// One entry goes out on its own, several as a single batch message.
    async fn send_entries(&self, mut entries: Vec<BatchEntry>) -> bool {
        let (result, delivery) = match entries.len() {
            0 => return true,
            1 => {
                let entry = entries.remove(0);
                let result = self
                    .channel
                    .send_publish_success(
                        &entry.title,
                        &entry.target_url,
                        entry.publish_time,
                        &entry.caption_excerpt,
                    )
                    .await;
                (result, PublishDelivery::Success(entry))
            }
            _ => {
                let result = self.channel.send_publish_batch(&entries).await;
                (result, PublishDelivery::Batch { entries })
            }
        };

        let size = match &delivery {
            PublishDelivery::Batch { entries } => entries.len(),
            _ => 1,
        };

        match result {
            Ok(()) => {
                info!(entries = size, "Publish success notification sent");
                self.emit(
                    NotificationEventType::Sent,
                    json!({ "kind": delivery.kind(), "entries": size }),
                );
                true
            }
            Err(e) => {
                warn!(entries = size, error = %e, "Publish success notification failed, queueing for retry");
                self.park(delivery, &e.to_string()).await;
                false
            }
        }
    }

    async fn park(&self, delivery: PublishDelivery, error: &str) {
        let kind = delivery.kind();
        self.emit(
            NotificationEventType::Failed,
            json!({ "kind": kind, "error": error }),
        );
        if self.retry_queue.queue_failed(delivery).await {
            self.emit(
                NotificationEventType::QueuedForRetry,
                json!({ "kind": kind }),
            );
        }
    }

    fn today(&self) -> String {
        self.clock.now().date_naive().to_string()
    }

    async fn record_daily(&self, key_for: fn(&str) -> String, title: &str) {
        let key = key_for(&self.today());
        if let Err(e) = self.store.list_push(&key, title).await {
            warn!(key = %key, error = %e, "Failed to record daily publish statistic");
            return;
        }
        if let Err(e) = self.store.expire(&key, DAILY_STATS_TTL).await {
            warn!(key = %key, error = %e, "Failed to set daily statistic expiry");
        }
    }

    /// Statistics of one UTC calendar day. Unreadable values count as zero.
    pub async fn daily_stats(&self, day: NaiveDate) -> DailyStats {
        let day = day.to_string();
        let published_key = keys::daily_published(&day);
        let failed_key = keys::daily_failed(&day);

        let published = self.store.list_length(&published_key).await.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read daily published count");
            0
        });
        let failed = self.store.list_length(&failed_key).await.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read daily failed count");
            0
        });
        let top_post = match self.store.list_range(&published_key, -1, -1).await {
            Ok(mut last) => last.pop(),
            Err(e) => {
                warn!(error = %e, "Failed to read latest published title");
                None
            }
        };

        DailyStats {
            published,
            failed,
            top_post,
        }
    }

    fn emit(&self, event_type: NotificationEventType, data: serde_json::Value) {
        let mut event = NotificationEvent::at(event_type, data, self.clock.now());
        event.data.insert("source".to_string(), json!("publish"));
        self.event_bus.emit(event);
    }
}
