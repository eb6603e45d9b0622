#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;

use notify_relay::notification::channels::{ChannelError, ChannelResult};
use notify_relay::notification::retry_queue::DeliveryContext;
use notify_relay::notification::{
    ApprovalNotifier, ApprovalNotifierConfig, BatchEntry, Batcher, EventBus, NotificationChannel,
    PublishFailure, PublishNotifier, QueueItem, QueuePage, QueueStatusSource, RateLimiter,
    RetryQueue,
};
use notify_relay::store::{DurableStore, MemoryStore, StoreResult, keys};
use notify_relay::time::ManualTimeSource;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Approval {
        pending_count: usize,
        high_priority_count: usize,
        compliance_warnings: usize,
    },
    Success(String),
    Batch(usize),
    Failure(String),
    Daily(usize, usize, usize),
}

/// Channel recording every send; fails while `failing` is set.
#[derive(Default)]
pub struct RecordingChannel {
    pub sent: Mutex<Vec<Sent>>,
    pub failing: Mutex<Option<ChannelError>>,
}

impl RecordingChannel {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    pub fn fail_with(&self, err: Option<ChannelError>) {
        *self.failing.lock() = err;
    }

    fn record(&self, sent: Sent) -> ChannelResult<()> {
        self.sent.lock().push(sent);
        match self.failing.lock().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    fn channel_type(&self) -> &'static str {
        "recording"
    }

    fn is_enabled(&self) -> bool {
        true
    }

    async fn send_approval_summary(
        &self,
        pending_count: usize,
        high_priority_count: usize,
        compliance_warnings: usize,
        _dashboard_url: &str,
    ) -> ChannelResult<()> {
        self.record(Sent::Approval {
            pending_count,
            high_priority_count,
            compliance_warnings,
        })
    }

    async fn send_publish_success(
        &self,
        title: &str,
        _url: &str,
        _time: DateTime<Utc>,
        _excerpt: &str,
    ) -> ChannelResult<()> {
        self.record(Sent::Success(title.to_string()))
    }

    async fn send_publish_batch(&self, entries: &[BatchEntry]) -> ChannelResult<()> {
        self.record(Sent::Batch(entries.len()))
    }

    async fn send_publish_failure(&self, failure: &PublishFailure) -> ChannelResult<()> {
        self.record(Sent::Failure(failure.item_id.clone()))
    }

    async fn send_daily_summary(
        &self,
        published: usize,
        pending: usize,
        failed: usize,
        _top_post: Option<&str>,
    ) -> ChannelResult<()> {
        self.record(Sent::Daily(published, pending, failed))
    }
}

/// Queue source returning its items one page of `page_size` at a time.
pub struct VecSource {
    pub items: Mutex<Vec<QueueItem>>,
    pub page_size: usize,
}

impl VecSource {
    pub fn new(page_size: usize) -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            page_size,
        }
    }

    pub fn fill(&self, count: usize, warnings: usize) {
        *self.items.lock() = (0..count)
            .map(|i| QueueItem {
                id: format!("item-{}", i),
                source_type: if i % 2 == 0 { "rss" } else { "upload" }.to_string(),
                priority: (i % 5) as i32 + 1,
                compliance_status: if i < warnings { "warning" } else { "clear" }.to_string(),
            })
            .collect();
    }
}

#[async_trait]
impl QueueStatusSource for VecSource {
    async fn get_pending_items(
        &self,
        limit: usize,
        cursor: Option<&str>,
    ) -> notify_relay::Result<QueuePage> {
        let items = self.items.lock();
        let start: usize = cursor.map_or(0, |c| c.parse().unwrap_or(0));
        let end = (start + limit.min(self.page_size)).min(items.len());
        Ok(QueuePage {
            items: items[start.min(end)..end].to_vec(),
            total_count: items.len(),
            next_cursor: (end < items.len()).then(|| end.to_string()),
        })
    }
}

/// In-memory store that yields before every call so joined tasks interleave.
pub struct YieldingStore(pub Arc<MemoryStore>);

#[async_trait]
impl DurableStore for YieldingStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        tokio::task::yield_now().await;
        self.0.get(key).await
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: StdDuration) -> StoreResult<()> {
        tokio::task::yield_now().await;
        self.0.set_with_ttl(key, value, ttl).await
    }

    async fn delete(&self, keys: &[&str]) -> StoreResult<()> {
        tokio::task::yield_now().await;
        self.0.delete(keys).await
    }

    async fn list_push(&self, key: &str, value: &str) -> StoreResult<usize> {
        tokio::task::yield_now().await;
        self.0.list_push(key, value).await
    }

    async fn list_range(&self, key: &str, start: isize, end: isize) -> StoreResult<Vec<String>> {
        tokio::task::yield_now().await;
        self.0.list_range(key, start, end).await
    }

    async fn list_length(&self, key: &str) -> StoreResult<usize> {
        tokio::task::yield_now().await;
        self.0.list_length(key).await
    }

    async fn list_remove(&self, key: &str, value: &str, count: isize) -> StoreResult<usize> {
        tokio::task::yield_now().await;
        self.0.list_remove(key, value, count).await
    }

    async fn expire(&self, key: &str, ttl: StdDuration) -> StoreResult<bool> {
        tokio::task::yield_now().await;
        self.0.expire(key, ttl).await
    }

    async fn ping(&self) -> StoreResult<()> {
        tokio::task::yield_now().await;
        self.0.ping().await
    }
}

/// Everything wired together on a shared in-memory store and manual clock.
///
/// Components talk to the store through [`YieldingStore`]; `store` gives tests direct
/// access to the same data.
pub struct Relay {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualTimeSource>,
    pub channel: Arc<RecordingChannel>,
    pub source: Arc<VecSource>,
    pub bus: Arc<EventBus>,
    pub approval: Arc<ApprovalNotifier>,
    pub publish: Arc<PublishNotifier>,
}

pub fn relay(threshold: usize) -> Relay {
    let clock = Arc::new(ManualTimeSource::new(
        Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap(),
    ));
    let store = Arc::new(MemoryStore::with_time_source(clock.clone()));
    let shared: Arc<dyn DurableStore> = Arc::new(YieldingStore(store.clone()));
    let channel = Arc::new(RecordingChannel::default());
    let source = Arc::new(VecSource::new(10));
    let bus = Arc::new(EventBus::new());

    let approval = Arc::new(ApprovalNotifier::new(
        ApprovalNotifierConfig {
            enabled: true,
            threshold,
            dashboard_url: "https://dash.example.com/approvals".to_string(),
        },
        source.clone(),
        channel.clone(),
        RateLimiter::new(shared.clone(), clock.clone(), Duration::minutes(60)),
        RetryQueue::new(
            keys::APPROVAL_FAILED,
            shared.clone(),
            clock.clone(),
            channel.clone(),
            DeliveryContext::default(),
        )
        .with_event_bus(bus.clone()),
        bus.clone(),
        clock.clone(),
    ));

    let publish = Arc::new(PublishNotifier::new(
        true,
        channel.clone(),
        Batcher::new(shared.clone(), clock.clone(), Duration::minutes(15)),
        RetryQueue::new(
            keys::PUBLISH_FAILED,
            shared.clone(),
            clock.clone(),
            channel.clone(),
            DeliveryContext::default(),
        )
        .with_event_bus(bus.clone()),
        shared.clone(),
        bus.clone(),
        clock.clone(),
    ));

    Relay {
        store,
        clock,
        channel,
        source,
        bus,
        approval,
        publish,
    }
}
