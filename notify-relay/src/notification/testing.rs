//! Test doubles for notification collaborators.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::approval::{QueueItem, QueuePage, QueueStatusSource};
use super::channels::{ChannelError, ChannelResult, NotificationChannel};
use super::types::{BatchEntry, PublishFailure};
use crate::store::{DurableStore, MemoryStore, StoreError, StoreResult};
use crate::{Error, Result};

/// A recorded channel call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ApprovalSummary {
        pending_count: usize,
        high_priority_count: usize,
        compliance_warnings: usize,
        dashboard_url: String,
    },
    PublishSuccess {
        title: String,
        url: String,
    },
    PublishBatch {
        item_ids: Vec<String>,
    },
    PublishFailure {
        item_id: String,
    },
    DailySummary {
        published: usize,
        pending: usize,
        failed: usize,
        top_post: Option<String>,
    },
}

/// Channel that records every call and fails on demand.
#[derive(Default)]
pub struct ScriptedChannel {
    calls: Mutex<Vec<Call>>,
    failures: Mutex<VecDeque<ChannelError>>,
    always: Mutex<Option<ChannelError>>,
}

impl ScriptedChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next call with `err`.
    pub fn fail_next(&self, err: ChannelError) {
        self.failures.lock().push_back(err);
    }

    /// Fail every call with `err` until cleared.
    pub fn fail_always(&self, err: Option<ChannelError>) {
        *self.always.lock() = err;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    fn record(&self, call: Call) -> ChannelResult<()> {
        self.calls.lock().push(call);
        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }
        match self.always.lock().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl NotificationChannel for ScriptedChannel {
    fn channel_type(&self) -> &'static str {
        "scripted"
    }

    fn is_enabled(&self) -> bool {
        true
    }

    async fn send_approval_summary(
        &self,
        pending_count: usize,
        high_priority_count: usize,
        compliance_warnings: usize,
        dashboard_url: &str,
    ) -> ChannelResult<()> {
        self.record(Call::ApprovalSummary {
            pending_count,
            high_priority_count,
            compliance_warnings,
            dashboard_url: dashboard_url.to_string(),
        })
    }

    async fn send_publish_success(
        &self,
        title: &str,
        url: &str,
        _time: DateTime<Utc>,
        _excerpt: &str,
    ) -> ChannelResult<()> {
        self.record(Call::PublishSuccess {
            title: title.to_string(),
            url: url.to_string(),
        })
    }

    async fn send_publish_batch(&self, entries: &[BatchEntry]) -> ChannelResult<()> {
        self.record(Call::PublishBatch {
            item_ids: entries.iter().map(|e| e.item_id.clone()).collect(),
        })
    }

    async fn send_publish_failure(&self, failure: &PublishFailure) -> ChannelResult<()> {
        self.record(Call::PublishFailure {
            item_id: failure.item_id.clone(),
        })
    }

    async fn send_daily_summary(
        &self,
        published: usize,
        pending: usize,
        failed: usize,
        top_post: Option<&str>,
    ) -> ChannelResult<()> {
        self.record(Call::DailySummary {
            published,
            pending,
            failed,
            top_post: top_post.map(str::to_string),
        })
    }
}

/// Build a queue item.
pub fn item(id: &str, source_type: &str, priority: i32, compliance_status: &str) -> QueueItem {
    QueueItem {
        id: id.to_string(),
        source_type: source_type.to_string(),
        priority,
        compliance_status: compliance_status.to_string(),
    }
}

/// Queue-status source serving a fixed item list in small pages.
pub struct PagedSource {
    items: Mutex<Vec<QueueItem>>,
    page_size: usize,
    pages_served: AtomicUsize,
    failing: AtomicBool,
}

impl PagedSource {
    /// `page_size` overrides the limit the caller asks for.
    pub fn new(items: Vec<QueueItem>, page_size: usize) -> Self {
        Self {
            items: Mutex::new(items),
            page_size: page_size.max(1),
            pages_served: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_items(&self, items: Vec<QueueItem>) {
        *self.items.lock() = items;
    }

    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn pages_served(&self) -> usize {
        self.pages_served.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueueStatusSource for PagedSource {
    async fn get_pending_items(&self, limit: usize, cursor: Option<&str>) -> Result<QueuePage> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Source("queue source offline".to_string()));
        }
        self.pages_served.fetch_add(1, Ordering::SeqCst);

        let items = self.items.lock();
        let start = cursor.and_then(|c| c.parse::<usize>().ok()).unwrap_or(0);
        let end = (start + limit.min(self.page_size)).min(items.len());
        let page = items.get(start..end).map(<[_]>::to_vec).unwrap_or_default();

        Ok(QueuePage {
            items: page,
            total_count: items.len(),
            next_cursor: (end < items.len()).then(|| end.to_string()),
        })
    }
}

/// Store that yields to the runtime before every call, so tasks joined on one
/// thread interleave between store operations the way they do against Redis.
pub struct YieldingStore {
    inner: Arc<MemoryStore>,
    reject_pushes: AtomicBool,
}

impl YieldingStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            reject_pushes: AtomicBool::new(false),
        }
    }

    /// Make list appends fail while everything else keeps working.
    pub fn reject_pushes(&self, reject: bool) {
        self.reject_pushes.store(reject, Ordering::SeqCst);
    }
}

#[async_trait]
impl DurableStore for YieldingStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        tokio::task::yield_now().await;
        self.inner.get(key).await
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        tokio::task::yield_now().await;
        self.inner.set_with_ttl(key, value, ttl).await
    }

    async fn delete(&self, keys: &[&str]) -> StoreResult<()> {
        tokio::task::yield_now().await;
        self.inner.delete(keys).await
    }

    async fn list_push(&self, key: &str, value: &str) -> StoreResult<usize> {
        tokio::task::yield_now().await;
        if self.reject_pushes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("push rejected".to_string()));
        }
        self.inner.list_push(key, value).await
    }

    async fn list_range(&self, key: &str, start: isize, end: isize) -> StoreResult<Vec<String>> {
        tokio::task::yield_now().await;
        self.inner.list_range(key, start, end).await
    }

    async fn list_length(&self, key: &str) -> StoreResult<usize> {
        tokio::task::yield_now().await;
        self.inner.list_length(key).await
    }

    async fn list_remove(&self, key: &str, value: &str, count: isize) -> StoreResult<usize> {
        tokio::task::yield_now().await;
        self.inner.list_remove(key, value, count).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        tokio::task::yield_now().await;
        self.inner.expire(key, ttl).await
    }

    async fn ping(&self) -> StoreResult<()> {
        tokio::task::yield_now().await;
        self.inner.ping().await
    }
}
