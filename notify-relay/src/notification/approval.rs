//! Approval queue alerts.
//!
//! [`ApprovalNotifier::check_and_notify`] recomputes the approval-queue status from
//! the queue-status source and, once the backlog reaches the threshold, alerts the
//! operators: at most once per cooldown, parking suppressed alerts for later and
//! handing failed sends to the retry queue.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use super::channels::{ChannelResult, NotificationChannel};
use super::event_bus::EventBus;
use super::events::{NotificationEvent, NotificationEventType};
use super::rate_limiter::RateLimiter;
use super::retry_queue::{DeliveryContext, RetryPayload, RetryQueue};
use super::types::ApprovalSummary;
use crate::Result;
use crate::time::TimeSource;

/// Items fetched per page from the queue-status source.
pub const PAGE_SIZE: usize = 100;

/// Safety stop for sources that never stop handing out cursors.
const MAX_PAGES: usize = 1000;

/// Priorities at or below this number count as high priority (lower is more urgent).
pub const HIGH_PRIORITY_CUTOFF: i32 = 2;

/// Compliance status that marks an item as carrying a warning.
pub const COMPLIANCE_WARNING_STATUS: &str = "warning";

/// One item waiting for manual approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    pub source_type: String,
    pub priority: i32,
    pub compliance_status: String,
}

impl QueueItem {
    pub fn has_compliance_warning(&self) -> bool {
        self.compliance_status
            .trim()
            .eq_ignore_ascii_case(COMPLIANCE_WARNING_STATUS)
    }
}

/// One page of pending items.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueuePage {
    pub items: Vec<QueueItem>,
    #[serde(default)]
    pub total_count: usize,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// Paginated read access to the approval queue.
#[async_trait]
pub trait QueueStatusSource: Send + Sync {
    async fn get_pending_items(&self, limit: usize, cursor: Option<&str>) -> Result<QueuePage>;
}

/// Aggregated approval-queue state, recomputed on every check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub total_pending: usize,
    pub by_source_type: BTreeMap<String, usize>,
    pub by_priority: BTreeMap<i32, usize>,
    pub compliance_warnings: usize,
    pub high_priority_count: usize,
    /// Id of the item with the lowest priority number; first seen wins ties.
    pub highest_priority_item: Option<String>,
}

impl QueueStatus {
    /// Fold items into the running aggregate.
    fn absorb(&mut self, items: &[QueueItem], best_priority: &mut Option<i32>) {
        for item in items {
            self.total_pending += 1;
            *self
                .by_source_type
                .entry(item.source_type.clone())
                .or_default() += 1;
            *self.by_priority.entry(item.priority).or_default() += 1;
            if item.priority <= HIGH_PRIORITY_CUTOFF {
                self.high_priority_count += 1;
            }
            if item.has_compliance_warning() {
                self.compliance_warnings += 1;
            }
            if best_priority.is_none_or(|best| item.priority < best) {
                *best_priority = Some(item.priority);
                self.highest_priority_item = Some(item.id.clone());
            }
        }
    }

    /// Build a status from a complete item list.
    pub fn from_items(items: &[QueueItem]) -> Self {
        let mut status = Self::default();
        status.absorb(items, &mut None);
        status
    }

    pub fn summary(&self) -> ApprovalSummary {
        ApprovalSummary {
            total_pending: self.total_pending,
            high_priority_count: self.high_priority_count,
            compliance_warnings: self.compliance_warnings,
        }
    }
}

/// Page through `source` until it runs out and aggregate everything.
pub async fn collect_queue_status(source: &dyn QueueStatusSource) -> Result<QueueStatus> {
    let mut status = QueueStatus::default();
    let mut best_priority = None;
    let mut cursor: Option<String> = None;

    for _ in 0..MAX_PAGES {
        let page = source
            .get_pending_items(PAGE_SIZE, cursor.as_deref())
            .await?;
        status.absorb(&page.items, &mut best_priority);

        match page.next_cursor {
            Some(next) if !page.items.is_empty() && cursor.as_deref() != Some(next.as_str()) => {
                cursor = Some(next);
            }
            _ => return Ok(status),
        }
    }

    warn!(
        pages = MAX_PAGES,
        "Queue status source did not finish paginating, using partial status"
    );
    Ok(status)
}

#[async_trait]
impl RetryPayload for ApprovalSummary {
    fn kind(&self) -> &'static str {
        "approval_summary"
    }

    async fn deliver(
        &self,
        channel: &dyn NotificationChannel,
        context: &DeliveryContext,
    ) -> ChannelResult<()> {
        channel
            .send_approval_summary(
                self.total_pending,
                self.high_priority_count,
                self.compliance_warnings,
                &context.dashboard_url,
            )
            .await
    }
}

/// Settings of the approval notifier.
#[derive(Debug, Clone)]
pub struct ApprovalNotifierConfig {
    pub enabled: bool,
    pub threshold: usize,
    pub dashboard_url: String,
}

impl Default for ApprovalNotifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 5,
            dashboard_url: String::new(),
        }
    }
}

/// Decides whether, when and how to alert about the approval queue.
pub struct ApprovalNotifier {
    config: ApprovalNotifierConfig,
    source: Arc<dyn QueueStatusSource>,
    channel: Arc<dyn NotificationChannel>,
    rate_limiter: RateLimiter,
    retry_queue: RetryQueue<ApprovalSummary>,
    event_bus: Arc<EventBus>,
    clock: Arc<dyn TimeSource>,
}

impl ApprovalNotifier {
    pub fn new(
        config: ApprovalNotifierConfig,
        source: Arc<dyn QueueStatusSource>,
        channel: Arc<dyn NotificationChannel>,
        rate_limiter: RateLimiter,
        retry_queue: RetryQueue<ApprovalSummary>,
        event_bus: Arc<EventBus>,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            config,
            source,
            channel,
            rate_limiter,
            retry_queue,
            event_bus,
            clock,
        }
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn retry_queue(&self) -> &RetryQueue<ApprovalSummary> {
        &self.retry_queue
    }

    /// Current approval-queue status.
    pub async fn queue_status(&self) -> Result<QueueStatus> {
        collect_queue_status(self.source.as_ref()).await
    }

    /// Check the queue and alert if needed. Returns whether an alert was delivered.
    ///
    /// Never fails: any error is logged and reported as `false`.
    pub async fn check_and_notify(&self) -> bool {
        if !self.config.enabled {
            return false;
        }

        match self.try_check_and_notify().await {
            Ok(sent) => sent,
            Err(e) => {
                warn!(error = %e, "Approval queue check failed");
                false
            }
        }
    }

    async fn try_check_and_notify(&self) -> Result<bool> {
        let status = self.queue_status().await?;

        if status.total_pending < self.config.threshold {
            debug!(
                total_pending = status.total_pending,
                threshold = self.config.threshold,
                "Approval queue below threshold"
            );
            return Ok(false);
        }

        self.emit(
            NotificationEventType::QueueThresholdReached,
            json!({
                "total_pending": status.total_pending,
                "threshold": self.config.threshold,
                "by_source_type": status.by_source_type,
                "highest_priority_item": status.highest_priority_item,
            }),
        );
        if status.compliance_warnings > 0 {
            self.emit(
                NotificationEventType::ComplianceWarning,
                json!({ "compliance_warnings": status.compliance_warnings }),
            );
        }

        let summary = status.summary();
        if self.rate_limiter.is_rate_limited().await {
            debug!(
                total_pending = summary.total_pending,
                "Approval alert suppressed by cooldown"
            );
            self.rate_limiter.queue_pending_notification(summary).await;
            return Ok(false);
        }

        Ok(self.deliver(summary).await)
    }

    /// Replay the newest summary parked during the cooldown, discarding older ones.
    ///
    /// Returns whether an alert was delivered.
    pub async fn process_pending(&self) -> bool {
        if !self.config.enabled || self.rate_limiter.is_rate_limited().await {
            return false;
        }

        let pending = self.rate_limiter.pending_summaries().await;
        let Some(latest) = pending.last() else {
            return false;
        };
        debug!(
            parked = pending.len(),
            total_pending = latest.summary.total_pending,
            "Replaying newest parked approval summary"
        );

        let sent = self.deliver(latest.summary).await;
        if !sent {
            // Already handed to the retry queue.
            self.rate_limiter.clear_pending().await;
        }
        sent
    }

    /// Send now; on success start a cooldown, on failure queue a retry.
    async fn deliver(&self, summary: ApprovalSummary) -> bool {
        let result = self
            .channel
            .send_approval_summary(
                summary.total_pending,
                summary.high_priority_count,
                summary.compliance_warnings,
                &self.config.dashboard_url,
            )
            .await;

        match result {
            Ok(()) => {
                self.rate_limiter.record_notification().await;
                info!(
                    total_pending = summary.total_pending,
                    high_priority = summary.high_priority_count,
                    compliance_warnings = summary.compliance_warnings,
                    "Approval alert sent"
                );
                self.emit(NotificationEventType::Sent, json!(summary));
                true
            }
            Err(e) => {
                warn!(error = %e, "Approval alert failed, queueing for retry");
                self.emit(
                    NotificationEventType::Failed,
                    json!({ "error": e.to_string(), "total_pending": summary.total_pending }),
                );
                if self.retry_queue.queue_failed(summary).await {
                    self.emit(NotificationEventType::QueuedForRetry, json!(summary));
                }
                false
            }
        }
    }

    fn emit(&self, event_type: NotificationEventType, data: serde_json::Value) {
        let mut event = NotificationEvent::at(event_type, data, self.clock.now());
        event
            .data
            .insert("source".to_string(), json!("approval"));
        self.event_bus.emit(event);
    }
}
