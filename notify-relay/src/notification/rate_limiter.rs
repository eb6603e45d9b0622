//! Cooldown-based rate limiting for approval alerts.
//!
//! The last delivery time lives in the durable store so every relay instance shares
//! one cooldown. Alerts raised during the cooldown are parked in a pending queue and
//! replayed (last value wins) once it clears.
//!
//! Store failures never block an alert: reads fail open, writes become logged no-ops.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::types::ApprovalSummary;
use crate::store::{DurableStore, keys};
use crate::time::TimeSource;

/// Extra lifetime of the cooldown key beyond the cooldown itself.
const COOLDOWN_TTL_BUFFER_SECS: i64 = 5 * 60;

/// Lifetime of the pending-summary queue.
const PENDING_TTL: StdDuration = StdDuration::from_secs(24 * 60 * 60);

/// A suppressed alert waiting for the cooldown to clear.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSummary {
    #[serde(flatten)]
    pub summary: ApprovalSummary,
    pub queued_at: DateTime<Utc>,
}

/// Shared cooldown between approval alerts.
pub struct RateLimiter {
    store: Arc<dyn DurableStore>,
    clock: Arc<dyn TimeSource>,
    cooldown: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn DurableStore>, clock: Arc<dyn TimeSource>, cooldown: Duration) -> Self {
        Self {
            store,
            clock,
            cooldown,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// When the last alert went out, if known.
    async fn last_sent(&self) -> Option<DateTime<Utc>> {
        let raw = match self.store.get(keys::APPROVAL_LAST_SENT).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(error = %e, "Failed to read cooldown state, allowing send");
                return None;
            }
        };

        match DateTime::parse_from_rfc3339(&raw) {
            Ok(ts) => Some(ts.with_timezone(&Utc)),
            Err(e) => {
                warn!(error = %e, value = %raw, "Corrupt cooldown timestamp, ignoring");
                None
            }
        }
    }

    /// Whether the cooldown is still running.
    pub async fn is_rate_limited(&self) -> bool {
        match self.last_sent().await {
            Some(last_sent) => self.clock.now() < last_sent + self.cooldown,
            None => false,
        }
    }

    /// Remaining cooldown, or `None` when sending is allowed.
    pub async fn get_time_until_available(&self) -> Option<Duration> {
        let last_sent = self.last_sent().await?;
        let remaining = last_sent + self.cooldown - self.clock.now();
        (remaining > Duration::zero()).then_some(remaining)
    }

    /// Start a new cooldown and discard any parked summaries.
    pub async fn record_notification(&self) {
        let now = self.clock.now();
        let ttl = (self.cooldown + Duration::seconds(COOLDOWN_TTL_BUFFER_SECS))
            .to_std()
            .unwrap_or(PENDING_TTL);

        if let Err(e) = self
            .store
            .set_with_ttl(keys::APPROVAL_LAST_SENT, &now.to_rfc3339(), ttl)
            .await
        {
            warn!(error = %e, "Failed to record approval notification time");
        }

        if let Err(e) = self.store.delete(&[keys::APPROVAL_PENDING]).await {
            warn!(error = %e, "Failed to clear pending approval summaries");
        }
    }

    /// Park a summary raised during the cooldown so it is delayed, not lost.
    pub async fn queue_pending_notification(&self, summary: ApprovalSummary) {
        let pending = PendingSummary {
            summary,
            queued_at: self.clock.now(),
        };
        let raw = match serde_json::to_string(&pending) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Failed to encode pending approval summary");
                return;
            }
        };

        if let Err(e) = self.store.list_push(keys::APPROVAL_PENDING, &raw).await {
            warn!(error = %e, "Failed to queue pending approval summary");
            return;
        }
        if let Err(e) = self.store.expire(keys::APPROVAL_PENDING, PENDING_TTL).await {
            warn!(error = %e, "Failed to set pending queue expiry");
        }
        debug!(total_pending = summary.total_pending, "Queued approval summary during cooldown");
    }

    /// Number of parked summaries, `0` if the store is unreachable.
    pub async fn pending_count(&self) -> usize {
        self.store
            .list_length(keys::APPROVAL_PENDING)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to read pending approval queue length");
                0
            })
    }

    /// Read every parked summary, oldest first. Undecodable entries are skipped.
    pub async fn pending_summaries(&self) -> Vec<PendingSummary> {
        let raw = match self.store.list_range(keys::APPROVAL_PENDING, 0, -1).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Failed to read pending approval summaries");
                return Vec::new();
            }
        };

        raw.iter()
            .filter_map(|r| match serde_json::from_str(r) {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!(error = %e, "Skipping corrupt pending approval summary");
                    None
                }
            })
            .collect()
    }

    /// Drop every parked summary.
    pub async fn clear_pending(&self) {
        if let Err(e) = self.store.delete(&[keys::APPROVAL_PENDING]).await {
            warn!(error = %e, "Failed to clear pending approval summaries");
        }
    }
}
