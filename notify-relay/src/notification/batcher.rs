//! Time-window batching of publish successes.
//!
//! A single batch is open at a time. The first entry opens it by writing the start key;
//! later entries append to the list and report "send now" once the window has elapsed.
//! Both keys carry a TTL a little longer than the window so a batch nobody flushes
//! expires on its own.
//!
//! The start key and the list are written separately. A crash between the two writes
//! leaves either an empty batch with a start key (harmless) or an orphaned list with
//! no start key, which [`Batcher::is_window_expired`] reports as due.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use super::types::BatchEntry;
use crate::store::{DurableStore, StoreResult, keys};
use crate::time::TimeSource;

/// Extra lifetime of the batch keys beyond the window.
const WINDOW_TTL_BUFFER_SECS: i64 = 5 * 60;

/// Outcome of [`Batcher::add_to_batch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchAdd {
    /// Stored; the window is still open.
    Batched,
    /// Stored; the window has elapsed and the batch should be flushed.
    Due,
    /// The store rejected the entry. The caller must deliver it itself.
    NotStored,
}

impl BatchAdd {
    pub fn should_send_now(self) -> bool {
        !matches!(self, BatchAdd::Batched)
    }
}

/// Single-slot publish-success batch.
pub struct Batcher {
    store: Arc<dyn DurableStore>,
    clock: Arc<dyn TimeSource>,
    window: Duration,
}

impl Batcher {
    pub fn new(store: Arc<dyn DurableStore>, clock: Arc<dyn TimeSource>, window: Duration) -> Self {
        Self {
            store,
            clock,
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn key_ttl(&self) -> StdDuration {
        (self.window + Duration::seconds(WINDOW_TTL_BUFFER_SECS))
            .to_std()
            .unwrap_or(StdDuration::from_secs(WINDOW_TTL_BUFFER_SECS as u64))
    }

    /// Add an entry to the open batch, opening one if needed.
    ///
    /// Returns `true` when the batch should be flushed now. Store errors also return
    /// `true` so the entry is sent rather than stuck in a batch nobody sees.
    pub async fn add_publish(&self, entry: &BatchEntry) -> bool {
        self.add_to_batch(entry).await.should_send_now()
    }

    /// Like [`Batcher::add_publish`], but reports whether the entry made it into the
    /// stored batch.
    pub async fn add_to_batch(&self, entry: &BatchEntry) -> BatchAdd {
        let raw = match serde_json::to_string(entry) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, item_id = %entry.item_id, "Failed to encode batch entry");
                return BatchAdd::NotStored;
            }
        };
        let now = self.clock.now();

        let started_at = match self.started_at().await {
            Ok(started_at) => started_at,
            Err(e) => {
                warn!(error = %e, item_id = %entry.item_id, "Batch start read failed, sending immediately");
                return BatchAdd::NotStored;
            }
        };

        if started_at.is_none()
            && let Err(e) = self
                .store
                .set_with_ttl(keys::PUBLISH_BATCH_START, &now.to_rfc3339(), self.key_ttl())
                .await
        {
            warn!(error = %e, item_id = %entry.item_id, "Batch open failed, sending immediately");
            return BatchAdd::NotStored;
        }

        let size = match self.store.list_push(keys::PUBLISH_BATCH, &raw).await {
            Ok(size) => size,
            Err(e) => {
                warn!(error = %e, item_id = %entry.item_id, "Batch append failed, sending immediately");
                return BatchAdd::NotStored;
            }
        };
        if let Err(e) = self.store.expire(keys::PUBLISH_BATCH, self.key_ttl()).await {
            warn!(error = %e, "Failed to refresh publish batch TTL");
        }

        let Some(started_at) = started_at else {
            debug!(item_id = %entry.item_id, "Opened publish batch");
            return BatchAdd::Batched;
        };
        let due = now >= started_at + self.window;
        debug!(item_id = %entry.item_id, size, due, "Appended to publish batch");
        if due {
            BatchAdd::Due
        } else {
            BatchAdd::Batched
        }
    }

    /// Opening time of the current batch. A corrupt value counts as the epoch so the
    /// batch is flushed rather than held forever.
    async fn started_at(&self) -> StoreResult<Option<DateTime<Utc>>> {
        let Some(raw) = self.store.get(keys::PUBLISH_BATCH_START).await? else {
            return Ok(None);
        };
        match DateTime::parse_from_rfc3339(&raw) {
            Ok(ts) => Ok(Some(ts.with_timezone(&Utc))),
            Err(e) => {
                warn!(error = %e, value = %raw, "Corrupt batch start time");
                Ok(Some(DateTime::<Utc>::UNIX_EPOCH))
            }
        }
    }

    /// Take every entry out of the batch and close it.
    ///
    /// Each entry is claimed with a single-element remove, so concurrent flushes never
    /// return the same entry twice. Returns an empty list on store errors. Undecodable
    /// entries are dropped.
    pub async fn get_and_clear_batch(&self) -> Vec<BatchEntry> {
        let raw = match self.store.list_range(keys::PUBLISH_BATCH, 0, -1).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Failed to read publish batch");
                return Vec::new();
            }
        };

        let mut claimed = Vec::with_capacity(raw.len());
        for r in raw {
            match self.store.list_remove(keys::PUBLISH_BATCH, &r, 1).await {
                Ok(0) => {}
                Ok(_) => claimed.push(r),
                Err(e) => {
                    // Unclaimed entries stay in the list for the next flush.
                    warn!(error = %e, "Failed to claim batch entry");
                    break;
                }
            }
        }
        if claimed.is_empty() {
            return Vec::new();
        }

        // Entries appended since the read are left without a start key and count as
        // expired on the next sweep.
        if let Err(e) = self.store.delete(&[keys::PUBLISH_BATCH_START]).await {
            warn!(error = %e, "Failed to clear publish batch start");
        }

        claimed
            .iter()
            .filter_map(|r| match serde_json::from_str(r) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "Dropping corrupt batch entry");
                    None
                }
            })
            .collect()
    }

    /// Entries in the open batch, `0` on store errors.
    pub async fn get_batch_count(&self) -> usize {
        self.store
            .list_length(keys::PUBLISH_BATCH)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to read publish batch size");
                0
            })
    }

    /// Whether a non-empty batch is due for flushing: its window has elapsed, or its
    /// start key is gone while entries remain.
    pub async fn is_window_expired(&self) -> bool {
        if self.get_batch_count().await == 0 {
            return false;
        }
        match self.started_at().await {
            Ok(Some(started_at)) => self.clock.now() >= started_at + self.window,
            Ok(None) => {
                debug!("Publish batch has no start time, treating as expired");
                true
            }
            Err(e) => {
                warn!(error = %e, "Failed to read batch start time");
                false
            }
        }
    }
}
