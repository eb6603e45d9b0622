//! Durable key/value store contract.
//!
//! All cross-process relay state (cooldown timestamp, pending and failed queues,
//! batch contents) lives behind [`DurableStore`], so several relay instances sharing
//! one store stay consistent. Correctness relies on the store's atomic primitives
//! (single list push/remove, set-with-TTL) rather than in-process locks.

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Keys used by the relay.
pub mod keys {
    /// Timestamp of the last approval alert that was actually delivered.
    pub const APPROVAL_LAST_SENT: &str = "notify:approval:last_sent";
    /// Summaries suppressed during the cooldown.
    pub const APPROVAL_PENDING: &str = "notify:approval:pending";
    /// Approval alerts waiting for a retry.
    pub const APPROVAL_FAILED: &str = "notify:approval:failed";
    /// Publish notifications waiting for a retry.
    pub const PUBLISH_FAILED: &str = "notify:publish:failed";
    /// Entries of the open publish-success batch.
    pub const PUBLISH_BATCH: &str = "notify:publish:batch";
    /// Opening time of the publish-success batch.
    pub const PUBLISH_BATCH_START: &str = "notify:publish:batch_start";
    /// Calendar day of the last daily summary.
    pub const DAILY_LAST_SUMMARY: &str = "notify:daily:last_summary";

    /// Per-day list of published titles.
    pub fn daily_published(day: &str) -> String {
        format!("notify:daily:{}:published", day)
    }

    /// Per-day list of failed publish titles.
    pub fn daily_failed(day: &str) -> String {
        format!("notify:daily:{}:failed", day)
    }
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors raised by a durable store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("wrong value type for key {0}")]
    WrongType(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A shared, persistent key/value store with list support.
///
/// Values are opaque strings; callers encode structured values as JSON.
/// List indices follow the usual inclusive `start..=end` convention where negative
/// indices count from the tail (`-1` is the last element).
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Read a string value.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Write a string value that expires after `ttl`.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    /// Delete every listed key. Missing keys are ignored.
    async fn delete(&self, keys: &[&str]) -> StoreResult<()>;

    /// Append to the tail of a list, creating it if needed. Returns the new length.
    async fn list_push(&self, key: &str, value: &str) -> StoreResult<usize>;

    /// Read a range of a list.
    async fn list_range(&self, key: &str, start: isize, end: isize) -> StoreResult<Vec<String>>;

    /// Length of a list, `0` when it does not exist.
    async fn list_length(&self, key: &str) -> StoreResult<usize>;

    /// Remove occurrences of `value`.
    ///
    /// `count > 0` removes from the head, `count < 0` from the tail and `0` removes all.
    /// Returns the number of removed elements.
    async fn list_remove(&self, key: &str, value: &str, count: isize) -> StoreResult<usize>;

    /// Set a key's time to live. Returns `false` when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// Check connectivity.
    async fn ping(&self) -> StoreResult<()>;
}

/// Whole seconds for a TTL, never zero (a zero TTL would delete the key immediately).
pub(crate) fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}
