//! Notification delivery and reliability.
//!
//! Delivers operator notifications about the approval queue and publish outcomes
//! without spamming the channel or losing messages when it misbehaves.
//!
//! # Features
//!
//! - Cooldown between approval alerts, with suppressed alerts replayed afterwards
//! - Time-window batching of publish successes
//! - Durable retry queues with backoff and abandonment
//! - Bounded, non-blocking event fan-out for live observers
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use notify_relay::notification::{Batcher, PublishNotifier, RetryQueue, EventBus};
//! use notify_relay::store::{keys, MemoryStore};
//! use notify_relay::time::SystemTimeSource;
//!
//! let store = Arc::new(MemoryStore::new());
//! let clock = Arc::new(SystemTimeSource);
//! let batcher = Batcher::new(store.clone(), clock.clone(), chrono::Duration::minutes(15));
//! let retry_queue = RetryQueue::new(keys::PUBLISH_FAILED, store.clone(), clock.clone(), channel.clone(), Default::default());
//! let notifier = PublishNotifier::new(true, channel, batcher, retry_queue, store, Arc::new(EventBus::new()), clock);
//!
//! notifier.notify_publish_success(&post).await;
//! ```

pub mod approval;
pub mod batcher;
pub mod channels;
pub mod event_bus;
pub mod events;
pub mod publish;
pub mod queue_source;
pub mod rate_limiter;
pub mod retry_queue;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use approval::{
    ApprovalNotifier, ApprovalNotifierConfig, QueueItem, QueuePage, QueueStatus, QueueStatusSource,
};
pub use batcher::{BatchAdd, Batcher};
pub use channels::{ChannelError, DiscordWebhookChannel, NotificationChannel, WebhookConfig};
pub use event_bus::{EventBus, EventStream};
pub use events::{NotificationEvent, NotificationEventType};
pub use publish::{DailyStats, PublishDelivery, PublishNotifier};
pub use queue_source::HttpQueueStatusSource;
pub use rate_limiter::RateLimiter;
pub use retry_queue::{MAX_RETRY_ATTEMPTS, QueuedNotification, RetryQueue, RetrySweepReport};
pub use types::{ApprovalSummary, BatchEntry, PublishFailure, PublishedPost};
