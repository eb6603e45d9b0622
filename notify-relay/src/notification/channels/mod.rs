//! Notification channels.
//!
//! A channel turns typed notifications into messages on an operator-facing chat
//! channel. The relay ships a Discord-compatible webhook channel; tests and other
//! deployments can plug in their own implementation of [`NotificationChannel`].

mod discord;

pub use discord::{DiscordWebhookChannel, WebhookConfig};

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use super::types::{BatchEntry, PublishFailure};

/// Result type for channel sends.
pub type ChannelResult<T> = std::result::Result<T, ChannelError>;

/// Why a send did not go through.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The remote throttled us; `retry_after` is its hint, if any.
    #[error("rate limited by channel (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Credentials were rejected. Retrying will not help.
    #[error("channel rejected credentials: {0}")]
    Unauthorized(String),

    /// The channel is not configured.
    #[error("channel disabled")]
    Disabled,

    /// Any other delivery failure.
    #[error("delivery failed: {0}")]
    Delivery(String),
}

impl ChannelError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

/// Outbound operator notification channel.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Get the channel type name.
    fn channel_type(&self) -> &'static str;

    /// Check if the channel is enabled.
    fn is_enabled(&self) -> bool;

    /// Alert that the approval queue needs attention.
    async fn send_approval_summary(
        &self,
        pending_count: usize,
        high_priority_count: usize,
        compliance_warnings: usize,
        dashboard_url: &str,
    ) -> ChannelResult<()>;

    /// Announce a single published post.
    async fn send_publish_success(
        &self,
        title: &str,
        url: &str,
        time: DateTime<Utc>,
        excerpt: &str,
    ) -> ChannelResult<()>;

    /// Announce several published posts in one message.
    async fn send_publish_batch(&self, entries: &[BatchEntry]) -> ChannelResult<()>;

    /// Report a failed publish.
    async fn send_publish_failure(&self, failure: &PublishFailure) -> ChannelResult<()>;

    /// End-of-day digest.
    async fn send_daily_summary(
        &self,
        published: usize,
        pending: usize,
        failed: usize,
        top_post: Option<&str>,
    ) -> ChannelResult<()>;
}
