//! Payloads shared by the notifiers, the queues and the channels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::truncate_chars;

/// Maximum length of a caption excerpt carried in batch entries.
pub const EXCERPT_MAX_CHARS: usize = 200;

/// Condensed approval-queue state, as carried by alerts and retry entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ApprovalSummary {
    pub total_pending: usize,
    pub high_priority_count: usize,
    pub compliance_warnings: usize,
}

/// A piece of content that was just published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedPost {
    pub item_id: String,
    pub title: String,
    pub caption: String,
    pub target_url: String,
    pub publish_time: DateTime<Utc>,
}

/// One publish success waiting in the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchEntry {
    pub item_id: String,
    pub title: String,
    pub caption_excerpt: String,
    pub target_url: String,
    pub publish_time: DateTime<Utc>,
}

impl From<&PublishedPost> for BatchEntry {
    fn from(post: &PublishedPost) -> Self {
        Self {
            item_id: post.item_id.clone(),
            title: post.title.clone(),
            caption_excerpt: truncate_chars(&post.caption, EXCERPT_MAX_CHARS),
            target_url: post.target_url.clone(),
            publish_time: post.publish_time,
        }
    }
}

/// A failed publish attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishFailure {
    pub item_id: String,
    pub title: String,
    pub reason: String,
    /// Short machine-readable classification, e.g. `token_expired`.
    pub error_kind: String,
    pub retry_url: Option<String>,
    pub scheduled_time: Option<DateTime<Utc>>,
}
