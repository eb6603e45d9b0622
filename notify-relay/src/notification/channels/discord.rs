//! Discord-compatible webhook channel.
//!
//! Rate limiting is not retried here: a 429 surfaces as
//! [`ChannelError::RateLimited`] carrying the server's hint (`Retry-After`,
//! `X-RateLimit-Reset-After` or the JSON `retry_after` field), and the retry queue
//! decides when to try again.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{ChannelError, ChannelResult, NotificationChannel};
use crate::notification::types::{BatchEntry, PublishFailure};
use crate::utils::{http_client, truncate_chars};

/// Entries listed individually in a batch message.
const MAX_BATCH_LINES: usize = 10;

const COLOR_INFO: u32 = 0x3498db; // Blue
const COLOR_SUCCESS: u32 = 0x2ecc71; // Green
const COLOR_WARNING: u32 = 0xf39c12; // Orange
const COLOR_ERROR: u32 = 0xe74c3c; // Red
const COLOR_NEUTRAL: u32 = 0x808080; // Gray

/// Webhook channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Whether the channel is enabled.
    pub enabled: bool,
    /// Webhook URL.
    pub webhook_url: String,
    /// Optional username for the webhook.
    pub username: Option<String>,
    /// Optional avatar URL for the webhook.
    pub avatar_url: Option<String>,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    30
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            webhook_url: String::new(),
            username: Some("notify-relay".to_string()),
            avatar_url: None,
            timeout_secs: default_timeout(),
        }
    }
}

/// Webhook channel speaking Discord's embed format.
pub struct DiscordWebhookChannel {
    config: WebhookConfig,
    client: Client,
}

impl DiscordWebhookChannel {
    /// Create a new webhook channel.
    pub fn new(config: WebhookConfig) -> Self {
        let client = http_client::build_client(Duration::from_secs(config.timeout_secs));
        Self { config, client }
    }

    /// Wrap embeds into a webhook payload.
    fn build_payload(&self, embeds: Vec<Value>) -> Value {
        let mut payload = json!({ "embeds": embeds });

        if let Some(username) = &self.config.username {
            payload["username"] = json!(username);
        }
        if let Some(avatar_url) = &self.config.avatar_url {
            payload["avatar_url"] = json!(avatar_url);
        }

        payload
    }

    fn approval_embed(
        pending_count: usize,
        high_priority_count: usize,
        compliance_warnings: usize,
        dashboard_url: &str,
    ) -> Value {
        let color = if compliance_warnings > 0 {
            COLOR_WARNING
        } else {
            COLOR_INFO
        };
        let mut embed = json!({
            "title": format!("{} items awaiting approval", pending_count),
            "color": color,
            "timestamp": Utc::now().to_rfc3339(),
            "fields": [
                { "name": "Pending", "value": pending_count.to_string(), "inline": true },
                { "name": "High priority", "value": high_priority_count.to_string(), "inline": true },
                { "name": "Compliance warnings", "value": compliance_warnings.to_string(), "inline": true },
            ],
        });
        if !dashboard_url.is_empty() {
            embed["url"] = json!(dashboard_url);
            embed["description"] = json!(format!("[Open the approval dashboard]({})", dashboard_url));
        }
        embed
    }

    fn publish_success_embed(title: &str, url: &str, time: DateTime<Utc>, excerpt: &str) -> Value {
        json!({
            "title": format!("Published: {}", truncate_chars(title, 200)),
            "url": url,
            "description": excerpt,
            "color": COLOR_SUCCESS,
            "timestamp": time.to_rfc3339(),
        })
    }

    fn publish_batch_embed(entries: &[BatchEntry]) -> Value {
        let mut lines: Vec<String> = entries
            .iter()
            .take(MAX_BATCH_LINES)
            .map(|e| {
                format!(
                    "• [{}]({}) at {}",
                    truncate_chars(&e.title, 80),
                    e.target_url,
                    e.publish_time.format("%H:%M UTC")
                )
            })
            .collect();
        if entries.len() > MAX_BATCH_LINES {
            lines.push(format!("…and {} more", entries.len() - MAX_BATCH_LINES));
        }

        let latest = entries
            .iter()
            .map(|e| e.publish_time)
            .max()
            .unwrap_or_else(Utc::now);

        json!({
            "title": format!("{} posts published", entries.len()),
            "description": lines.join("\n"),
            "color": COLOR_SUCCESS,
            "timestamp": latest.to_rfc3339(),
        })
    }

    fn publish_failure_embed(failure: &PublishFailure) -> Value {
        let mut fields = vec![
            json!({ "name": "Reason", "value": truncate_chars(&failure.reason, 1000), "inline": false }),
            json!({ "name": "Error", "value": failure.error_kind, "inline": true }),
        ];
        if let Some(scheduled) = failure.scheduled_time {
            fields.push(json!({
                "name": "Scheduled",
                "value": scheduled.format("%Y-%m-%d %H:%M UTC").to_string(),
                "inline": true,
            }));
        }

        let mut embed = json!({
            "title": format!("Publish failed: {}", truncate_chars(&failure.title, 200)),
            "color": COLOR_ERROR,
            "timestamp": Utc::now().to_rfc3339(),
            "fields": fields,
        });
        if let Some(retry_url) = &failure.retry_url {
            embed["url"] = json!(retry_url);
            embed["description"] = json!(format!("[Retry]({})", retry_url));
        }
        embed
    }

    fn daily_summary_embed(
        published: usize,
        pending: usize,
        failed: usize,
        top_post: Option<&str>,
    ) -> Value {
        let color = if failed > 0 { COLOR_WARNING } else { COLOR_NEUTRAL };
        let mut fields = vec![
            json!({ "name": "Published", "value": published.to_string(), "inline": true }),
            json!({ "name": "Pending approval", "value": pending.to_string(), "inline": true }),
            json!({ "name": "Failed", "value": failed.to_string(), "inline": true }),
        ];
        if let Some(top) = top_post {
            fields.push(json!({ "name": "Latest post", "value": truncate_chars(top, 200), "inline": false }));
        }
        json!({
            "title": "Daily summary",
            "color": color,
            "timestamp": Utc::now().to_rfc3339(),
            "fields": fields,
        })
    }

    /// POST one payload and classify the outcome.
    async fn post(&self, payload: &Value) -> ChannelResult<()> {
        if !self.is_enabled() {
            return Err(ChannelError::Disabled);
        }

        let response = self
            .client
            .post(&self.config.webhook_url)
            .json(payload)
            .send()
            .await
            .map_err(|e| ChannelError::Delivery(format!("webhook request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let header_hint = retry_after_from_headers(response.headers());
        let body = response.text().await.unwrap_or_default();
        let err = classify_failure(status, header_hint, &body);
        warn!(status = %status, error = %err, "Webhook send failed");
        Err(err)
    }
}

/// Parse the retry hint from `Retry-After` or `X-RateLimit-Reset-After`.
fn retry_after_from_headers(headers: &HeaderMap) -> Option<Duration> {
    ["Retry-After", "X-RateLimit-Reset-After"]
        .into_iter()
        .filter_map(|name| headers.get(name))
        .filter_map(|v| v.to_str().ok())
        .filter_map(|s| s.trim().parse::<f64>().ok())
        .find_map(hint_duration)
}

/// Parse the `retry_after` field of a JSON error body.
fn retry_after_from_body(body: &str) -> Option<Duration> {
    let value: Value = serde_json::from_str(body).ok()?;
    hint_duration(value.get("retry_after")?.as_f64()?)
}

/// Negative, non-finite and out-of-range hints are ignored.
fn hint_duration(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs).ok()
}

/// Map a non-success response onto a [`ChannelError`].
fn classify_failure(status: StatusCode, header_hint: Option<Duration>, body: &str) -> ChannelError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ChannelError::RateLimited {
            retry_after: header_hint.or_else(|| retry_after_from_body(body)),
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ChannelError::Unauthorized(format!("{} - {}", status, truncate_chars(body, 200)))
        }
        _ => ChannelError::Delivery(format!("{} - {}", status, truncate_chars(body, 200))),
    }
}

#[async_trait]
impl NotificationChannel for DiscordWebhookChannel {
    fn channel_type(&self) -> &'static str {
        "discord"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled && !self.config.webhook_url.is_empty()
    }

    async fn send_approval_summary(
        &self,
        pending_count: usize,
        high_priority_count: usize,
        compliance_warnings: usize,
        dashboard_url: &str,
    ) -> ChannelResult<()> {
        let embed = Self::approval_embed(
            pending_count,
            high_priority_count,
            compliance_warnings,
            dashboard_url,
        );
        self.post(&self.build_payload(vec![embed])).await?;
        debug!(pending_count, "Approval summary sent");
        Ok(())
    }

    async fn send_publish_success(
        &self,
        title: &str,
        url: &str,
        time: DateTime<Utc>,
        excerpt: &str,
    ) -> ChannelResult<()> {
        let embed = Self::publish_success_embed(title, url, time, excerpt);
        self.post(&self.build_payload(vec![embed])).await?;
        debug!(title, "Publish success sent");
        Ok(())
    }

    async fn send_publish_batch(&self, entries: &[BatchEntry]) -> ChannelResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let embed = Self::publish_batch_embed(entries);
        self.post(&self.build_payload(vec![embed])).await?;
        debug!(count = entries.len(), "Publish batch sent");
        Ok(())
    }

    async fn send_publish_failure(&self, failure: &PublishFailure) -> ChannelResult<()> {
        let embed = Self::publish_failure_embed(failure);
        self.post(&self.build_payload(vec![embed])).await?;
        debug!(item_id = %failure.item_id, "Publish failure sent");
        Ok(())
    }

    async fn send_daily_summary(
        &self,
        published: usize,
        pending: usize,
        failed: usize,
        top_post: Option<&str>,
    ) -> ChannelResult<()> {
        let embed = Self::daily_summary_embed(published, pending, failed, top_post);
        self.post(&self.build_payload(vec![embed])).await?;
        debug!(published, pending, failed, "Daily summary sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn entry(n: usize) -> BatchEntry {
        BatchEntry {
            item_id: format!("item-{}", n),
            title: format!("Post {}", n),
            caption_excerpt: "caption".to_string(),
            target_url: format!("https://example.com/{}", n),
            publish_time: Utc::now(),
        }
    }

    #[test]
    fn test_webhook_config_default() {
        let config = WebhookConfig::default();
        assert!(!config.enabled);
        assert!(config.webhook_url.is_empty());
        assert_eq!(config.timeout_secs, 30);
    }

    #[tokio::test]
    async fn test_disabled_channel_refuses_to_send() {
        let channel = DiscordWebhookChannel::new(WebhookConfig::default());
        assert!(!channel.is_enabled());

        let result = channel.send_approval_summary(5, 0, 0, "").await;
        assert_eq!(result, Err(ChannelError::Disabled));
    }

    #[test]
    fn test_build_payload_with_custom_username() {
        let config = WebhookConfig {
            enabled: true,
            webhook_url: "https://example.com".to_string(),
            username: Some("CustomBot".to_string()),
            avatar_url: Some("https://example.com/avatar.png".to_string()),
            ..Default::default()
        };
        let channel = DiscordWebhookChannel::new(config);

        let payload = channel.build_payload(vec![json!({ "title": "t" })]);

        assert_eq!(payload["username"], "CustomBot");
        assert_eq!(payload["avatar_url"], "https://example.com/avatar.png");
        assert!(payload["embeds"].is_array());
    }

    #[test]
    fn test_approval_embed() {
        let embed = DiscordWebhookChannel::approval_embed(7, 2, 1, "https://dash/approvals");
        assert_eq!(embed["title"], "7 items awaiting approval");
        assert_eq!(embed["color"], COLOR_WARNING);
        assert_eq!(embed["url"], "https://dash/approvals");
        assert_eq!(embed["fields"][1]["value"], "2");

        let calm = DiscordWebhookChannel::approval_embed(5, 0, 0, "");
        assert_eq!(calm["color"], COLOR_INFO);
        assert!(calm.get("url").is_none());
    }

    #[test]
    fn test_batch_embed_caps_listed_entries() {
        let entries: Vec<_> = (0..13).map(entry).collect();
        let embed = DiscordWebhookChannel::publish_batch_embed(&entries);

        assert_eq!(embed["title"], "13 posts published");
        let description = embed["description"].as_str().unwrap();
        assert_eq!(description.lines().count(), MAX_BATCH_LINES + 1);
        assert!(description.ends_with("…and 3 more"));
        assert!(description.contains("[Post 0](https://example.com/0)"));
    }

    #[test]
    fn test_failure_embed_includes_retry_link() {
        let failure = PublishFailure {
            item_id: "i1".to_string(),
            title: "Launch".to_string(),
            reason: "token expired".to_string(),
            error_kind: "auth".to_string(),
            retry_url: Some("https://dash/retry/i1".to_string()),
            scheduled_time: None,
        };
        let embed = DiscordWebhookChannel::publish_failure_embed(&failure);
        assert_eq!(embed["title"], "Publish failed: Launch");
        assert_eq!(embed["url"], "https://dash/retry/i1");
        assert_eq!(embed["fields"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_daily_summary_embed() {
        let embed = DiscordWebhookChannel::daily_summary_embed(4, 3, 1, Some("Best post"));
        assert_eq!(embed["color"], COLOR_WARNING);
        assert_eq!(embed["fields"].as_array().unwrap().len(), 4);
        assert_eq!(embed["fields"][3]["value"], "Best post");
    }

    #[test]
    fn test_classify_rate_limited_prefers_header() {
        let err = classify_failure(
            StatusCode::TOO_MANY_REQUESTS,
            Some(Duration::from_secs(2)),
            r#"{"retry_after": 9.0}"#,
        );
        assert_eq!(
            err,
            ChannelError::RateLimited {
                retry_after: Some(Duration::from_secs(2))
            }
        );

        let from_body =
            classify_failure(StatusCode::TOO_MANY_REQUESTS, None, r#"{"retry_after": 1.5}"#);
        assert_eq!(
            from_body,
            ChannelError::RateLimited {
                retry_after: Some(Duration::from_millis(1500))
            }
        );
    }

    #[test]
    fn test_classify_unauthorized_and_generic() {
        assert!(classify_failure(StatusCode::UNAUTHORIZED, None, "").is_unauthorized());
        assert!(classify_failure(StatusCode::FORBIDDEN, None, "").is_unauthorized());

        let generic = classify_failure(StatusCode::INTERNAL_SERVER_ERROR, None, "oops");
        assert!(matches!(generic, ChannelError::Delivery(_)));
        assert!(!generic.is_rate_limited());
    }

    #[test]
    fn test_retry_after_from_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after_from_headers(&headers), None);

        headers.insert("X-RateLimit-Reset-After", HeaderValue::from_static("0.5"));
        assert_eq!(
            retry_after_from_headers(&headers),
            Some(Duration::from_millis(500))
        );

        headers.insert("Retry-After", HeaderValue::from_static("3"));
        assert_eq!(
            retry_after_from_headers(&headers),
            Some(Duration::from_secs(3))
        );
    }

    #[test]
    fn test_oversized_retry_hint_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert("Retry-After", HeaderValue::from_static("1e30"));
        assert_eq!(retry_after_from_headers(&headers), None);

        headers.insert("X-RateLimit-Reset-After", HeaderValue::from_static("-4"));
        assert_eq!(retry_after_from_headers(&headers), None);

        headers.insert("X-RateLimit-Reset-After", HeaderValue::from_static("7"));
        assert_eq!(
            retry_after_from_headers(&headers),
            Some(Duration::from_secs(7))
        );

        let err = classify_failure(
            StatusCode::TOO_MANY_REQUESTS,
            None,
            r#"{"retry_after": 1e30}"#,
        );
        assert_eq!(err, ChannelError::RateLimited { retry_after: None });
    }
}
