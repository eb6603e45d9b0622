//! Relay configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::notification::{ApprovalNotifierConfig, WebhookConfig};
use crate::{Error, Result};

/// Runtime configuration of the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Webhook target. Empty disables the channel.
    pub webhook_url: String,
    /// Master switch for both notifiers.
    pub enabled: bool,
    /// Pending items needed before an approval alert goes out.
    pub approval_threshold: usize,
    /// Minimum minutes between two approval alerts.
    pub cooldown_minutes: u64,
    /// Minutes publish successes are collected before one message goes out.
    pub batch_window_minutes: u64,
    /// UTC hour (0-23) from which the daily summary is sent.
    pub daily_summary_hour: u32,
    /// Link included in approval alerts.
    pub dashboard_url: String,
    /// Endpoint listing pending approval items.
    pub queue_url: String,
    /// Durable store connection string.
    pub redis_url: String,
    /// Seconds between sweep runs.
    pub sweep_interval_secs: u64,
    /// Display name used by the webhook.
    pub webhook_username: String,
    /// HTTP timeout for webhook calls.
    pub request_timeout_secs: u64,
    /// Directory for rolling log files; console only when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            webhook_url: String::new(),
            enabled: true,
            approval_threshold: 5,
            cooldown_minutes: 60,
            batch_window_minutes: 15,
            daily_summary_hour: 22,
            dashboard_url: "http://localhost:3000/approvals".to_string(),
            queue_url: "http://localhost:3000/api/approvals/pending".to_string(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            sweep_interval_secs: 300,
            webhook_username: "notify-relay".to_string(),
            request_timeout_secs: 30,
            log_dir: None,
        }
    }
}

impl RelayConfig {
    /// Read overrides from the process environment.
    pub fn from_env_or_default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    ///
    /// Blank values are ignored. Values that do not parse are ignored with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(url) = get("NOTIFY_WEBHOOK_URL") {
            config.webhook_url = url;
        }
        if let Some(url) = get("NOTIFY_DASHBOARD_URL") {
            config.dashboard_url = url;
        }
        if let Some(url) = get("NOTIFY_QUEUE_URL") {
            config.queue_url = url;
        }
        if let Some(url) = get("REDIS_URL") {
            config.redis_url = url;
        }
        if let Some(username) = get("NOTIFY_WEBHOOK_USERNAME") {
            config.webhook_username = username;
        }
        if let Some(dir) = get("NOTIFY_LOG_DIR") {
            config.log_dir = Some(PathBuf::from(dir));
        }

        if let Some(raw) = get("NOTIFY_ENABLED") {
            match parse_bool(&raw) {
                Some(enabled) => config.enabled = enabled,
                None => warn!(key = "NOTIFY_ENABLED", value = %raw, "Ignoring invalid boolean"),
            }
        }

        parse_into(&get, "NOTIFY_APPROVAL_THRESHOLD", &mut config.approval_threshold);
        parse_into(&get, "NOTIFY_COOLDOWN_MINUTES", &mut config.cooldown_minutes);
        parse_into(&get, "NOTIFY_BATCH_WINDOW_MINUTES", &mut config.batch_window_minutes);
        parse_into(&get, "NOTIFY_DAILY_SUMMARY_HOUR", &mut config.daily_summary_hour);
        parse_into(&get, "NOTIFY_SWEEP_INTERVAL_SECS", &mut config.sweep_interval_secs);
        parse_into(&get, "NOTIFY_REQUEST_TIMEOUT_SECS", &mut config.request_timeout_secs);

        config
    }

    /// Reject settings the relay cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.approval_threshold == 0 {
            return Err(Error::config("approval threshold must be at least 1"));
        }
        if self.cooldown_minutes == 0 {
            return Err(Error::config("cooldown must be at least one minute"));
        }
        if self.batch_window_minutes == 0 {
            return Err(Error::config("batch window must be at least one minute"));
        }
        if self.daily_summary_hour > 23 {
            return Err(Error::config(format!(
                "daily summary hour {} is not between 0 and 23",
                self.daily_summary_hour
            )));
        }
        if self.sweep_interval_secs == 0 {
            return Err(Error::config("sweep interval must be at least one second"));
        }
        if !self.webhook_url.is_empty() {
            url::Url::parse(&self.webhook_url)
                .map_err(|e| Error::config(format!("invalid webhook url: {}", e)))?;
        }
        url::Url::parse(&self.dashboard_url)
            .map_err(|e| Error::config(format!("invalid dashboard url: {}", e)))?;
        url::Url::parse(&self.queue_url)
            .map_err(|e| Error::config(format!("invalid queue url: {}", e)))?;
        Ok(())
    }

    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.cooldown_minutes as i64)
    }

    pub fn batch_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.batch_window_minutes as i64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Settings of the webhook channel. The channel is off without a URL.
    pub fn webhook_config(&self) -> WebhookConfig {
        WebhookConfig {
            enabled: !self.webhook_url.is_empty(),
            webhook_url: self.webhook_url.clone(),
            username: Some(self.webhook_username.clone()),
            avatar_url: None,
            timeout_secs: self.request_timeout_secs,
        }
    }

    pub fn approval_config(&self) -> ApprovalNotifierConfig {
        ApprovalNotifierConfig {
            enabled: self.enabled,
            threshold: self.approval_threshold,
            dashboard_url: self.dashboard_url.clone(),
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_into<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str, target: &mut T) {
    if let Some(raw) = get(key) {
        match raw.parse::<T>() {
            Ok(value) => *target = value,
            Err(_) => warn!(key, value = %raw, "Ignoring unparseable setting"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert!(config.enabled);
        assert_eq!(config.approval_threshold, 5);
        assert_eq!(config.cooldown(), chrono::Duration::minutes(60));
        assert_eq!(config.batch_window(), chrono::Duration::minutes(15));
        assert_eq!(config.daily_summary_hour, 22);
        assert_eq!(config.sweep_interval(), Duration::from_secs(300));
        assert!(config.validate().is_ok());
        assert!(!config.webhook_config().enabled);
    }

    #[test]
    fn test_env_overrides() {
        let config = RelayConfig::from_lookup(lookup(&[
            ("NOTIFY_WEBHOOK_URL", "https://discord.com/api/webhooks/1/abc"),
            ("NOTIFY_ENABLED", "off"),
            ("NOTIFY_APPROVAL_THRESHOLD", "10"),
            ("NOTIFY_COOLDOWN_MINUTES", " 30 "),
            ("NOTIFY_LOG_DIR", "/var/log/relay"),
        ]));

        assert!(!config.enabled);
        assert_eq!(config.approval_threshold, 10);
        assert_eq!(config.cooldown_minutes, 30);
        assert_eq!(config.log_dir, Some(PathBuf::from("/var/log/relay")));
        assert!(config.webhook_config().enabled);
        assert_eq!(
            config.webhook_config().username.as_deref(),
            Some("notify-relay")
        );
    }

    #[test]
    fn test_unparseable_values_keep_defaults() {
        let config = RelayConfig::from_lookup(lookup(&[
            ("NOTIFY_APPROVAL_THRESHOLD", "lots"),
            ("NOTIFY_ENABLED", "maybe"),
            ("NOTIFY_BATCH_WINDOW_MINUTES", ""),
        ]));

        assert_eq!(config.approval_threshold, 5);
        assert!(config.enabled);
        assert_eq!(config.batch_window_minutes, 15);
    }

    #[test]
    fn test_validation() {
        let invalid = [
            RelayConfig {
                approval_threshold: 0,
                ..Default::default()
            },
            RelayConfig {
                daily_summary_hour: 24,
                ..Default::default()
            },
            RelayConfig {
                cooldown_minutes: 0,
                ..Default::default()
            },
            RelayConfig {
                batch_window_minutes: 0,
                ..Default::default()
            },
            RelayConfig {
                sweep_interval_secs: 0,
                ..Default::default()
            },
            RelayConfig {
                webhook_url: "not a url".to_string(),
                ..Default::default()
            },
        ];

        for config in invalid {
            assert!(matches!(config.validate(), Err(Error::Configuration(_))));
        }
    }
}
