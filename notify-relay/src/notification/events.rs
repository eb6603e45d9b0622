//! Notification events.
//!
//! Defines the live status events emitted by the notifiers for UI observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Kind of a live notification event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEventType {
    /// The approval queue reached the alert threshold.
    QueueThresholdReached,
    /// A notification was delivered.
    Sent,
    /// A notification could not be delivered.
    Failed,
    /// A notification was parked in a retry queue.
    QueuedForRetry,
    /// Pending items carry compliance warnings.
    ComplianceWarning,
    /// Content was published.
    PublishSuccess,
    /// Publishing content failed.
    PublishFailed,
}

impl NotificationEventType {
    /// All event types, in declaration order.
    pub const ALL: [NotificationEventType; 7] = [
        Self::QueueThresholdReached,
        Self::Sent,
        Self::Failed,
        Self::QueuedForRetry,
        Self::ComplianceWarning,
        Self::PublishSuccess,
        Self::PublishFailed,
    ];

    /// Canonical snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QueueThresholdReached => "queue_threshold_reached",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::QueuedForRetry => "queued_for_retry",
            Self::ComplianceWarning => "compliance_warning",
            Self::PublishSuccess => "publish_success",
            Self::PublishFailed => "publish_failed",
        }
    }

    /// Human-friendly label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::QueueThresholdReached => "Queue Threshold Reached",
            Self::Sent => "Notification Sent",
            Self::Failed => "Notification Failed",
            Self::QueuedForRetry => "Queued For Retry",
            Self::ComplianceWarning => "Compliance Warning",
            Self::PublishSuccess => "Publish Success",
            Self::PublishFailed => "Publish Failed",
        }
    }

    /// Parse a canonical name, tolerating `.`/`-`/space separators and case.
    pub fn parse(input: &str) -> Option<Self> {
        let normalized = input
            .trim()
            .to_ascii_lowercase()
            .replace(['.', '-', ' '], "_");
        Self::ALL.into_iter().find(|t| t.as_str() == normalized)
    }
}

impl std::fmt::Display for NotificationEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A live status event.
///
/// Created by the emitting notifier, copied into each subscriber buffer and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub event_id: Uuid,
    pub event_type: NotificationEventType,
    pub data: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl NotificationEvent {
    /// Create an event stamped with the current time.
    ///
    /// Object payloads become the event data; any other value is stored under `"value"`.
    pub fn new(event_type: NotificationEventType, data: Value) -> Self {
        Self::at(event_type, data, Utc::now())
    }

    /// Create an event with an explicit timestamp.
    pub fn at(event_type: NotificationEventType, data: Value, timestamp: DateTime<Utc>) -> Self {
        let data = match data {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            data,
            timestamp,
        }
    }

    /// Read a payload field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_type_round_trips_through_parse() {
        for event_type in NotificationEventType::ALL {
            assert_eq!(NotificationEventType::parse(event_type.as_str()), Some(event_type));
        }
        assert_eq!(
            NotificationEventType::parse("Queue-Threshold.Reached"),
            Some(NotificationEventType::QueueThresholdReached)
        );
        assert_eq!(NotificationEventType::parse("unknown"), None);
    }

    #[test]
    fn test_event_type_serializes_snake_case() {
        let json = serde_json::to_string(&NotificationEventType::QueuedForRetry).unwrap();
        assert_eq!(json, "\"queued_for_retry\"");
    }

    #[test]
    fn test_event_data_from_object() {
        let event = NotificationEvent::new(
            NotificationEventType::Sent,
            json!({ "total_pending": 7, "kind": "approval" }),
        );
        assert_eq!(event.get("total_pending"), Some(&json!(7)));
        assert_eq!(event.get("kind"), Some(&json!("approval")));
    }

    #[test]
    fn test_event_data_wraps_scalars() {
        let event = NotificationEvent::new(NotificationEventType::Failed, json!("boom"));
        assert_eq!(event.get("value"), Some(&json!("boom")));

        let empty = NotificationEvent::new(NotificationEventType::Failed, Value::Null);
        assert!(empty.data.is_empty());
    }

    #[test]
    fn test_event_ids_are_unique() {
        let a = NotificationEvent::new(NotificationEventType::Sent, Value::Null);
        let b = NotificationEvent::new(NotificationEventType::Sent, Value::Null);
        assert_ne!(a.event_id, b.event_id);
    }
}
