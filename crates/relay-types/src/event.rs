use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A decoded event, ready to be handed to a batch processor.
///
/// Events arrive as JSON in the bundled decoder:
///
/// ```json
/// { "kind": "span", "id": "e-1", "labels": {"service": "checkout"}, "body": {"duration_ms": 12} }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Producer-assigned identifier, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Event kind (e.g. "span", "metric", "log")
    pub kind: String,
    /// When the event happened, as reported by the producer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Free-form string labels
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
    /// Kind-specific payload
    #[serde(default)]
    pub body: serde_json::Value,
}

impl Event {
    /// Create an event of the given kind with an empty body
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            id: None,
            kind: kind.into(),
            timestamp: None,
            labels: HashMap::new(),
            body: serde_json::Value::Null,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = body;
        self
    }
}

/// A group of events processed together.
///
/// The consumer always builds single-event batches; processors must still
/// accept any length.
pub type Batch = Vec<Event>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_parses_minimal_json() {
        let event: Event = serde_json::from_str(r#"{"kind":"log"}"#).unwrap();
        assert_eq!(event.kind, "log");
        assert!(event.id.is_none());
        assert!(event.labels.is_empty());
        assert_eq!(event.body, serde_json::Value::Null);
    }

    #[test]
    fn test_event_rejects_missing_kind() {
        let result: Result<Event, _> = serde_json::from_str(r#"{"id":"e-1"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_sets_fields() {
        let event = Event::new("span")
            .with_id("e-7")
            .with_label("service", "checkout")
            .with_body(serde_json::json!({"duration_ms": 12}));

        assert_eq!(event.id.as_deref(), Some("e-7"));
        assert_eq!(event.labels.get("service").map(String::as_str), Some("checkout"));
        assert_eq!(event.body["duration_ms"], 12);
    }

    #[test]
    fn test_empty_optional_fields_are_not_serialized() {
        let json = serde_json::to_string(&Event::new("metric")).unwrap();
        assert!(!json.contains("labels"));
        assert!(!json.contains("timestamp"));
        assert!(!json.contains("\"id\""));
    }
}
