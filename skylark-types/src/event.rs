//! User activity events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{EventId, UserId};

#[cfg(feature = "typescript")]
use ts_rs::TS;

/// Opaque key-value payload carried by events and interventions.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Kind of user activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Any interaction with community content or members
    Interaction,
    /// Answer to a survey or preference form
    SurveyResponse,
    /// A milestone the user reached
    Milestone,
    /// The user opened a session
    SessionStart,
    /// The user closed a session
    SessionEnd,
    /// Another member recognized this user
    PeerRecognition,
}

impl EventType {
    /// Every event type.
    pub const ALL: [EventType; 6] = [
        EventType::Interaction,
        EventType::SurveyResponse,
        EventType::Milestone,
        EventType::SessionStart,
        EventType::SessionEnd,
        EventType::PeerRecognition,
    ];

    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Interaction => "interaction",
            Self::SurveyResponse => "survey_response",
            Self::Milestone => "milestone",
            Self::SessionStart => "session_start",
            Self::SessionEnd => "session_end",
            Self::PeerRecognition => "peer_recognition",
        }
    }

    /// Parse a wire name.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated user activity record. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct Event {
    /// Unique event id
    pub id: EventId,
    /// Ingress sequence number (tie-break only, not a clock)
    pub sequence: u64,
    /// External deduplication key
    pub dedup_key: String,
    /// User the activity belongs to
    pub user_id: UserId,
    /// Activity kind
    pub event_type: EventType,
    /// When the activity happened
    pub timestamp: DateTime<Utc>,
    /// Opaque activity details
    #[cfg_attr(feature = "typescript", ts(type = "Record<string, unknown>"))]
    pub payload: Payload,
}

impl Event {
    /// Read a non-negative integer payload field, accepting integral floats.
    pub fn payload_u64(&self, key: &str) -> Option<u64> {
        let value = self.payload.get(key)?;
        value
            .as_u64()
            .or_else(|| value.as_f64().filter(|v| *v >= 0.0).map(|v| v as u64))
    }

    /// Read a numeric payload field.
    pub fn payload_f64(&self, key: &str) -> Option<f64> {
        self.payload.get(key).and_then(|v| v.as_f64())
    }

    /// Read a string payload field.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(|v| v.as_str())
    }

    /// Read a boolean payload field.
    pub fn payload_bool(&self, key: &str) -> Option<bool> {
        self.payload.get(key).and_then(|v| v.as_bool())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_names() {
        for event_type in EventType::ALL {
            assert_eq!(EventType::parse(event_type.as_str()), Some(event_type));
        }
        assert_eq!(EventType::parse("page_view"), None);
    }

    #[test]
    fn test_payload_accessors() {
        let mut payload = Payload::new();
        payload.insert("count".into(), serde_json::json!(3.0));
        payload.insert("target_user".into(), serde_json::json!("u-2"));
        let event = Event {
            id: EventId::new(),
            sequence: 1,
            dedup_key: "k".into(),
            user_id: UserId::from("u-1"),
            event_type: EventType::Interaction,
            timestamp: Utc::now(),
            payload,
        };

        assert_eq!(event.payload_u64("count"), Some(3));
        assert_eq!(event.payload_str("target_user"), Some("u-2"));
        assert_eq!(event.payload_u64("missing"), None);
    }
}
