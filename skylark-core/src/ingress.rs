//! Event ingress - validates raw activity records and publishes events.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use skylark_types::{Event, EventId, EventType, Payload, UserId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::bus::{BusMessage, Publisher, SignalBus};
use crate::config::IngressConfig;
use crate::types::IngressError;

/// A structured activity record as received from the outside.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    /// External deduplication key; derived from the content when absent
    #[serde(default)]
    pub dedup_key: Option<String>,
    pub user_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    /// RFC 3339 timestamp
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default = "empty_object")]
    pub payload: serde_json::Value,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(Payload::new())
}

impl RawEvent {
    /// A record stamped with the current time.
    pub fn new(user_id: impl Into<String>, event_type: EventType) -> Self {
        Self {
            dedup_key: None,
            user_id: user_id.into(),
            event_type: event_type.as_str().to_string(),
            timestamp: Some(Utc::now().to_rfc3339()),
            payload: empty_object(),
        }
    }

    pub fn with_dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = Some(key.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp.to_rfc3339());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Ingress counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngressStats {
    pub accepted: u64,
    pub rejected_invalid: u64,
    pub rejected_duplicate: u64,
    pub remembered_keys: usize,
}

struct IngressState {
    next_sequence: u64,
    seen: HashMap<String, DateTime<Utc>>,
    last_prune: DateTime<Utc>,
}

/// Validates, sequences, deduplicates and publishes events.
pub struct EventIngress {
    config: IngressConfig,
    bus: Arc<SignalBus>,
    // Sequence assignment, dedup and publish happen under this one lock.
    state: Mutex<IngressState>,
    accepted: AtomicU64,
    rejected_invalid: AtomicU64,
    rejected_duplicate: AtomicU64,
}

impl EventIngress {
    pub fn new(bus: Arc<SignalBus>) -> Self {
        Self::with_config(IngressConfig::default(), bus)
    }

    pub fn with_config(config: IngressConfig, bus: Arc<SignalBus>) -> Self {
        Self {
            config,
            bus,
            state: Mutex::new(IngressState {
                next_sequence: 1,
                seen: HashMap::new(),
                last_prune: Utc::now(),
            }),
            accepted: AtomicU64::new(0),
            rejected_invalid: AtomicU64::new(0),
            rejected_duplicate: AtomicU64::new(0),
        }
    }

    /// Validate a raw record and publish it exactly once.
    pub async fn ingest(&self, raw: RawEvent) -> Result<Event, IngressError> {
        let now = Utc::now();
        let validated = match self.validate(&raw, now) {
            Ok(v) => v,
            Err(e) => {
                self.rejected_invalid.fetch_add(1, Ordering::Relaxed);
                warn!(user_id = %raw.user_id, error = %e, "Rejected raw event");
                return Err(e);
            }
        };
        let dedup_key = match raw.dedup_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => content_key(&validated),
        };

        let mut state = self.state.lock().await;
        self.prune(&mut state, now);

        if state.seen.contains_key(&dedup_key) {
            self.rejected_duplicate.fetch_add(1, Ordering::Relaxed);
            debug!(dedup_key = %dedup_key, "Duplicate event rejected");
            return Err(IngressError::Duplicate { dedup_key });
        }

        let event = Event {
            id: EventId::new(),
            sequence: state.next_sequence,
            dedup_key: dedup_key.clone(),
            user_id: validated.user_id,
            event_type: validated.event_type,
            timestamp: validated.timestamp,
            payload: validated.payload,
        };

        self.bus
            .publish(Publisher::Ingress, BusMessage::event(event.clone()))
            .await?;

        state.next_sequence += 1;
        state.seen.insert(dedup_key, now);
        self.accepted.fetch_add(1, Ordering::Relaxed);

        debug!(
            event_id = %event.id,
            sequence = event.sequence,
            user_id = %event.user_id,
            event_type = %event.event_type,
            "Event ingested"
        );
        Ok(event)
    }

    /// Whether a dedup key is currently remembered.
    pub async fn is_known(&self, dedup_key: &str) -> bool {
        self.state.lock().await.seen.contains_key(dedup_key)
    }

    pub async fn stats(&self) -> IngressStats {
        IngressStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected_invalid: self.rejected_invalid.load(Ordering::Relaxed),
            rejected_duplicate: self.rejected_duplicate.load(Ordering::Relaxed),
            remembered_keys: self.state.lock().await.seen.len(),
        }
    }

    fn validate(&self, raw: &RawEvent, now: DateTime<Utc>) -> Result<Validated, IngressError> {
        let user_id = raw.user_id.trim();
        if user_id.is_empty() {
            return Err(IngressError::Validation("user_id is required".into()));
        }
        if user_id.chars().count() > self.config.max_user_id_len {
            return Err(IngressError::Validation(format!(
                "user_id longer than {} characters",
                self.config.max_user_id_len
            )));
        }

        let event_type = EventType::parse(raw.event_type.trim()).ok_or_else(|| {
            IngressError::Validation(format!("unknown event type '{}'", raw.event_type))
        })?;

        let timestamp = raw
            .timestamp
            .as_deref()
            .ok_or_else(|| IngressError::Validation("timestamp is required".into()))?;
        let timestamp = DateTime::parse_from_rfc3339(timestamp)
            .map_err(|e| IngressError::Validation(format!("invalid timestamp: {}", e)))?
            .with_timezone(&Utc);
        let skew = Duration::seconds(self.config.max_clock_skew_secs as i64);
        if timestamp > now + skew {
            return Err(IngressError::Validation(format!(
                "timestamp {} is in the future",
                timestamp.to_rfc3339()
            )));
        }

        let payload = match &raw.payload {
            serde_json::Value::Object(map) => map.clone(),
            serde_json::Value::Null => Payload::new(),
            _ => return Err(IngressError::Validation("payload must be an object".into())),
        };

        Ok(Validated {
            user_id: UserId::new(user_id),
            event_type,
            timestamp,
            payload,
        })
    }

    fn prune(&self, state: &mut IngressState, now: DateTime<Utc>) {
        let retention = Duration::seconds(self.config.dedup_retention_secs as i64);
        if now - state.last_prune < retention.min(Duration::seconds(60)) {
            return;
        }
        let before = state.seen.len();
        state.seen.retain(|_, seen_at| now - *seen_at < retention);
        state.last_prune = now;
        let pruned = before - state.seen.len();
        if pruned > 0 {
            debug!(pruned, "Pruned expired dedup keys");
        }
    }
}

struct Validated {
    user_id: UserId,
    event_type: EventType,
    timestamp: DateTime<Utc>,
    payload: Payload,
}

/// SHA-256 of the canonical JSON of the record content.
fn content_key(validated: &Validated) -> String {
    // serde_json maps are key-sorted, which makes this encoding canonical.
    let canonical = serde_json::json!({
        "user_id": validated.user_id.as_str(),
        "type": validated.event_type.as_str(),
        "timestamp": validated.timestamp.to_rfc3339(),
        "payload": validated.payload,
    });
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MessageFilter;

    async fn setup() -> (EventIngress, crate::bus::Mailbox) {
        let bus = Arc::new(SignalBus::new());
        let mailbox = bus.attach("observer").await.unwrap();
        bus.subscribe("observer", &MessageFilter::all_events()).await.unwrap();
        (EventIngress::new(bus), mailbox)
    }

    #[tokio::test]
    async fn test_ingest_publishes_once() {
        let (ingress, mut mailbox) = setup().await;
        let raw = RawEvent::new("u-1", EventType::Interaction).with_dedup_key("ext-1");

        let event = ingress.ingest(raw.clone()).await.unwrap();
        assert_eq!(event.sequence, 1);
        assert!(mailbox.try_recv().is_some());

        let duplicate = ingress.ingest(raw).await;
        assert!(matches!(duplicate, Err(IngressError::Duplicate { .. })));
        assert!(mailbox.try_recv().is_none());
        assert_eq!(ingress.stats().await.rejected_duplicate, 1);
    }

    #[tokio::test]
    async fn test_content_key_dedup() {
        let (ingress, _mailbox) = setup().await;
        let raw = RawEvent::new("u-1", EventType::Milestone)
            .with_payload(serde_json::json!({"milestone": "first_post"}));

        let event = ingress.ingest(raw.clone()).await.unwrap();
        assert_eq!(event.dedup_key.len(), 64);
        assert!(ingress.is_known(&event.dedup_key).await);
        assert!(ingress.ingest(raw).await.is_err());
    }

    #[tokio::test]
    async fn test_dedup_key_forgotten_after_retention() {
        let bus = Arc::new(SignalBus::new());
        let mut mailbox = bus.attach("observer").await.unwrap();
        bus.subscribe("observer", &MessageFilter::all_events()).await.unwrap();
        let config = IngressConfig {
            dedup_retention_secs: 0,
            ..IngressConfig::default()
        };
        let ingress = EventIngress::with_config(config, bus);
        let raw = RawEvent::new("u-1", EventType::Interaction).with_dedup_key("ext-1");

        ingress.ingest(raw.clone()).await.unwrap();
        let again = ingress.ingest(raw).await.unwrap();
        assert_eq!(again.sequence, 2);
        assert!(mailbox.try_recv().is_some());
        assert!(mailbox.try_recv().is_some());
    }

    #[tokio::test]
    async fn test_sequence_increases() {
        let (ingress, _mailbox) = setup().await;
        let first = ingress
            .ingest(RawEvent::new("u-1", EventType::SessionStart).with_dedup_key("a"))
            .await
            .unwrap();
        let second = ingress
            .ingest(RawEvent::new("u-2", EventType::SessionStart).with_dedup_key("b"))
            .await
            .unwrap();
        assert!(second.sequence > first.sequence);
        assert!(second.id > first.id);
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let (ingress, mut mailbox) = setup().await;

        let empty_user = RawEvent::new("  ", EventType::Interaction);
        assert!(matches!(ingress.ingest(empty_user).await, Err(IngressError::Validation(_))));

        let mut unknown_type = RawEvent::new("u-1", EventType::Interaction);
        unknown_type.event_type = "page_view".into();
        assert!(matches!(ingress.ingest(unknown_type).await, Err(IngressError::Validation(_))));

        let mut no_timestamp = RawEvent::new("u-1", EventType::Interaction);
        no_timestamp.timestamp = None;
        assert!(ingress.ingest(no_timestamp).await.is_err());

        let future = RawEvent::new("u-1", EventType::Interaction).at(Utc::now() + Duration::hours(1));
        assert!(ingress.ingest(future).await.is_err());

        let bad_payload = RawEvent::new("u-1", EventType::Interaction).with_payload(serde_json::json!([1, 2]));
        assert!(ingress.ingest(bad_payload).await.is_err());

        assert!(mailbox.try_recv().is_none());
        assert_eq!(ingress.stats().await.rejected_invalid, 5);
    }

    #[test]
    fn test_raw_event_from_json() {
        let raw: RawEvent = serde_json::from_str(
            r#"{"user_id":"u-1","type":"peer_recognition","timestamp":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(raw.event_type, "peer_recognition");
        assert!(raw.payload.is_object());
    }
}
