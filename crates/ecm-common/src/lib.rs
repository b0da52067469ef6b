use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Outbox Types
// ============================================================================

/// A serialized, broker-agnostic event waiting to be written to the outbox
/// table. Produced by the outbox mappers at unit-of-work commit time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

/// A persisted outbox row as read back by the relay.
///
/// `id` is a monotonic identity column; it defines publish order for rows
/// about the same aggregate. `processed_at` moves from `None` to `Some`
/// exactly once, and only after the broker acknowledged the publish.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: i64,
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Wire Envelope
// ============================================================================

/// The versioned wire wrapper carried over the broker.
///
/// `event_id` is minted by the relay at publish time and is the idempotency
/// anchor for consumers that need de-duplication beyond at-least-once
/// transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub event_id: Uuid,
    #[serde(rename = "type")]
    pub event_type: String,
    pub aggregate: String,
    pub aggregate_id: Uuid,
    pub occurred_at_utc: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl EventEnvelope {
    /// Wrap an outbox row for publication, minting a fresh event id.
    pub fn from_outbox(message: &OutboxMessage) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: message.event_type.clone(),
            aggregate: message.aggregate_type.clone(),
            aggregate_id: message.aggregate_id,
            occurred_at_utc: message.occurred_at,
            data: message.payload.clone(),
        }
    }
}

// ============================================================================
// Webhook Contract
// ============================================================================

/// Command asking the webhook engine to deliver a payload to a configured
/// endpoint. `(request_id, endpoint_key)` is the idempotency key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookRequested {
    pub request_id: String,
    pub endpoint_key: String,
    pub payload_json: String,
    pub correlation_id: String,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Topics
// ============================================================================

pub mod topics {
    //! Broker topic names and the event-type → topic mapping.
    //!
    //! Events about the same bounded context share a topic; the mapping is
    //! keyed by the first segment of the event type (`document.created` →
    //! the document topic) so adding an event type is a data change.

    pub const DOCUMENT_EVENTS: &str = "ecm.document.events";
    pub const IAM_EVENTS: &str = "ecm.iam.events";
    pub const WEBHOOK_EVENTS: &str = "ecm.webhooks.events";

    /// Resolve the topic an event type is published on. Returns `None` for
    /// event types without a configured topic; the relay treats that as a
    /// configuration defect rather than dropping the row.
    pub fn for_event_type(event_type: &str) -> Option<&'static str> {
        let prefix = event_type.split('.').next().unwrap_or(event_type);
        match prefix {
            "document" | "tag-label" | "file" => Some(DOCUMENT_EVENTS),
            "user" | "access-relation" => Some(IAM_EVENTS),
            "webhook" => Some(WEBHOOK_EVENTS),
            _ => None,
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Shutdown in progress")]
    ShutdownInProgress,
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_wire_shape() {
        let message = OutboxMessage {
            id: 7,
            aggregate_type: "tag-label".to_string(),
            aggregate_id: Uuid::new_v4(),
            event_type: "tag-label.created".to_string(),
            payload: serde_json::json!({"name": "ops"}),
            occurred_at: Utc::now(),
            processed_at: None,
        };

        let envelope = EventEnvelope::from_outbox(&message);
        let json = serde_json::to_value(&envelope).unwrap();

        assert!(json.get("eventId").is_some());
        assert!(json.get("occurredAtUtc").is_some());
        assert_eq!(json["type"], "tag-label.created");
        assert_eq!(json["aggregate"], "tag-label");
        assert_eq!(json["data"]["name"], "ops");
    }

    #[test]
    fn test_topic_for_event_type() {
        assert_eq!(
            topics::for_event_type("document.created"),
            Some(topics::DOCUMENT_EVENTS)
        );
        assert_eq!(
            topics::for_event_type("tag-label.deleted"),
            Some(topics::DOCUMENT_EVENTS)
        );
        assert_eq!(topics::for_event_type("user.created"), Some(topics::IAM_EVENTS));
        assert_eq!(
            topics::for_event_type("webhook.requested"),
            Some(topics::WEBHOOK_EVENTS)
        );
        assert_eq!(topics::for_event_type("billing.invoiced"), None);
    }

    #[test]
    fn test_webhook_requested_round_trip() {
        let raw = r#"{
            "requestId": "r1",
            "endpointKey": "crm",
            "payloadJson": "{\"hello\":true}",
            "correlationId": "corr-1",
            "createdAt": "2026-01-05T12:00:00Z"
        }"#;

        let request: WebhookRequested = serde_json::from_str(raw).unwrap();
        assert_eq!(request.request_id, "r1");
        assert_eq!(request.endpoint_key, "crm");
        assert_eq!(request.payload_json, "{\"hello\":true}");
    }
}
