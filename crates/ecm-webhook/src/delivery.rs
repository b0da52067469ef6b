use chrono::{DateTime, Utc};
use ecm_common::WebhookRequested;
use uuid::Uuid;

/// Lifecycle state of a delivery ledger row.
///
/// `Pending` rows are in flight (or abandoned mid flight), `Succeeded`
/// rows are terminal, `Failed` rows had their retry budget exhausted and
/// are picked back up on the next redelivery of the same request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Pending,
    Succeeded,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "Pending",
            DeliveryStatus::Succeeded => "Succeeded",
            DeliveryStatus::Failed => "Failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "Pending" => Some(DeliveryStatus::Pending),
            "Succeeded" => Some(DeliveryStatus::Succeeded),
            "Failed" => Some(DeliveryStatus::Failed),
            _ => None,
        }
    }
}

/// One row in the delivery ledger, keyed by (request_id, endpoint_key).
#[derive(Debug, Clone)]
pub struct WebhookDelivery {
    pub id: Uuid,
    pub request_id: String,
    pub endpoint_key: String,
    pub payload_json: String,
    pub correlation_id: String,
    pub status: DeliveryStatus,
    pub attempt_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl WebhookDelivery {
    pub fn new_pending(request: &WebhookRequested) -> Self {
        Self {
            id: Uuid::new_v4(),
            request_id: request.request_id.clone(),
            endpoint_key: request.endpoint_key.clone(),
            payload_json: request.payload_json.clone(),
            correlation_id: request.correlation_id.clone(),
            status: DeliveryStatus::Pending,
            attempt_count: 0,
            created_at: Utc::now(),
            last_attempt_at: None,
            delivered_at: None,
            last_error: None,
        }
    }

    /// Persisted before the HTTP call goes out, so a crash mid call still
    /// leaves the attempt on record.
    pub fn record_attempt(&mut self, at: DateTime<Utc>) {
        self.attempt_count += 1;
        self.last_attempt_at = Some(at);
        self.status = DeliveryStatus::Pending;
    }

    pub fn mark_succeeded(&mut self) {
        self.status = DeliveryStatus::Succeeded;
        self.delivered_at = self.last_attempt_at;
        self.last_error = None;
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = DeliveryStatus::Failed;
        self.last_error = Some(error.into());
    }
}
