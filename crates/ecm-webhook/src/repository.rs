use anyhow::Result;
use async_trait::async_trait;

use crate::delivery::WebhookDelivery;

/// Persistence for the delivery ledger.
#[async_trait]
pub trait WebhookDeliveryRepository: Send + Sync {
    /// Look up a delivery by its idempotency key.
    async fn find(&self, request_id: &str, endpoint_key: &str) -> Result<Option<WebhookDelivery>>;

    /// Insert a fresh row. Returns false when another dispatcher already
    /// inserted a row for the same (request_id, endpoint_key).
    async fn insert(&self, delivery: &WebhookDelivery) -> Result<bool>;

    /// Persist the current state of an existing row.
    async fn update(&self, delivery: &WebhookDelivery) -> Result<()>;
}
