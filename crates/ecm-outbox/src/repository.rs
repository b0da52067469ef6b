use anyhow::Result;
use async_trait::async_trait;
use ecm_common::OutboxMessage;

/// Relay-side view of the outbox table.
#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Unprocessed rows in `id` ascending order.
    async fn fetch_unprocessed(&self, limit: u32) -> Result<Vec<OutboxMessage>>;

    /// Set `processed_at`, exactly once, after the broker acknowledged the
    /// publish.
    async fn mark_processed(&self, id: i64) -> Result<()>;
}
