//! Transactional outbox: writer and relay.
//!
//! The writer stages domain events as outbox rows inside the same database
//! transaction as the business mutation; the relay is a separate
//! long-running loop that publishes unprocessed rows to the broker and only
//! then marks them processed. Together they give at-least-once delivery
//! across crashes without ever losing an event for a committed mutation.

pub mod repository;
pub mod writer;

#[cfg(feature = "sqlite")]
pub mod sqlite;
#[cfg(feature = "postgres")]
pub mod postgres;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use ecm_common::{topics, EventEnvelope};
use tokio::sync::broadcast;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

use crate::repository::OutboxRepository;

pub use writer::OutboxWriter;

/// An envelope ready for the broker.
#[derive(Debug, Clone)]
pub struct BrokerMessage {
    pub topic: String,
    /// Partition/ordering key; events with the same key are never reordered
    /// relative to each other.
    pub ordering_key: String,
    /// Stable id for broker-side de-duplication across relay restarts.
    pub dedup_id: String,
    pub body: String,
}

#[async_trait]
pub trait BrokerPublisher: Send + Sync {
    /// Publish and return only once the broker acknowledged the message.
    async fn publish(&self, message: &BrokerMessage) -> Result<()>;
}

/// Polls the outbox table and forwards rows to the broker.
pub struct OutboxRelay {
    repository: Arc<dyn OutboxRepository>,
    publisher: Arc<dyn BrokerPublisher>,
    poll_interval: Duration,
    batch_size: u32,
}

impl OutboxRelay {
    pub fn new(
        repository: Arc<dyn OutboxRepository>,
        publisher: Arc<dyn BrokerPublisher>,
        poll_interval: Duration,
        batch_size: u32,
    ) -> Self {
        Self {
            repository,
            publisher,
            poll_interval,
            batch_size,
        }
    }

    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("Starting outbox relay");
        loop {
            if let Err(e) = self.relay_batch().await {
                error!("Error relaying outbox batch: {}", e);
            }

            tokio::select! {
                _ = sleep(self.poll_interval) => {}
                _ = shutdown_rx.recv() => {
                    info!("Outbox relay shutting down");
                    break;
                }
            }
        }
    }

    /// Publish one batch of unprocessed rows in `id` order.
    ///
    /// The first failure aborts the batch: continuing past a failed row
    /// could reorder events for the aggregates behind it. The untouched
    /// rows are picked up again on the next poll.
    pub async fn relay_batch(&self) -> Result<u32> {
        let rows = self.repository.fetch_unprocessed(self.batch_size).await?;
        if rows.is_empty() {
            return Ok(0);
        }

        let mut published = 0u32;
        for row in rows {
            let Some(topic) = topics::for_event_type(&row.event_type) else {
                error!(
                    outbox_id = row.id,
                    event_type = %row.event_type,
                    "No topic mapping for event type, leaving row for retry"
                );
                break;
            };

            let envelope = EventEnvelope::from_outbox(&row);
            let message = BrokerMessage {
                topic: topic.to_string(),
                ordering_key: row.aggregate_id.to_string(),
                dedup_id: row.id.to_string(),
                body: serde_json::to_string(&envelope)?,
            };

            match self.publisher.publish(&message).await {
                Ok(()) => {
                    self.repository.mark_processed(row.id).await?;
                    published += 1;
                    debug!(
                        outbox_id = row.id,
                        event_type = %row.event_type,
                        topic = %topic,
                        "Published outbox row"
                    );
                }
                Err(e) => {
                    warn!(
                        outbox_id = row.id,
                        error = %e,
                        "Publish failed, row stays unprocessed for next poll"
                    );
                    break;
                }
            }
        }

        Ok(published)
    }
}
