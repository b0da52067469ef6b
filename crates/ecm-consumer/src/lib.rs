//! Integration event pump
//!
//! Generic consumer loop over a broker topic stream. Each message gets a
//! freshly created handler (the per-message scope), and every failure mode
//! is contained at the message boundary: a malformed envelope, an unknown
//! topic, or a handler error is logged and the pump moves on to the next
//! message. Only process shutdown stops the loop.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use ecm_common::EventEnvelope;
use tokio::sync::broadcast;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

/// A raw message pulled off the broker.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub ordering_key: Option<String>,
    pub body: String,
    pub receipt_handle: String,
}

/// Broker subscription abstraction.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Pull the next batch of messages; may return an empty batch.
    async fn receive(&self) -> Result<Vec<InboundMessage>>;

    /// Settle a message so it is not redelivered.
    async fn acknowledge(&self, message: &InboundMessage) -> Result<()>;
}

/// Handles one decoded envelope.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, envelope: &EventEnvelope) -> Result<()>;
}

/// Creates a fresh handler per message.
///
/// Nothing created here outlives the message it was created for, so no
/// state leaks between messages.
pub trait HandlerFactory: Send + Sync {
    fn create(&self) -> Box<dyn EventHandler>;
}

/// Topic → handler factory table.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    factories: HashMap<String, Arc<dyn HandlerFactory>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register(&mut self, topic: impl Into<String>, factory: Arc<dyn HandlerFactory>) {
        self.factories.insert(topic.into(), factory);
    }

    pub fn resolve(&self, topic: &str) -> Option<Arc<dyn HandlerFactory>> {
        self.factories.get(topic).cloned()
    }
}

#[derive(Debug, Clone)]
pub struct EventPumpConfig {
    /// How long to wait before polling again after an empty batch or a
    /// receive error.
    pub idle_backoff: Duration,
}

impl Default for EventPumpConfig {
    fn default() -> Self {
        Self {
            idle_backoff: Duration::from_millis(500),
        }
    }
}

/// Long-running consumer loop for one subscription.
pub struct EventPump {
    source: Arc<dyn MessageSource>,
    registry: HandlerRegistry,
    config: EventPumpConfig,
}

impl EventPump {
    pub fn new(source: Arc<dyn MessageSource>, registry: HandlerRegistry) -> Self {
        Self::with_config(source, registry, EventPumpConfig::default())
    }

    pub fn with_config(
        source: Arc<dyn MessageSource>,
        registry: HandlerRegistry,
        config: EventPumpConfig,
    ) -> Self {
        Self {
            source,
            registry,
            config,
        }
    }

    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("Starting integration event pump");

        loop {
            let batch = tokio::select! {
                result = self.source.receive() => result,
                _ = shutdown_rx.recv() => {
                    info!("Event pump shutting down");
                    return;
                }
            };

            let messages = match batch {
                Ok(messages) => messages,
                Err(e) => {
                    error!("Failed to receive from broker: {}", e);
                    tokio::select! {
                        _ = sleep(self.config.idle_backoff) => continue,
                        _ = shutdown_rx.recv() => {
                            info!("Event pump shutting down");
                            return;
                        }
                    }
                }
            };

            if messages.is_empty() {
                tokio::select! {
                    _ = sleep(self.config.idle_backoff) => continue,
                    _ = shutdown_rx.recv() => {
                        info!("Event pump shutting down");
                        return;
                    }
                }
            }

            for message in &messages {
                // In-flight messages are left unacknowledged on shutdown so
                // the broker redelivers them.
                if shutdown_rx.try_recv().is_ok() {
                    info!("Event pump shutting down mid-batch");
                    return;
                }
                self.process_one(message).await;
            }
        }
    }

    async fn process_one(&self, message: &InboundMessage) {
        let envelope: EventEnvelope = match serde_json::from_str(&message.body) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(
                    topic = %message.topic,
                    error = %e,
                    "Failed to decode envelope, skipping message"
                );
                self.settle(message).await;
                return;
            }
        };

        let Some(factory) = self.registry.resolve(&message.topic) else {
            warn!(topic = %message.topic, "No handler registered for topic, skipping message");
            self.settle(message).await;
            return;
        };

        // Fresh handler per message.
        let handler = factory.create();
        match handler.handle(&envelope).await {
            Ok(()) => {
                debug!(
                    event_id = %envelope.event_id,
                    topic = %message.topic,
                    "Message handled"
                );
            }
            Err(e) => {
                error!(
                    event_id = %envelope.event_id,
                    topic = %message.topic,
                    error = %e,
                    "Handler failed, continuing with next message"
                );
            }
        }

        // Settled either way: a message that keeps failing must not poison
        // the stream. Redelivery for failed effects is the webhook ledger's
        // job, not the broker's.
        self.settle(message).await;
    }

    async fn settle(&self, message: &InboundMessage) {
        if let Err(e) = self.source.acknowledge(message).await {
            warn!(
                topic = %message.topic,
                error = %e,
                "Failed to acknowledge message"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;
    use uuid::Uuid;

    struct InMemorySource {
        pending: Mutex<VecDeque<InboundMessage>>,
        acked: Mutex<Vec<String>>,
    }

    impl InMemorySource {
        fn new(messages: Vec<InboundMessage>) -> Self {
            Self {
                pending: Mutex::new(messages.into()),
                acked: Mutex::new(Vec::new()),
            }
        }

        async fn acked(&self) -> Vec<String> {
            self.acked.lock().await.clone()
        }
    }

    #[async_trait]
    impl MessageSource for InMemorySource {
        async fn receive(&self) -> Result<Vec<InboundMessage>> {
            let mut pending = self.pending.lock().await;
            Ok(pending.pop_front().into_iter().collect())
        }

        async fn acknowledge(&self, message: &InboundMessage) -> Result<()> {
            self.acked.lock().await.push(message.receipt_handle.clone());
            Ok(())
        }
    }

    struct CountingHandler {
        handled: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn handle(&self, _envelope: &EventEnvelope) -> Result<()> {
            if self.fail {
                anyhow::bail!("handler blew up");
            }
            self.handled.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct CountingFactory {
        created: Arc<AtomicUsize>,
        handled: Arc<AtomicUsize>,
        fail_on_data_flag: bool,
    }

    impl HandlerFactory for CountingFactory {
        fn create(&self) -> Box<dyn EventHandler> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Box::new(CountingHandler {
                handled: self.handled.clone(),
                fail: self.fail_on_data_flag,
            })
        }
    }

    fn envelope_body(marker: &str) -> String {
        let envelope = EventEnvelope {
            event_id: Uuid::new_v4(),
            event_type: "webhook.requested".to_string(),
            aggregate: "webhook".to_string(),
            aggregate_id: Uuid::new_v4(),
            occurred_at_utc: Utc::now(),
            data: serde_json::json!({ "marker": marker }),
        };
        serde_json::to_string(&envelope).unwrap()
    }

    fn message(topic: &str, body: String, handle: &str) -> InboundMessage {
        InboundMessage {
            topic: topic.to_string(),
            ordering_key: None,
            body,
            receipt_handle: handle.to_string(),
        }
    }

    async fn run_until_acked(pump: EventPump, source: Arc<InMemorySource>, expected: usize) {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(async move { pump.run(shutdown_rx).await });

        for _ in 0..200 {
            if source.acked().await.len() >= expected {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }

        let _ = shutdown_tx.send(());
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_envelope_does_not_stall_the_stream() {
        let source = Arc::new(InMemorySource::new(vec![
            message("t", r#"{"not":"an envelope"}"#.to_string(), "m1"),
            message("t", envelope_body("ok"), "m2"),
        ]));

        let created = Arc::new(AtomicUsize::new(0));
        let handled = Arc::new(AtomicUsize::new(0));
        let mut registry = HandlerRegistry::new();
        registry.register(
            "t",
            Arc::new(CountingFactory {
                created: created.clone(),
                handled: handled.clone(),
                fail_on_data_flag: false,
            }),
        );

        let pump = EventPump::with_config(
            source.clone(),
            registry,
            EventPumpConfig {
                idle_backoff: Duration::from_millis(5),
            },
        );
        run_until_acked(pump, source.clone(), 2).await;

        assert_eq!(handled.load(Ordering::SeqCst), 1);
        assert_eq!(source.acked().await, vec!["m1", "m2"]);
    }

    #[tokio::test]
    async fn test_handler_failure_is_isolated_per_message() {
        let source = Arc::new(InMemorySource::new(vec![
            message("bad", envelope_body("boom"), "m1"),
            message("good", envelope_body("fine"), "m2"),
        ]));

        let created = Arc::new(AtomicUsize::new(0));
        let handled = Arc::new(AtomicUsize::new(0));
        let mut registry = HandlerRegistry::new();
        registry.register(
            "bad",
            Arc::new(CountingFactory {
                created: created.clone(),
                handled: handled.clone(),
                fail_on_data_flag: true,
            }),
        );
        registry.register(
            "good",
            Arc::new(CountingFactory {
                created: created.clone(),
                handled: handled.clone(),
                fail_on_data_flag: false,
            }),
        );

        let pump = EventPump::with_config(
            source.clone(),
            registry,
            EventPumpConfig {
                idle_backoff: Duration::from_millis(5),
            },
        );
        run_until_acked(pump, source.clone(), 2).await;

        // The failing handler was invoked, the good one still ran after it.
        assert_eq!(created.load(Ordering::SeqCst), 2);
        assert_eq!(handled.load(Ordering::SeqCst), 1);
        assert_eq!(source.acked().await.len(), 2);
    }

    #[tokio::test]
    async fn test_fresh_handler_scope_per_message() {
        let source = Arc::new(InMemorySource::new(vec![
            message("t", envelope_body("a"), "m1"),
            message("t", envelope_body("b"), "m2"),
            message("t", envelope_body("c"), "m3"),
        ]));

        let created = Arc::new(AtomicUsize::new(0));
        let handled = Arc::new(AtomicUsize::new(0));
        let mut registry = HandlerRegistry::new();
        registry.register(
            "t",
            Arc::new(CountingFactory {
                created: created.clone(),
                handled: handled.clone(),
                fail_on_data_flag: false,
            }),
        );

        let pump = EventPump::with_config(
            source.clone(),
            registry,
            EventPumpConfig {
                idle_backoff: Duration::from_millis(5),
            },
        );
        run_until_acked(pump, source.clone(), 3).await;

        assert_eq!(created.load(Ordering::SeqCst), 3);
        assert_eq!(handled.load(Ordering::SeqCst), 3);
    }

    /// Source that hands over every queued message in a single batch.
    struct BatchSource {
        pending: Mutex<Vec<InboundMessage>>,
        acked: Mutex<Vec<String>>,
    }

    impl BatchSource {
        fn new(messages: Vec<InboundMessage>) -> Self {
            Self {
                pending: Mutex::new(messages),
                acked: Mutex::new(Vec::new()),
            }
        }

        async fn acked(&self) -> Vec<String> {
            self.acked.lock().await.clone()
        }
    }

    #[async_trait]
    impl MessageSource for BatchSource {
        async fn receive(&self) -> Result<Vec<InboundMessage>> {
            Ok(std::mem::take(&mut *self.pending.lock().await))
        }

        async fn acknowledge(&self, message: &InboundMessage) -> Result<()> {
            self.acked.lock().await.push(message.receipt_handle.clone());
            Ok(())
        }
    }

    /// Handler that requests shutdown as a side effect of handling.
    struct ShutdownRequestingHandler {
        shutdown_tx: broadcast::Sender<()>,
    }

    #[async_trait]
    impl EventHandler for ShutdownRequestingHandler {
        async fn handle(&self, _envelope: &EventEnvelope) -> Result<()> {
            let _ = self.shutdown_tx.send(());
            Ok(())
        }
    }

    struct ShutdownRequestingFactory {
        shutdown_tx: broadcast::Sender<()>,
    }

    impl HandlerFactory for ShutdownRequestingFactory {
        fn create(&self) -> Box<dyn EventHandler> {
            Box::new(ShutdownRequestingHandler {
                shutdown_tx: self.shutdown_tx.clone(),
            })
        }
    }

    #[tokio::test]
    async fn test_shutdown_mid_batch_leaves_remaining_messages_unacked() {
        let source = Arc::new(BatchSource::new(vec![
            message("t", envelope_body("first"), "m1"),
            message("t", envelope_body("second"), "m2"),
        ]));

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let mut registry = HandlerRegistry::new();
        registry.register(
            "t",
            Arc::new(ShutdownRequestingFactory {
                shutdown_tx: shutdown_tx.clone(),
            }),
        );

        let pump = EventPump::with_config(
            source.clone(),
            registry,
            EventPumpConfig {
                idle_backoff: Duration::from_millis(5),
            },
        );
        // Shutdown arrives while the first message is in flight; the pump
        // stops before touching the second, which the broker will redeliver.
        pump.run(shutdown_rx).await;

        assert_eq!(source.acked().await, vec!["m1"]);
    }

    #[tokio::test]
    async fn test_unregistered_topic_is_skipped() {
        let source = Arc::new(InMemorySource::new(vec![message(
            "nobody-listens",
            envelope_body("x"),
            "m1",
        )]));

        let pump = EventPump::with_config(
            source.clone(),
            HandlerRegistry::new(),
            EventPumpConfig {
                idle_backoff: Duration::from_millis(5),
            },
        );
        run_until_acked(pump, source.clone(), 1).await;

        assert_eq!(source.acked().await, vec!["m1"]);
    }
}
