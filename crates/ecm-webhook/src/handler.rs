use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;

use ecm_common::{EventEnvelope, WebhookRequested};
use ecm_consumer::{EventHandler, HandlerFactory};

use crate::dispatch::WebhookDispatchService;

/// Bridges the event pump to the dispatch service: decodes the envelope
/// payload into a webhook request and hands it off.
pub struct WebhookRequestHandler {
    service: Arc<WebhookDispatchService>,
}

impl WebhookRequestHandler {
    pub fn new(service: Arc<WebhookDispatchService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl EventHandler for WebhookRequestHandler {
    async fn handle(&self, envelope: &EventEnvelope) -> Result<()> {
        let request: WebhookRequested = serde_json::from_value(envelope.data.clone())
            .with_context(|| format!("Invalid webhook request payload in event {}", envelope.event_id))?;
        self.service.dispatch(&request).await?;
        Ok(())
    }
}

pub struct WebhookHandlerFactory {
    service: Arc<WebhookDispatchService>,
}

impl WebhookHandlerFactory {
    pub fn new(service: Arc<WebhookDispatchService>) -> Self {
        Self { service }
    }
}

impl HandlerFactory for WebhookHandlerFactory {
    fn create(&self) -> Box<dyn EventHandler> {
        Box::new(WebhookRequestHandler::new(self.service.clone()))
    }
}
