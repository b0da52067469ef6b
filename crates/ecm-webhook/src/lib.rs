//! Webhook dispatch engine
//!
//! Delivers outbound webhooks with persistent idempotency. Each delivery
//! is keyed by (request_id, endpoint_key) in a ledger table so redelivered
//! broker messages never hit a partner endpoint twice, and failed
//! deliveries resume with their attempt history intact.

pub mod config;
pub mod delivery;
pub mod dispatch;
pub mod endpoints;
pub mod handler;
pub mod repository;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use config::{EndpointEntry, WebhookDispatcherConfig};
pub use delivery::{DeliveryStatus, WebhookDelivery};
pub use dispatch::{DispatchError, WebhookDispatchOptions, WebhookDispatchService};
pub use endpoints::{Endpoint, EndpointRegistry};
pub use handler::{WebhookHandlerFactory, WebhookRequestHandler};
pub use repository::WebhookDeliveryRepository;
