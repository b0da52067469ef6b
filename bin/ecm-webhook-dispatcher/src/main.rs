//! ECM Webhook Dispatcher
//!
//! Consumes webhook integration events from SQS and delivers them to
//! configured partner endpoints with persistent idempotency and retries.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `ECM_WEBHOOK_DB_TYPE` | `postgres` | Database type: `sqlite`, `postgres` |
//! | `ECM_WEBHOOK_DB_URL` | - | Database connection URL (required) |
//! | `ECM_WEBHOOK_CONFIG` | `webhook-dispatcher.toml` | Path to endpoint config |
//! | `ECM_QUEUE_URL` | - | SQS queue URL (required) |
//! | `ECM_METRICS_PORT` | `9091` | Metrics/health port |
//! | `RUST_LOG` | `info` | Log level |

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ecm_common::topics;
use ecm_consumer::{EventPump, HandlerRegistry, InboundMessage, MessageSource};
use ecm_webhook::repository::WebhookDeliveryRepository;
use ecm_webhook::{
    EndpointRegistry, WebhookDispatchOptions, WebhookDispatchService, WebhookDispatcherConfig,
    WebhookHandlerFactory,
};

use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::SqlitePoolOptions;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_or_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_required(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| anyhow::anyhow!("{} environment variable is required", key))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    info!("Starting ECM Webhook Dispatcher");

    // Configuration
    let db_type = env_or("ECM_WEBHOOK_DB_TYPE", "postgres");
    let config_path = env_or("ECM_WEBHOOK_CONFIG", "webhook-dispatcher.toml");
    let metrics_port: u16 = env_or_parse("ECM_METRICS_PORT", 9091);
    let queue_url = env_required("ECM_QUEUE_URL")?;

    let config = WebhookDispatcherConfig::from_file(&config_path)?;
    let endpoints = EndpointRegistry::from_entries(&config.endpoints)?;
    info!(
        "Loaded {} webhook endpoint(s) from {}",
        endpoints.len(),
        config_path
    );

    // Setup shutdown signal
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Initialize delivery ledger
    let ledger = create_delivery_repository(&db_type).await?;
    info!("Delivery ledger initialized ({})", db_type);

    // Dispatch service
    let options = WebhookDispatchOptions {
        max_retry_attempts: config.max_retry_attempts,
        initial_backoff_seconds: config.initial_backoff_seconds,
        ..WebhookDispatchOptions::default()
    };
    let service = Arc::new(WebhookDispatchService::new(
        ledger,
        endpoints,
        options,
        shutdown_tx.clone(),
    )?);

    // Initialize SQS source
    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let sqs_client = aws_sdk_sqs::Client::new(&aws_config);
    let source = Arc::new(SqsSource::new(sqs_client, queue_url.clone()));
    info!("SQS source initialized: {}", queue_url);

    // Wire the webhook topic to the dispatch handler
    let mut registry = HandlerRegistry::new();
    registry.register(
        topics::WEBHOOK_EVENTS,
        Arc::new(WebhookHandlerFactory::new(service)),
    );

    let pump = EventPump::new(source, registry);

    // Start pump
    let pump_handle = {
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            pump.run(shutdown_rx).await;
        })
    };

    // Start metrics server
    let metrics_addr = SocketAddr::from(([0, 0, 0, 0], metrics_port));
    info!("Metrics server listening on http://{}/metrics", metrics_addr);

    let metrics_app = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics_handler))
        .route("/health", axum::routing::get(health_handler))
        .route("/ready", axum::routing::get(ready_handler));

    let metrics_listener = tokio::net::TcpListener::bind(metrics_addr).await?;
    let metrics_handle = {
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            axum::serve(metrics_listener, metrics_app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                })
                .await
                .ok();
        })
    };

    info!("ECM Webhook Dispatcher started");
    info!("Press Ctrl+C to shutdown");

    // Wait for shutdown
    shutdown_signal().await;
    info!("Shutdown signal received...");

    let _ = shutdown_tx.send(());

    let _ = tokio::time::timeout(Duration::from_secs(30), async {
        let _ = pump_handle.await;
        let _ = metrics_handle.await;
    })
    .await;

    info!("ECM Webhook Dispatcher shutdown complete");
    Ok(())
}

async fn create_delivery_repository(db_type: &str) -> Result<Arc<dyn WebhookDeliveryRepository>> {
    match db_type {
        "sqlite" => {
            let url = env_required("ECM_WEBHOOK_DB_URL")?;
            let pool = SqlitePoolOptions::new()
                .max_connections(5)
                .connect(&url)
                .await?;
            let store = ecm_webhook::sqlite::SqliteDeliveryStore::new(pool);
            store.init_schema().await?;
            info!("Using SQLite delivery ledger: {}", url);
            Ok(Arc::new(store))
        }
        "postgres" => {
            let url = env_required("ECM_WEBHOOK_DB_URL")?;
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(&url)
                .await?;
            let store = ecm_webhook::postgres::PgDeliveryStore::new(pool);
            store.init_schema().await?;
            info!("Using PostgreSQL delivery ledger");
            Ok(Arc::new(store))
        }
        other => Err(anyhow::anyhow!(
            "Unknown database type: {}. Use sqlite or postgres",
            other
        )),
    }
}

// SQS source
//
// Long-polls the queue and settles messages by deleting them. The topic
// travels as a message attribute set by the outbox relay.
struct SqsSource {
    client: aws_sdk_sqs::Client,
    queue_url: String,
}

impl SqsSource {
    fn new(client: aws_sdk_sqs::Client, queue_url: String) -> Self {
        Self { client, queue_url }
    }
}

#[async_trait]
impl MessageSource for SqsSource {
    async fn receive(&self) -> Result<Vec<InboundMessage>> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(10)
            .wait_time_seconds(20)
            .message_attribute_names("topic")
            .message_system_attribute_names(aws_sdk_sqs::types::MessageSystemAttributeName::All)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("SQS receive error: {}", e))?;

        let mut messages = Vec::new();
        for message in output.messages.unwrap_or_default() {
            let topic = message
                .message_attributes
                .as_ref()
                .and_then(|attrs| attrs.get("topic"))
                .and_then(|attr| attr.string_value.clone())
                .unwrap_or_default();
            let ordering_key = message
                .attributes
                .as_ref()
                .and_then(|attrs| attrs.get(&aws_sdk_sqs::types::MessageSystemAttributeName::MessageGroupId))
                .cloned();

            let (Some(body), Some(receipt_handle)) = (message.body, message.receipt_handle) else {
                continue;
            };

            messages.push(InboundMessage {
                topic,
                ordering_key,
                body,
                receipt_handle,
            });
        }
        Ok(messages)
    }

    async fn acknowledge(&self, message: &InboundMessage) -> Result<()> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(&message.receipt_handle)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("SQS delete error: {}", e))?;
        Ok(())
    }
}

async fn metrics_handler() -> String {
    "# HELP ecm_webhook_dispatcher_up Webhook dispatcher is up\n# TYPE ecm_webhook_dispatcher_up gauge\necm_webhook_dispatcher_up 1\n".to_string()
}

async fn health_handler() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "UP",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn ready_handler() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "READY"
    }))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
