//! ECM Outbox Relay
//!
//! Polls the application database outbox table and publishes pending domain
//! events to the SQS event broker. Supports SQLite and PostgreSQL backends.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `ECM_OUTBOX_DB_TYPE` | `postgres` | Database type: `sqlite`, `postgres` |
//! | `ECM_OUTBOX_DB_URL` | - | Database connection URL (required) |
//! | `ECM_OUTBOX_POLL_INTERVAL_MS` | `1000` | Poll interval in milliseconds |
//! | `ECM_OUTBOX_BATCH_SIZE` | `100` | Max messages per batch |
//! | `ECM_QUEUE_URL` | - | SQS queue URL (required) |
//! | `ECM_METRICS_PORT` | `9090` | Metrics/health port |
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

use ecm_outbox::repository::OutboxRepository;
use ecm_outbox::{BrokerMessage, BrokerPublisher, OutboxRelay};

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

    info!("Starting ECM Outbox Relay");

    // Configuration
    let db_type = env_or("ECM_OUTBOX_DB_TYPE", "postgres");
    let poll_interval_ms: u64 = env_or_parse("ECM_OUTBOX_POLL_INTERVAL_MS", 1000);
    let batch_size: u32 = env_or_parse("ECM_OUTBOX_BATCH_SIZE", 100);
    let metrics_port: u16 = env_or_parse("ECM_METRICS_PORT", 9090);
    let queue_url = env_required("ECM_QUEUE_URL")?;

    // Setup shutdown signal
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Initialize outbox repository
    let outbox_repo = create_outbox_repository(&db_type).await?;
    info!("Outbox repository initialized ({})", db_type);

    // Initialize SQS publisher
    let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let sqs_client = aws_sdk_sqs::Client::new(&config);
    let publisher = Arc::new(SqsPublisher::new(sqs_client, queue_url.clone()));
    info!("SQS publisher initialized: {}", queue_url);

    // Create outbox relay
    let relay = OutboxRelay::new(
        outbox_repo,
        publisher,
        Duration::from_millis(poll_interval_ms),
        batch_size,
    );

    // Start relay
    let relay_handle = {
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            relay.run(shutdown_rx).await;
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

    info!("ECM Outbox Relay started");
    info!("Press Ctrl+C to shutdown");

    // Wait for shutdown
    shutdown_signal().await;
    info!("Shutdown signal received...");

    let _ = shutdown_tx.send(());

    let _ = tokio::time::timeout(Duration::from_secs(30), async {
        let _ = relay_handle.await;
        let _ = metrics_handle.await;
    })
    .await;

    info!("ECM Outbox Relay shutdown complete");
    Ok(())
}

async fn create_outbox_repository(db_type: &str) -> Result<Arc<dyn OutboxRepository>> {
    match db_type {
        "sqlite" => {
            let url = env_required("ECM_OUTBOX_DB_URL")?;
            let pool = SqlitePoolOptions::new()
                .max_connections(5)
                .connect(&url)
                .await?;
            let store = ecm_outbox::sqlite::SqliteOutboxStore::new(pool);
            store.init_schema().await?;
            info!("Using SQLite outbox: {}", url);
            Ok(Arc::new(store))
        }
        "postgres" => {
            let url = env_required("ECM_OUTBOX_DB_URL")?;
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(&url)
                .await?;
            let store = ecm_outbox::postgres::PgOutboxStore::new(pool);
            store.init_schema().await?;
            info!("Using PostgreSQL outbox");
            Ok(Arc::new(store))
        }
        other => Err(anyhow::anyhow!(
            "Unknown database type: {}. Use sqlite or postgres",
            other
        )),
    }
}

// SQS publisher
//
// Messages land on a FIFO queue: the ordering key becomes the message group
// so per-aggregate ordering survives the hop, and the outbox row id becomes
// the deduplication id so a relay restart never double-publishes.
struct SqsPublisher {
    client: aws_sdk_sqs::Client,
    queue_url: String,
}

impl SqsPublisher {
    fn new(client: aws_sdk_sqs::Client, queue_url: String) -> Self {
        Self { client, queue_url }
    }
}

#[async_trait]
impl BrokerPublisher for SqsPublisher {
    async fn publish(&self, message: &BrokerMessage) -> Result<()> {
        let topic_attribute = aws_sdk_sqs::types::MessageAttributeValue::builder()
            .data_type("String")
            .string_value(&message.topic)
            .build()
            .map_err(|e| anyhow::anyhow!("SQS attribute error: {}", e))?;

        self.client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(&message.body)
            .message_group_id(&message.ordering_key)
            .message_deduplication_id(&message.dedup_id)
            .message_attributes("topic", topic_attribute)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("SQS send error: {}", e))?;

        Ok(())
    }
}

async fn metrics_handler() -> String {
    "# HELP ecm_outbox_relay_up Outbox relay is up\n# TYPE ecm_outbox_relay_up gauge\necm_outbox_relay_up 1\n".to_string()
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
