use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::delivery::{DeliveryStatus, WebhookDelivery};
use crate::repository::WebhookDeliveryRepository;

const SCHEMA_STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS webhook_deliveries (
        id UUID PRIMARY KEY,
        request_id VARCHAR(256) NOT NULL,
        endpoint_key VARCHAR(128) NOT NULL,
        payload_json TEXT NOT NULL,
        correlation_id VARCHAR(256) NOT NULL,
        status VARCHAR(16) NOT NULL,
        attempt_count INTEGER NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        last_attempt_at TIMESTAMPTZ,
        delivered_at TIMESTAMPTZ,
        last_error TEXT
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_deliveries_request_endpoint \
     ON webhook_deliveries(request_id, endpoint_key)",
];

/// PostgreSQL delivery ledger.
pub struct PgDeliveryStore {
    pool: PgPool,
}

impl PgDeliveryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // One statement per query: Postgres rejects multi-command strings on
    // the prepared-statement path sqlx::query uses.
    pub async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA_STATEMENTS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

fn row_to_delivery(row: &sqlx::postgres::PgRow) -> Result<WebhookDelivery> {
    let status: String = row.get("status");

    Ok(WebhookDelivery {
        id: row.get::<Uuid, _>("id"),
        request_id: row.get("request_id"),
        endpoint_key: row.get("endpoint_key"),
        payload_json: row.get("payload_json"),
        correlation_id: row.get("correlation_id"),
        status: DeliveryStatus::parse(&status)
            .ok_or_else(|| anyhow::anyhow!("Unknown delivery status '{}'", status))?,
        attempt_count: row.get::<i32, _>("attempt_count") as u32,
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
        last_attempt_at: row.get::<Option<DateTime<Utc>>, _>("last_attempt_at"),
        delivered_at: row.get::<Option<DateTime<Utc>>, _>("delivered_at"),
        last_error: row.get("last_error"),
    })
}

#[async_trait]
impl WebhookDeliveryRepository for PgDeliveryStore {
    async fn find(&self, request_id: &str, endpoint_key: &str) -> Result<Option<WebhookDelivery>> {
        let row = sqlx::query(
            "SELECT id, request_id, endpoint_key, payload_json, correlation_id, status, \
             attempt_count, created_at, last_attempt_at, delivered_at, last_error \
             FROM webhook_deliveries WHERE request_id = $1 AND endpoint_key = $2",
        )
        .bind(request_id)
        .bind(endpoint_key)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_delivery).transpose()
    }

    async fn insert(&self, delivery: &WebhookDelivery) -> Result<bool> {
        // The unique index turns a concurrent duplicate into a no-op insert.
        let result = sqlx::query(
            "INSERT INTO webhook_deliveries \
             (id, request_id, endpoint_key, payload_json, correlation_id, status, \
              attempt_count, created_at, last_attempt_at, delivered_at, last_error) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (request_id, endpoint_key) DO NOTHING",
        )
        .bind(delivery.id)
        .bind(&delivery.request_id)
        .bind(&delivery.endpoint_key)
        .bind(&delivery.payload_json)
        .bind(&delivery.correlation_id)
        .bind(delivery.status.as_str())
        .bind(delivery.attempt_count as i32)
        .bind(delivery.created_at)
        .bind(delivery.last_attempt_at)
        .bind(delivery.delivered_at)
        .bind(&delivery.last_error)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn update(&self, delivery: &WebhookDelivery) -> Result<()> {
        sqlx::query(
            "UPDATE webhook_deliveries SET status = $1, attempt_count = $2, \
             last_attempt_at = $3, delivered_at = $4, last_error = $5 WHERE id = $6",
        )
        .bind(delivery.status.as_str())
        .bind(delivery.attempt_count as i32)
        .bind(delivery.last_attempt_at)
        .bind(delivery.delivered_at)
        .bind(&delivery.last_error)
        .bind(delivery.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
