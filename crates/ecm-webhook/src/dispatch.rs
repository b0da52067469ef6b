//! Idempotent webhook dispatch.
//!
//! Every dispatch is journaled in the delivery ledger before any HTTP
//! traffic happens. The ledger row is the idempotency record: a request
//! that already succeeded is skipped without touching the network, and a
//! request that previously exhausted its retries resumes where it left
//! off, carrying its attempt count forward.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{info, warn};

use ecm_common::WebhookRequested;

use crate::delivery::{DeliveryStatus, WebhookDelivery};
use crate::endpoints::{Endpoint, EndpointRegistry};
use crate::repository::WebhookDeliveryRepository;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("No webhook endpoint configured for key '{0}'")]
    UnknownEndpoint(String),

    #[error("Delivery to '{endpoint_key}' failed after {attempts} attempt(s): {last_error}")]
    Exhausted {
        endpoint_key: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Dispatch cancelled by shutdown")]
    Cancelled,

    #[error(transparent)]
    Repository(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct WebhookDispatchOptions {
    /// Retries after the first attempt, per dispatch invocation.
    pub max_retry_attempts: u32,
    /// Base of the backoff curve: the nth retry waits base^n seconds.
    pub initial_backoff_seconds: f64,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for WebhookDispatchOptions {
    fn default() -> Self {
        Self {
            max_retry_attempts: 3,
            initial_backoff_seconds: 2.0,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Upper bound on a single backoff wait. The exponential curve overflows
/// `Duration` for large bases, and a wait longer than this is
/// indistinguishable from a hung dispatcher anyway.
const MAX_BACKOFF: Duration = Duration::from_secs(3600);

fn backoff_delay(initial_backoff_seconds: f64, retry: u32) -> Duration {
    let secs = initial_backoff_seconds.powi(retry as i32);
    Duration::try_from_secs_f64(secs)
        .map(|delay| delay.min(MAX_BACKOFF))
        .unwrap_or(MAX_BACKOFF)
}

pub struct WebhookDispatchService {
    repository: Arc<dyn WebhookDeliveryRepository>,
    registry: EndpointRegistry,
    client: reqwest::Client,
    options: WebhookDispatchOptions,
    shutdown: broadcast::Sender<()>,
}

impl WebhookDispatchService {
    pub fn new(
        repository: Arc<dyn WebhookDeliveryRepository>,
        registry: EndpointRegistry,
        options: WebhookDispatchOptions,
        shutdown: broadcast::Sender<()>,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(options.connect_timeout)
            .timeout(options.request_timeout)
            .build()?;

        Ok(Self {
            repository,
            registry,
            client,
            options,
            shutdown,
        })
    }

    /// Deliver one webhook request, retrying with exponential backoff.
    ///
    /// Returns Ok both for a fresh success and for a request whose ledger
    /// row already shows Succeeded. A terminal failure is persisted as
    /// Failed and surfaced as an error; the ledger keeps the attempt
    /// history so a later redelivery of the same request resumes from it.
    pub async fn dispatch(&self, request: &WebhookRequested) -> Result<(), DispatchError> {
        let existing = self
            .repository
            .find(&request.request_id, &request.endpoint_key)
            .await?;

        let mut delivery = match existing {
            Some(found) => found,
            None => {
                let fresh = WebhookDelivery::new_pending(request);
                if self.repository.insert(&fresh).await? {
                    fresh
                } else {
                    // Lost the insert race to a concurrent dispatcher.
                    self.repository
                        .find(&request.request_id, &request.endpoint_key)
                        .await?
                        .ok_or_else(|| anyhow!("Delivery row vanished after insert conflict"))?
                }
            }
        };

        if delivery.status == DeliveryStatus::Succeeded {
            info!(
                request_id = %request.request_id,
                endpoint_key = %request.endpoint_key,
                "Webhook already delivered, skipping"
            );
            return Ok(());
        }

        // The Pending row is journaled before the key is resolved, so a
        // misconfigured key leaves a zero-attempt Pending row behind.
        let endpoint = self
            .registry
            .resolve(&request.endpoint_key)
            .ok_or_else(|| DispatchError::UnknownEndpoint(request.endpoint_key.clone()))?
            .clone();

        let mut retry = 0u32;
        loop {
            delivery.record_attempt(Utc::now());
            // Journal the attempt before the call so a crash mid-request
            // still counts it.
            self.repository.update(&delivery).await?;

            let error = match self.execute_call(&endpoint, &request.payload_json).await {
                Ok(status) if status.is_success() => {
                    delivery.mark_succeeded();
                    self.repository.update(&delivery).await?;
                    info!(
                        request_id = %request.request_id,
                        endpoint_key = %request.endpoint_key,
                        attempts = delivery.attempt_count,
                        "Webhook delivered"
                    );
                    return Ok(());
                }
                Ok(status) => format!("HTTP {}", status),
                Err(err) => err.to_string(),
            };

            retry += 1;
            if retry > self.options.max_retry_attempts {
                delivery.mark_failed(error.clone());
                self.repository.update(&delivery).await?;
                warn!(
                    request_id = %request.request_id,
                    endpoint_key = %request.endpoint_key,
                    attempts = delivery.attempt_count,
                    error = %error,
                    "Webhook delivery failed, retry budget exhausted"
                );
                return Err(DispatchError::Exhausted {
                    endpoint_key: request.endpoint_key.clone(),
                    attempts: delivery.attempt_count,
                    last_error: error,
                });
            }

            let delay = backoff_delay(self.options.initial_backoff_seconds, retry);
            warn!(
                request_id = %request.request_id,
                endpoint_key = %request.endpoint_key,
                retry,
                delay_secs = delay.as_secs_f64(),
                error = %error,
                "Webhook attempt failed, backing off"
            );

            let mut shutdown_rx = self.shutdown.subscribe();
            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown_rx.recv() => return Err(DispatchError::Cancelled),
            }
        }
    }

    async fn execute_call(
        &self,
        endpoint: &Endpoint,
        payload_json: &str,
    ) -> Result<reqwest::StatusCode, reqwest::Error> {
        let response = self
            .client
            .request(endpoint.method.clone(), &endpoint.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload_json.to_string())
            .send()
            .await?;
        Ok(response.status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_exponential_in_the_retry_number() {
        assert_eq!(backoff_delay(2.0, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(2.0, 2), Duration::from_secs(4));
        assert_eq!(backoff_delay(2.0, 3), Duration::from_secs(8));
    }

    #[test]
    fn test_unit_base_backoff_stays_flat() {
        assert_eq!(backoff_delay(1.0, 1), Duration::from_secs(1));
        assert_eq!(backoff_delay(1.0, 5), Duration::from_secs(1));
    }

    #[test]
    fn test_zero_base_backoff_retries_immediately() {
        assert_eq!(backoff_delay(0.0, 1), Duration::ZERO);
        assert_eq!(backoff_delay(0.0, 3), Duration::ZERO);
    }

    #[test]
    fn test_oversized_backoff_saturates_at_the_cap() {
        // 1e6^4 seconds overflows Duration; the delay clamps instead of
        // panicking inside the dispatch loop.
        assert_eq!(backoff_delay(1_000_000.0, 4), MAX_BACKOFF);
        assert_eq!(backoff_delay(f64::MAX, 2), MAX_BACKOFF);
        assert_eq!(backoff_delay(7200.0, 1), MAX_BACKOFF);
    }
}
