use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Dispatcher settings loaded from a TOML file.
///
/// ```toml
/// max_retry_attempts = 3
/// initial_backoff_seconds = 2.0
///
/// [[endpoints]]
/// key = "crm-sync"
/// url = "https://crm.example.com/hooks/ecm"
/// method = "POST"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookDispatcherConfig {
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_initial_backoff_seconds")]
    pub initial_backoff_seconds: f64,
    #[serde(default)]
    pub endpoints: Vec<EndpointEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EndpointEntry {
    pub key: String,
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_initial_backoff_seconds() -> f64 {
    2.0
}

fn default_method() -> String {
    "POST".to_string()
}

impl WebhookDispatcherConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).context("Invalid dispatcher config")?;
        if !config.initial_backoff_seconds.is_finite() || config.initial_backoff_seconds < 0.0 {
            anyhow::bail!(
                "initial_backoff_seconds must be a non-negative number, got {}",
                config.initial_backoff_seconds
            );
        }
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&raw)
    }
}

impl Default for WebhookDispatcherConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: default_max_retry_attempts(),
            initial_backoff_seconds: default_initial_backoff_seconds(),
            endpoints: Vec::new(),
        }
    }
}
