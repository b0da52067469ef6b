use std::collections::HashMap;

use anyhow::{Context, Result};
use reqwest::Method;

use crate::config::EndpointEntry;

/// A configured webhook destination.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub key: String,
    pub url: String,
    pub method: Method,
}

/// Lookup table from endpoint key to destination.
#[derive(Debug, Clone, Default)]
pub struct EndpointRegistry {
    endpoints: HashMap<String, Endpoint>,
}

impl EndpointRegistry {
    /// Duplicate keys resolve last-wins, matching positional config merge.
    pub fn from_entries(entries: &[EndpointEntry]) -> Result<Self> {
        let mut endpoints = HashMap::new();
        for entry in entries {
            let method: Method = entry
                .method
                .to_uppercase()
                .parse()
                .with_context(|| {
                    format!(
                        "Invalid HTTP method '{}' for endpoint '{}'",
                        entry.method, entry.key
                    )
                })?;
            endpoints.insert(
                entry.key.clone(),
                Endpoint {
                    key: entry.key.clone(),
                    url: entry.url.clone(),
                    method,
                },
            );
        }
        Ok(Self { endpoints })
    }

    pub fn resolve(&self, key: &str) -> Option<&Endpoint> {
        self.endpoints.get(key)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, url: &str, method: &str) -> EndpointEntry {
        EndpointEntry {
            key: key.to_string(),
            url: url.to_string(),
            method: method.to_string(),
        }
    }

    #[test]
    fn test_resolve_known_key() {
        let registry = EndpointRegistry::from_entries(&[entry(
            "crm-sync",
            "https://crm.example.com/hooks/ecm",
            "POST",
        )])
        .unwrap();

        let endpoint = registry.resolve("crm-sync").unwrap();
        assert_eq!(endpoint.url, "https://crm.example.com/hooks/ecm");
        assert_eq!(endpoint.method, Method::POST);
        assert!(registry.resolve("missing").is_none());
    }

    #[test]
    fn test_duplicate_keys_last_wins() {
        let registry = EndpointRegistry::from_entries(&[
            entry("crm-sync", "https://old.example.com", "POST"),
            entry("crm-sync", "https://new.example.com", "PUT"),
        ])
        .unwrap();

        let endpoint = registry.resolve("crm-sync").unwrap();
        assert_eq!(endpoint.url, "https://new.example.com");
        assert_eq!(endpoint.method, Method::PUT);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_lowercase_method_is_normalized() {
        let registry =
            EndpointRegistry::from_entries(&[entry("a", "https://a.example.com", "put")]).unwrap();
        assert_eq!(registry.resolve("a").unwrap().method, Method::PUT);
    }

    #[test]
    fn test_invalid_method_is_rejected() {
        let result = EndpointRegistry::from_entries(&[entry("a", "https://a.example.com", "P OST")]);
        assert!(result.is_err());
    }
}
