//! Schema registration against the Confluent schema registry.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error};
use transit_core::{RecordSchema, Result, SchemaRegistry, TransitError};

/// Content type of schema registry API v1 requests
pub const SCHEMA_REGISTRY_V1_JSON: &str = "application/vnd.schemaregistry.v1+json";

#[derive(Debug, Deserialize)]
struct Registered {
    id: u32,
}

/// Registers schemas under `<topic>-key` / `<topic>-value` subjects.
///
/// Ids are cached per subject and document, so producers sharing a subject
/// cost one request.
pub struct RegistryClient {
    http_client: Client,
    base_url: String,
    ids: Mutex<HashMap<(String, String), u32>>,
}

impl RegistryClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| TransitError::Other(e.into()))?;
        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            ids: Mutex::new(HashMap::new()),
        })
    }

    fn versions_url(&self, subject: &str) -> String {
        format!("{}/subjects/{}/versions", self.base_url, subject)
    }
}

#[async_trait]
impl SchemaRegistry for RegistryClient {
    async fn register(&self, subject: &str, schema: &RecordSchema) -> Result<u32> {
        let cache_key = (subject.to_string(), schema.document().to_string());
        let mut ids = self.ids.lock().await;
        if let Some(id) = ids.get(&cache_key) {
            return Ok(*id);
        }

        let url = self.versions_url(subject);
        let response = self
            .http_client
            .post(&url)
            .header(CONTENT_TYPE, SCHEMA_REGISTRY_V1_JSON)
            .body(json!({ "schema": schema.document() }).to_string())
            .send()
            .await
            .map_err(|e| {
                TransitError::Other(anyhow::Error::new(e).context(format!("POST {url} failed")))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(
                "Failed to register schema for subject {}: status -> {}\n{}",
                subject, status, body
            );
            return Err(TransitError::Http {
                url,
                status: status.as_u16(),
                body,
            });
        }

        let registered: Registered = response.json().await.map_err(|e| {
            TransitError::Other(anyhow::Error::new(e).context(format!("bad response from {url}")))
        })?;
        debug!(subject, id = registered.id, "schema registered");
        ids.insert(cache_key, registered.id);
        Ok(registered.id)
    }
}
