//! Record production through the Kafka REST proxy.
//!
//! The proxy registers the posted schema documents and writes the records in
//! the same registry wire format as [`RecordProducer`](crate::RecordProducer).

use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, error};
use transit_core::{RecordSchema, Result, TransitError};

/// Content type for Avro-encoded records in REST proxy API v2
pub const AVRO_V2_JSON: &str = "application/vnd.kafka.avro.v2+json";

/// Posts single-record batches to `<proxy>/topics/<topic>`
#[derive(Clone)]
pub struct RestProxyProducer {
    http_client: Client,
    base_url: String,
}

impl RestProxyProducer {
    pub fn new(base_url: &str) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| TransitError::Other(e.into()))?;
        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn topic_url(&self, topic: &str) -> String {
        format!("{}/topics/{}", self.base_url, topic)
    }

    /// Send one key/value record. A non-2xx response is an error.
    pub async fn post<K: Serialize, V: Serialize>(
        &self,
        topic: &str,
        key_schema: &RecordSchema,
        value_schema: &RecordSchema,
        key: &K,
        value: &V,
    ) -> Result<()> {
        let body = json!({
            "value_schema": value_schema.document(),
            "key_schema": key_schema.document(),
            "records": [{
                "key": key_schema.to_json(key)?,
                "value": value_schema.to_json(value)?,
            }],
        });

        let url = self.topic_url(topic);
        let response = self
            .http_client
            .post(&url)
            .header(CONTENT_TYPE, AVRO_V2_JSON)
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| {
                TransitError::Other(anyhow::Error::new(e).context(format!("POST {url} failed")))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(
                "Failed to send record to Kafka REST Proxy: status -> {}\n{}",
                status, body
            );
            return Err(TransitError::Http {
                url,
                status: status.as_u16(),
                body,
            });
        }

        debug!(topic, "sent record through REST proxy");
        Ok(())
    }
}
