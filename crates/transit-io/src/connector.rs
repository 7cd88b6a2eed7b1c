//! One-shot registration of the station JDBC source connector.
//!
//! Nothing in the streaming path calls this; it runs once at startup of the
//! simulation when a `connect` section is configured.

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, info};
use transit_core::{connector_topic_prefix, ConnectSpec, Result, TopicsSpec, TransitError};

/// Outcome of [`ConnectorClient::ensure`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorStatus {
    AlreadyPresent,
    Created,
}

pub struct ConnectorClient {
    http_client: Client,
    spec: ConnectSpec,
    topic_prefix: String,
}

impl ConnectorClient {
    /// The connector's topic prefix is derived from `topics.prefix`, so its
    /// rows land on the reference topic the stream job subscribes to.
    pub fn new(spec: ConnectSpec, topics: &TopicsSpec) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| TransitError::Other(e.into()))?;
        Ok(Self {
            http_client,
            spec,
            topic_prefix: connector_topic_prefix(&topics.prefix),
        })
    }

    /// Register the connector unless Kafka Connect already knows it.
    pub async fn ensure(&self) -> Result<ConnectorStatus> {
        let base = self.spec.url.trim_end_matches('/');
        let existing = self
            .http_client
            .get(format!("{}/{}", base, self.spec.name))
            .send()
            .await
            .map_err(|e| {
                TransitError::Other(anyhow::Error::new(e).context("connector lookup failed"))
            })?;
        if existing.status() == StatusCode::OK {
            debug!("connector already created skipping recreation");
            return Ok(ConnectorStatus::AlreadyPresent);
        }

        let body = json!({
            "name": self.spec.name,
            "config": connector_config(&self.spec, &self.topic_prefix),
        });
        let response = self
            .http_client
            .post(base)
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| {
                TransitError::Other(anyhow::Error::new(e).context("connector registration failed"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(
                "Failed to create connector \"{}\": status -> {}\n{}",
                self.spec.name, status, body
            );
            return Err(TransitError::Http {
                url: base.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        info!("Successfully created connector \"{}\"", self.spec.name);
        Ok(ConnectorStatus::Created)
    }
}

/// JDBC source connector settings for the stations table
pub fn connector_config(spec: &ConnectSpec, topic_prefix: &str) -> Value {
    json!({
        "connector.class": "io.confluent.connect.jdbc.JdbcSourceConnector",
        "key.converter": "org.apache.kafka.connect.json.JsonConverter",
        "key.converter.schemas.enable": "false",
        "value.converter": "org.apache.kafka.connect.json.JsonConverter",
        "value.converter.schemas.enable": "false",
        "connection.url": spec.connection_url,
        "connection.user": spec.connection_user,
        "connection.password": spec.connection_password,
        "table.whitelist": spec.table,
        "mode": "incrementing",
        "incrementing.column.name": spec.incrementing_column,
        "topic.prefix": topic_prefix,
        "poll.interval.ms": spec.poll_interval_ms.to_string(),
        "tasks.max": 1,
    })
}
