//! Topic specifications and naming conventions.

use serde::{Deserialize, Serialize};

/// Shared weather topic
pub const WEATHER_TOPIC: &str = "weather.update.v1";

/// Retention and compaction settings applied when a topic is created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicConfig {
    #[serde(default = "default_cleanup_policy")]
    pub cleanup_policy: String,
    #[serde(default = "default_compression_type")]
    pub compression_type: String,
    #[serde(default = "default_delete_retention_ms")]
    pub delete_retention_ms: u64,
    #[serde(default = "default_file_delete_delay_ms")]
    pub file_delete_delay_ms: u64,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            cleanup_policy: default_cleanup_policy(),
            compression_type: default_compression_type(),
            delete_retention_ms: default_delete_retention_ms(),
            file_delete_delay_ms: default_file_delete_delay_ms(),
        }
    }
}

impl TopicConfig {
    /// Broker configuration entries in the order they are submitted.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        vec![
            ("cleanup.policy", self.cleanup_policy.clone()),
            ("compression.type", self.compression_type.clone()),
            ("delete.retention.ms", self.delete_retention_ms.to_string()),
            ("file.delete.delay.ms", self.file_delete_delay_ms.to_string()),
        ]
    }
}

fn default_cleanup_policy() -> String {
    "compact".to_string()
}

fn default_compression_type() -> String {
    "lz4".to_string()
}

fn default_delete_retention_ms() -> u64 {
    2000
}

fn default_file_delete_delay_ms() -> u64 {
    30000
}

/// Everything needed to create a topic on the broker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicSpec {
    pub name: String,
    pub partitions: i32,
    pub replication: i32,
    #[serde(default)]
    pub config: TopicConfig,
}

impl TopicSpec {
    /// Single partition, single replica topic with the default compacted config.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            partitions: 1,
            replication: 1,
            config: TopicConfig::default(),
        }
    }

    pub fn with_partitions(mut self, partitions: i32) -> Self {
        self.partitions = partitions;
        self
    }

    pub fn with_replication(mut self, replication: i32) -> Self {
        self.replication = replication;
        self
    }

    pub fn with_config(mut self, config: TopicConfig) -> Self {
        self.config = config;
        self
    }
}

/// Lowercase a station name and make it safe for use inside a topic name.
///
/// `/` becomes `_and_`, spaces and dashes become underscores and
/// apostrophes are dropped.
pub fn normalize_station_name(name: &str) -> String {
    name.to_lowercase()
        .replace('/', "_and_")
        .replace([' ', '-'], "_")
        .replace('\'', "")
}

/// Per-station turnstile topic, e.g. `station.clark_and_lake.turnstile.entry.v1`
pub fn turnstile_topic(station_name: &str) -> String {
    format!(
        "station.{}.turnstile.entry.v1",
        normalize_station_name(station_name)
    )
}

/// Table the station connector reads from
pub const STATION_TABLE: &str = "stations";

/// `topic.prefix` handed to the station connector, which appends the table name
pub fn connector_topic_prefix(prefix: &str) -> String {
    format!("{}.information.", prefix.trim_end_matches('.'))
}

/// Reference-data topic written by the station connector
pub fn reference_topic(prefix: &str) -> String {
    format!("{}{STATION_TABLE}", connector_topic_prefix(prefix))
}

/// Changelog topic backing the transformed station table
pub fn transformed_topic(reference_topic: &str) -> String {
    format!("{reference_topic}.transformed.v1")
}
