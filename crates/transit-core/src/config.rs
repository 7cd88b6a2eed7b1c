//! YAML configuration for the transit processes.
//!
//! # Example YAML Configuration
//!
//! ```yaml
//! broker:
//!   bootstrap_servers: "PLAINTEXT://localhost:9092"
//!   schema_registry_url: "http://localhost:8081"
//! rest_proxy_url: "http://localhost:8082"
//! topics:
//!   prefix: "org.chicago.cta"
//! simulation:
//!   month: 7
//! stations:
//!   - { station_id: 40820, name: "Austin-Forest Park", line: blue }
//! ```

use crate::topic::{connector_topic_prefix, reference_topic};
use crate::{Line, Result, TransitError, TopicConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Complete process configuration loaded from YAML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransitSpec {
    #[serde(default)]
    pub broker: BrokerSpec,

    /// Kafka REST proxy base URL, required when weather is sent over HTTP
    #[serde(default)]
    pub rest_proxy_url: Option<String>,

    /// Kafka Connect settings for the station reference-data connector
    #[serde(default)]
    pub connect: Option<ConnectSpec>,

    #[serde(default)]
    pub topics: TopicsSpec,

    #[serde(default)]
    pub simulation: SimulationSpec,

    #[serde(default)]
    pub stations: Vec<StationSpec>,

    #[serde(default)]
    pub consumer: ConsumerSpec,
}

impl TransitSpec {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let spec: TransitSpec = serde_yaml::from_str(yaml)
            .map_err(|e| TransitError::Config(format!("invalid YAML: {e}")))?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            TransitError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let spec = Self::from_yaml_str(&yaml)?;
        debug!(
            path = %path.display(),
            stations = spec.stations.len(),
            "loaded transit configuration"
        );
        Ok(spec)
    }

    /// Reject configurations that would only fail once the broker is involved.
    pub fn validate(&self) -> Result<()> {
        if self.broker.bootstrap_servers.trim().is_empty() {
            return Err(TransitError::Config(
                "broker.bootstrap_servers must not be empty".to_string(),
            ));
        }
        if self.broker.group_id.trim().is_empty() {
            return Err(TransitError::Config(
                "broker.group_id must not be empty".to_string(),
            ));
        }
        if self.topics.partitions < 1 || self.topics.replication < 1 {
            return Err(TransitError::Config(
                "topics.partitions and topics.replication must be at least 1".to_string(),
            ));
        }
        if self.simulation.month > 11 {
            return Err(TransitError::Config(format!(
                "simulation.month must be in 0..=11, got {}",
                self.simulation.month
            )));
        }
        if self.simulation.weather_via_rest && self.rest_proxy_url.is_none() {
            return Err(TransitError::Config(
                "simulation.weather_via_rest requires rest_proxy_url".to_string(),
            ));
        }
        if Duration::try_from_secs_f64(self.consumer.sleep_secs).is_err() {
            return Err(TransitError::Config(format!(
                "consumer.sleep_secs must be a non-negative duration, got {}",
                self.consumer.sleep_secs
            )));
        }
        if let Some(connect) = &self.connect {
            let produced = connect.output_topic(&self.topics.prefix);
            let consumed = reference_topic(&self.topics.prefix);
            if produced != consumed {
                return Err(TransitError::Config(format!(
                    "connector writes to \"{produced}\" but the stream job reads \"{consumed}\""
                )));
            }
        }
        let mut seen = std::collections::HashSet::new();
        for station in &self.stations {
            if !seen.insert(station.station_id) {
                return Err(TransitError::Config(format!(
                    "duplicate station_id {}",
                    station.station_id
                )));
            }
        }
        Ok(())
    }
}

/// Broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerSpec {
    /// Comma-separated list of Kafka broker addresses
    #[serde(default = "default_bootstrap_servers")]
    pub bootstrap_servers: String,

    #[serde(default = "default_group_id")]
    pub group_id: String,

    #[serde(default = "default_schema_registry_url")]
    pub schema_registry_url: String,

    /// Bound on metadata and topic-creation calls
    #[serde(default = "default_client_timeout_ms")]
    pub client_timeout_ms: u64,
}

impl BrokerSpec {
    pub fn client_timeout(&self) -> Duration {
        Duration::from_millis(self.client_timeout_ms)
    }
}

impl Default for BrokerSpec {
    fn default() -> Self {
        Self {
            bootstrap_servers: default_bootstrap_servers(),
            group_id: default_group_id(),
            schema_registry_url: default_schema_registry_url(),
            client_timeout_ms: default_client_timeout_ms(),
        }
    }
}

/// Station connector registration against the relational store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectSpec {
    /// Kafka Connect `connectors` endpoint
    pub url: String,
    #[serde(default = "default_connector_name")]
    pub name: String,
    pub connection_url: String,
    pub connection_user: String,
    pub connection_password: String,
    #[serde(default = "default_connector_table")]
    pub table: String,
    #[serde(default = "default_incrementing_column")]
    pub incrementing_column: String,
    #[serde(default = "default_connector_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl ConnectSpec {
    /// Topic the connector writes rows to: the prefix derived from
    /// `topics.prefix` followed by the table name.
    pub fn output_topic(&self, topics_prefix: &str) -> String {
        format!("{}{}", connector_topic_prefix(topics_prefix), self.table)
    }
}

/// Topic naming and creation defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicsSpec {
    /// Prefix of the reference-data topic
    #[serde(default = "default_topic_prefix")]
    pub prefix: String,
    #[serde(default = "default_one")]
    pub partitions: i32,
    #[serde(default = "default_one")]
    pub replication: i32,
    #[serde(default)]
    pub config: TopicConfig,
}

impl Default for TopicsSpec {
    fn default() -> Self {
        Self {
            prefix: default_topic_prefix(),
            partitions: 1,
            replication: 1,
            config: TopicConfig::default(),
        }
    }
}

/// Simulated clock settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationSpec {
    /// Simulated time advanced per tick
    #[serde(default = "default_time_step_secs")]
    pub time_step_secs: u64,

    /// Wall-clock pause between ticks
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Zero-based month the simulation starts in
    #[serde(default)]
    pub month: u32,

    /// Send weather updates through the REST proxy instead of the broker client
    #[serde(default)]
    pub weather_via_rest: bool,

    /// Stop after this many ticks, run until interrupted when absent
    #[serde(default)]
    pub max_ticks: Option<u64>,
}

impl SimulationSpec {
    pub fn time_step(&self) -> Duration {
        Duration::from_secs(self.time_step_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl Default for SimulationSpec {
    fn default() -> Self {
        Self {
            time_step_secs: default_time_step_secs(),
            tick_interval_ms: default_tick_interval_ms(),
            month: 0,
            weather_via_rest: false,
            max_ticks: None,
        }
    }
}

/// One station with a turnstile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationSpec {
    pub station_id: i64,
    pub name: String,
    pub line: Line,
    /// Average entries per day, drives the default ridership model
    #[serde(default = "default_daily_entries")]
    pub daily_entries: u32,
}

/// Polling consumer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerSpec {
    /// Pause between drain phases
    #[serde(default = "default_sleep_secs")]
    pub sleep_secs: f64,

    /// Timeout of a single poll
    #[serde(default = "default_consume_timeout_ms")]
    pub consume_timeout_ms: u64,

    /// Start every assigned partition from the earliest offset
    #[serde(default)]
    pub offset_earliest: bool,

    /// Upper bound on rebuilding a table from its changelog
    #[serde(default = "default_replay_timeout_ms")]
    pub replay_timeout_ms: u64,
}

impl ConsumerSpec {
    /// Pause between drain phases. Values `validate` rejects map to zero.
    pub fn sleep_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.sleep_secs).unwrap_or(Duration::ZERO)
    }

    pub fn consume_timeout(&self) -> Duration {
        Duration::from_millis(self.consume_timeout_ms)
    }

    pub fn replay_timeout(&self) -> Duration {
        Duration::from_millis(self.replay_timeout_ms)
    }
}

impl Default for ConsumerSpec {
    fn default() -> Self {
        Self {
            sleep_secs: default_sleep_secs(),
            consume_timeout_ms: default_consume_timeout_ms(),
            offset_earliest: false,
            replay_timeout_ms: default_replay_timeout_ms(),
        }
    }
}

fn default_bootstrap_servers() -> String {
    "PLAINTEXT://localhost:9092".to_string()
}

fn default_group_id() -> String {
    "group-0".to_string()
}

fn default_schema_registry_url() -> String {
    "http://localhost:8081".to_string()
}

fn default_client_timeout_ms() -> u64 {
    3000
}

fn default_connector_name() -> String {
    "stations".to_string()
}

fn default_connector_table() -> String {
    "stations".to_string()
}

fn default_incrementing_column() -> String {
    "stop_id".to_string()
}

// The stations table rarely changes, poll it once a day.
fn default_connector_poll_interval_ms() -> u64 {
    1000 * 60 * 60 * 24
}

fn default_topic_prefix() -> String {
    "org.chicago.cta".to_string()
}

fn default_one() -> i32 {
    1
}

fn default_time_step_secs() -> u64 {
    300
}

fn default_tick_interval_ms() -> u64 {
    500
}

fn default_daily_entries() -> u32 {
    2000
}

fn default_sleep_secs() -> f64 {
    1.0
}

fn default_consume_timeout_ms() -> u64 {
    100
}

fn default_replay_timeout_ms() -> u64 {
    30_000
}
