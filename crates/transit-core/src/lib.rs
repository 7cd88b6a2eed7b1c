//! # Transit Core - shared types for the transit telemetry pipeline
//!
//! This crate defines the vocabulary the rest of the workspace is written in:
//! the broker seams every component talks through, the records that flow
//! over them, schema binding, topic specifications and YAML configuration.
//!
//! ## Key Components
//!
//! - **Broker seams**: [`TopicAdmin`], [`SchemaRegistry`], [`RecordSink`],
//!   [`MessageSource`], [`ReplaySource`] and [`MessageHandler`], implemented
//!   against Kafka in `transit-io` and by in-memory fakes in tests
//! - **Records**: [`ConsumedMessage`], [`PollOutcome`], [`PartitionAssignment`]
//! - **Schemas**: Avro record documents bound to keys and values, framed in
//!   the schema-registry wire format
//! - **Configuration**: [`TransitSpec`] loaded from YAML
//! - **Error Handling**: [`TransitError`] with fatal/recoverable classification
//!
//! ## Example Usage
//!
//! ```rust
//! use transit_core::{turnstile_topic, TopicSpec};
//!
//! let spec = TopicSpec::new(turnstile_topic("Clark/Lake"));
//! assert_eq!(spec.name, "station.clark_and_lake.turnstile.entry.v1");
//! assert_eq!(spec.partitions, 1);
//! ```

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub mod config;
pub mod error;
pub mod schema;
pub mod topic;

pub use config::{
    BrokerSpec, ConnectSpec, ConsumerSpec, SimulationSpec, StationSpec, TopicsSpec, TransitSpec,
};
pub use error::{Result, TransitError};
pub use schema::{key_subject, value_subject, RecordSchema, RegisteredSchema};
pub use topic::{
    connector_topic_prefix, normalize_station_name, reference_topic, transformed_topic,
    turnstile_topic, TopicConfig, TopicSpec, STATION_TABLE, WEATHER_TOPIC,
};

/// Transit line a station belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Line {
    Blue,
    Green,
    Red,
}

impl Line {
    pub fn as_str(&self) -> &'static str {
        match self {
            Line::Blue => "blue",
            Line::Green => "green",
            Line::Red => "red",
        }
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Administrative access to the broker
///
/// Both calls are bounded by the timeout they are given; an implementation
/// that cannot answer in time must return an error rather than block.
#[async_trait]
pub trait TopicAdmin: Send + Sync {
    /// Whether the broker already knows a topic with this name
    async fn topic_exists(&self, name: &str, timeout: Duration) -> Result<bool>;

    /// Submit a creation request and wait for the per-topic result
    async fn create_topic(&self, spec: &TopicSpec, timeout: Duration) -> Result<()>;
}

/// Schema registry the producers register their key and value schemas with
#[async_trait]
pub trait SchemaRegistry: Send + Sync {
    /// Register `schema` under `subject` and return its id.
    ///
    /// Registering a document the subject already holds returns the
    /// existing id.
    async fn register(&self, subject: &str, schema: &RecordSchema) -> Result<u32>;
}

/// Producing side of the broker client
///
/// `enqueue` hands a record to the client and returns without waiting for
/// delivery. `flush` blocks until everything enqueued so far has been
/// delivered or the timeout expires.
pub trait RecordSink: Send + Sync {
    fn enqueue(&self, topic: &str, key: &[u8], payload: &[u8]) -> Result<()>;

    fn flush(&self, timeout: Duration) -> Result<()>;
}

/// Result of a single poll
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Nothing arrived within the poll timeout
    Empty,
    /// An error-free message
    Message(ConsumedMessage),
    /// The broker attached an error to this message; it is skipped
    MessageError(String),
}

/// Consuming side of the broker client
///
/// An `Err` from [`MessageSource::poll`] is a client runtime or
/// deserialization failure and ends consumption.
pub trait MessageSource: Send {
    fn poll(&mut self, timeout: Duration) -> Result<PollOutcome>;

    /// Release the subscription. Called at most once.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// End of one partition when a replay was opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionEnd {
    pub partition: i32,
    /// Low watermark, the first offset still retained
    pub low: i64,
    /// High watermark, one past the last offset
    pub high: i64,
}

impl PartitionEnd {
    pub fn is_empty(&self) -> bool {
        self.high <= self.low
    }

    /// Whether a consumer whose next offset is `next` has read everything.
    pub fn reached_by(&self, next: Option<i64>) -> bool {
        self.is_empty() || next.is_some_and(|next| next >= self.high)
    }
}

/// A bounded read of a topic from its beginning
///
/// The end is fixed when the replay is opened; records produced afterwards
/// are not waited for.
pub trait ReplaySource: MessageSource {
    /// Whether every partition has been read up to its end.
    fn caught_up(&mut self) -> Result<bool>;
}

/// Per-message callback driven by a polling consumer
///
/// Invoked once for every error-free message, in offset order within a
/// partition. An `Err` is fatal: consumption stops and the error is handed
/// back to the host.
pub trait MessageHandler: Send {
    fn handle(&mut self, message: &ConsumedMessage) -> Result<()>;
}

impl<F> MessageHandler for F
where
    F: FnMut(&ConsumedMessage) -> Result<()> + Send,
{
    fn handle(&mut self, message: &ConsumedMessage) -> Result<()> {
        self(message)
    }
}

/// A message read from a topic partition
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConsumedMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
    /// Broker timestamp in epoch milliseconds
    pub timestamp: Option<i64>,
}

impl ConsumedMessage {
    /// Decode a framed Avro payload written with `schema`.
    pub fn value<T: DeserializeOwned>(&self, schema: &RecordSchema) -> Result<T> {
        let bytes = self.require(self.payload.as_deref(), "payload")?;
        schema.decode(bytes).map_err(|e| self.undecodable("payload", e))
    }

    /// Decode a framed Avro key written with `schema`.
    pub fn key<T: DeserializeOwned>(&self, schema: &RecordSchema) -> Result<T> {
        let bytes = self.require(self.key.as_deref(), "key")?;
        schema.decode(bytes).map_err(|e| self.undecodable("key", e))
    }

    /// Decode a schemaless JSON payload, as written by the station connector.
    pub fn json_value<T: DeserializeOwned>(&self) -> Result<T> {
        let bytes = self.require(self.payload.as_deref(), "payload")?;
        serde_json::from_slice(bytes).map_err(|e| self.undecodable("payload", e.into()))
    }

    fn require<'a>(&self, bytes: Option<&'a [u8]>, what: &str) -> Result<&'a [u8]> {
        bytes.ok_or_else(|| {
            TransitError::Deserialization(format!("message on \"{}\" has no {what}", self.topic))
        })
    }

    fn undecodable(&self, what: &str, e: TransitError) -> TransitError {
        TransitError::Deserialization(format!(
            "{what} on \"{}\" at offset {} is not decodable: {e}",
            self.topic, self.offset
        ))
    }
}

/// Where a partition starts reading after assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOffset {
    /// Committed offset, or the broker's reset policy when none exists
    Stored,
    /// Earliest offset still retained
    Earliest,
}

/// One partition handed to a consumer by the group coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionAssignment {
    pub topic: String,
    pub partition: i32,
    pub start: StartOffset,
}

impl PartitionAssignment {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
            start: StartOffset::Stored,
        }
    }
}

/// Offset-reset policy, fixed for the lifetime of a consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OffsetPolicy {
    #[default]
    BrokerDefault,
    Earliest,
}

impl OffsetPolicy {
    pub fn from_earliest_flag(offset_earliest: bool) -> Self {
        if offset_earliest {
            OffsetPolicy::Earliest
        } else {
            OffsetPolicy::BrokerDefault
        }
    }

    /// Rewrite start offsets of freshly assigned partitions.
    ///
    /// With [`OffsetPolicy::BrokerDefault`] the partitions are left untouched.
    pub fn apply(&self, partitions: &mut [PartitionAssignment]) {
        if *self == OffsetPolicy::Earliest {
            for partition in partitions.iter_mut() {
                partition.start = StartOffset::Earliest;
            }
        }
    }
}
