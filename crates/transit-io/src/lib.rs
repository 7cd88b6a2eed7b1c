//! # Transit I/O - broker-facing components
//!
//! Kafka implementations of the seams defined in `transit-core`, plus the
//! components built on top of them.
//!
//! ## Features
//!
//! ### Producing
//! - **Topic provisioning**: idempotent creation through a shared registry
//! - **Record producer**: schema-bound, enqueue-only produce with flush on close
//! - **Schema registry**: subject registration shared by every producer
//! - **REST proxy**: single-record batches over HTTP
//!
//! ### Consuming
//! - **Polling consumer**: drain-then-wait loop with offset-reset policy
//!   applied on every assignment
//! - **Weather model**: consumer-side view of the latest weather update
//!
//! ### Synthetic sources
//! - **Turnstile**: rider entries per station and time step
//! - **Weather**: bounded random walk over temperature and status
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use transit_core::{RecordSchema, TopicSpec, TransitSpec};
//! use transit_io::{RecordProducer, RegistryClient, TimestampKey, TopicProvisioner};
//!
//! # async fn example() -> transit_core::Result<()> {
//! let spec = TransitSpec::default();
//! let provisioner = Arc::new(TopicProvisioner::connect(&spec.broker)?);
//! let registry = RegistryClient::new(&spec.broker.schema_registry_url)?;
//! let producer: RecordProducer<TimestampKey, serde_json::Value> = RecordProducer::connect(
//!     &provisioner,
//!     &registry,
//!     &spec.broker,
//!     TopicSpec::new("weather.update.v1"),
//!     RecordSchema::timestamp_key()?,
//!     RecordSchema::weather_value()?,
//! )
//! .await?;
//! producer.close()?;
//! # Ok(())
//! # }
//! ```

/// Kafka Connect registration for the station connector
pub mod connector;

/// Polling consumer and the Kafka message source behind it
pub mod consumer;

/// Schema-bound record producer
pub mod producer;

/// Idempotent topic provisioning
pub mod provisioner;

/// Schema registry client
pub mod registry;

/// REST proxy production path
pub mod rest_proxy;

/// Synthetic turnstile source
pub mod source_turnstile;

/// Synthetic weather source
pub mod source_weather;

/// Consumer-side weather state
pub mod weather_model;

pub use connector::{ConnectorClient, ConnectorStatus};
pub use consumer::{
    ConsumerState, DrainReport, KafkaMessageSource, KafkaReplaySource, PollingConsumer,
};
pub use producer::{time_millis, KafkaRecordSink, MonotonicMillis, RecordProducer, TimestampKey};
pub use provisioner::{KafkaTopicAdmin, TopicProvisioner};
pub use registry::RegistryClient;
pub use rest_proxy::RestProxyProducer;
pub use source_turnstile::{EntryRate, HourlyRidership, Turnstile, TurnstileEntry};
pub use source_weather::{
    Weather, WeatherPublisher, WeatherStatus, WeatherTransport, WeatherUpdate, WeatherWalk,
};
pub use weather_model::WeatherModel;
