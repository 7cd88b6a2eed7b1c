use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use transit_core::{
    key_subject, value_subject, BrokerSpec, RecordSchema, RecordSink, RegisteredSchema, Result,
    SchemaRegistry, TopicSpec, TransitError,
};

use crate::provisioner::TopicProvisioner;

const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(30);

/// Key shared by every time-series record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampKey {
    pub timestamp: i64,
}

/// Wall-clock time in epoch milliseconds
pub fn time_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Strictly increasing millisecond timestamps for record keys.
///
/// Follows the wall clock, but never hands out the same value twice even
/// when several records are produced within one millisecond.
#[derive(Debug, Default)]
pub struct MonotonicMillis {
    last: i64,
}

impl MonotonicMillis {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self) -> i64 {
        self.advance(time_millis())
    }

    fn advance(&mut self, now: i64) -> i64 {
        self.last = now.max(self.last + 1);
        self.last
    }
}

/// Schema-bound producer for a single provisioned topic.
///
/// The topic is provisioned and both schemas are registered before the
/// broker client exists, so a `RecordProducer` is never pointed at a missing
/// topic. Records are written in the registry wire format. `produce` only
/// enqueues; call [`RecordProducer::close`] before shutdown to flush.
pub struct RecordProducer<K, V> {
    topic: String,
    key_schema: RegisteredSchema,
    value_schema: RegisteredSchema,
    sink: Arc<dyn RecordSink>,
    flush_timeout: Duration,
    _records: PhantomData<fn(&K, &V)>,
}

impl<K: Serialize, V: Serialize> RecordProducer<K, V> {
    /// Provision `spec`, register the schemas and open a Kafka producer.
    pub async fn connect(
        provisioner: &TopicProvisioner,
        registry: &dyn SchemaRegistry,
        broker: &BrokerSpec,
        spec: TopicSpec,
        key_schema: RecordSchema,
        value_schema: RecordSchema,
    ) -> Result<Self> {
        provisioner.ensure(&spec).await?;
        let (key_schema, value_schema) =
            register(registry, &spec.name, key_schema, value_schema).await?;
        let sink = KafkaRecordSink::new(broker)?;
        Ok(Self::bind(spec.name, key_schema, value_schema, Arc::new(sink)))
    }

    /// Provision `spec`, register the schemas and produce through `sink`.
    pub async fn with_sink(
        provisioner: &TopicProvisioner,
        registry: &dyn SchemaRegistry,
        spec: TopicSpec,
        key_schema: RecordSchema,
        value_schema: RecordSchema,
        sink: Arc<dyn RecordSink>,
    ) -> Result<Self> {
        provisioner.ensure(&spec).await?;
        let (key_schema, value_schema) =
            register(registry, &spec.name, key_schema, value_schema).await?;
        Ok(Self::bind(spec.name, key_schema, value_schema, sink))
    }

    fn bind(
        topic: String,
        key_schema: RegisteredSchema,
        value_schema: RegisteredSchema,
        sink: Arc<dyn RecordSink>,
    ) -> Self {
        Self {
            topic,
            key_schema,
            value_schema,
            sink,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
            _records: PhantomData,
        }
    }

    pub fn with_flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = timeout;
        self
    }

    /// Encode against the bound schemas and enqueue without awaiting delivery.
    pub fn produce(&self, key: &K, value: &V) -> Result<()> {
        let key_bytes = self.key_schema.encode(key)?;
        let value_bytes = self.value_schema.encode(value)?;
        self.sink.enqueue(&self.topic, &key_bytes, &value_bytes)
    }

    /// Flush everything enqueued so far.
    pub fn close(&self) -> Result<()> {
        self.sink.flush(self.flush_timeout)?;
        info!("Flushed producer for topic {}", self.topic);
        Ok(())
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn key_schema(&self) -> &RegisteredSchema {
        &self.key_schema
    }

    pub fn value_schema(&self) -> &RegisteredSchema {
        &self.value_schema
    }
}

async fn register(
    registry: &dyn SchemaRegistry,
    topic: &str,
    key_schema: RecordSchema,
    value_schema: RecordSchema,
) -> Result<(RegisteredSchema, RegisteredSchema)> {
    let key_id = registry.register(&key_subject(topic), &key_schema).await?;
    let value_id = registry.register(&value_subject(topic), &value_schema).await?;
    Ok((key_schema.with_id(key_id), value_schema.with_id(value_id)))
}

/// [`RecordSink`] over an rdkafka `FutureProducer`
pub struct KafkaRecordSink {
    producer: FutureProducer,
}

impl KafkaRecordSink {
    pub fn new(broker: &BrokerSpec) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &broker.bootstrap_servers)
            .set("message.timeout.ms", "30000")
            .create()
            .map_err(|e| TransitError::Broker(format!("failed to create producer: {e}")))?;
        Ok(Self { producer })
    }
}

impl RecordSink for KafkaRecordSink {
    fn enqueue(&self, topic: &str, key: &[u8], payload: &[u8]) -> Result<()> {
        let record = FutureRecord::to(topic).key(key).payload(payload);
        match self.producer.send_result(record) {
            // Delivery is reported through the dropped future; flush waits for it.
            Ok(_delivery) => {
                debug!(topic, bytes = payload.len(), "enqueued record");
                Ok(())
            }
            Err((e, _)) => Err(TransitError::Broker(format!(
                "failed to enqueue record for {topic}: {e}"
            ))),
        }
    }

    fn flush(&self, timeout: Duration) -> Result<()> {
        self.producer
            .flush(timeout)
            .map_err(|e| TransitError::Broker(format!("flush failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_millis_never_repeats() {
        let mut clock = MonotonicMillis::new();
        assert_eq!(clock.advance(1_000), 1_000);
        assert_eq!(clock.advance(1_000), 1_001);
        assert_eq!(clock.advance(999), 1_002);
        assert_eq!(clock.advance(5_000), 5_000);
    }

    #[test]
    fn test_time_millis_is_recent() {
        // 2020-01-01T00:00:00Z
        assert!(time_millis() > 1_577_836_800_000);
    }
}
