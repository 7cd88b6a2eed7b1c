use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use transit_core::{
    reference_topic, transformed_topic, BrokerSpec, ConsumedMessage, MessageHandler,
    PollOutcome, RecordSchema, RecordSink, ReplaySource, Result, SchemaRegistry, TopicSpec,
    TopicsSpec, TransitError,
};
use transit_io::{RecordProducer, TopicProvisioner};

use crate::station::{Station, StationKey, TransformedStation};

/// Latest [`TransformedStation`] per station id
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StationTable {
    rows: HashMap<i64, TransformedStation>,
}

impl StationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the row for `station.station_id`.
    pub fn upsert(&mut self, station: TransformedStation) -> Option<TransformedStation> {
        self.rows.insert(station.station_id, station)
    }

    pub fn remove(&mut self, station_id: i64) -> Option<TransformedStation> {
        self.rows.remove(&station_id)
    }

    pub fn get(&self, station_id: i64) -> Option<&TransformedStation> {
        self.rows.get(&station_id)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TransformedStation> {
        self.rows.values()
    }

    /// Apply one changelog record. A record without a payload is a tombstone.
    pub fn apply_changelog(
        &mut self,
        message: &ConsumedMessage,
        key_schema: &RecordSchema,
        value_schema: &RecordSchema,
    ) -> Result<()> {
        let key: StationKey = message.key(key_schema)?;
        if message.payload.is_none() {
            self.remove(key.station_id);
            return Ok(());
        }
        let station: TransformedStation = message.value(value_schema)?;
        self.upsert(station);
        Ok(())
    }
}

/// Stream job projecting station rows into a changelog-backed table.
///
/// Every processed row is written to the table and republished to the
/// single-partition changelog topic `<reference>.transformed.v1`, so a
/// restarted job can rebuild the table with [`StationTransformer::restore`]
/// instead of re-reading the reference stream.
pub struct StationTransformer {
    source_topic: String,
    table: StationTable,
    changelog: RecordProducer<StationKey, TransformedStation>,
}

impl StationTransformer {
    /// Provision the changelog topic and open a Kafka producer for it.
    pub async fn connect(
        provisioner: &TopicProvisioner,
        registry: &dyn SchemaRegistry,
        broker: &BrokerSpec,
        topics: &TopicsSpec,
    ) -> Result<Self> {
        let changelog = RecordProducer::connect(
            provisioner,
            registry,
            broker,
            Self::changelog_spec(topics),
            RecordSchema::station_key()?,
            RecordSchema::transformed_station_value()?,
        )
        .await?;
        Ok(Self::new(reference_topic(&topics.prefix), changelog))
    }

    /// Provision the changelog topic and publish through `sink`.
    pub async fn with_sink(
        provisioner: &TopicProvisioner,
        registry: &dyn SchemaRegistry,
        topics: &TopicsSpec,
        sink: Arc<dyn RecordSink>,
    ) -> Result<Self> {
        let changelog = RecordProducer::with_sink(
            provisioner,
            registry,
            Self::changelog_spec(topics),
            RecordSchema::station_key()?,
            RecordSchema::transformed_station_value()?,
            sink,
        )
        .await?;
        Ok(Self::new(reference_topic(&topics.prefix), changelog))
    }

    pub fn new(
        source_topic: impl Into<String>,
        changelog: RecordProducer<StationKey, TransformedStation>,
    ) -> Self {
        Self {
            source_topic: source_topic.into(),
            table: StationTable::new(),
            changelog,
        }
    }

    /// The changelog always has a single partition.
    pub fn changelog_spec(topics: &TopicsSpec) -> TopicSpec {
        TopicSpec::new(transformed_topic(&reference_topic(&topics.prefix)))
            .with_partitions(1)
            .with_replication(topics.replication)
            .with_config(topics.config.clone())
    }

    pub fn source_topic(&self) -> &str {
        &self.source_topic
    }

    pub fn changelog_topic(&self) -> &str {
        self.changelog.topic()
    }

    pub fn table(&self) -> &StationTable {
        &self.table
    }

    /// Project one station row, store it and publish it to the changelog.
    pub fn process(&mut self, station: &Station) -> Result<TransformedStation> {
        let transformed = TransformedStation::from(station);
        let key = StationKey {
            station_id: transformed.station_id,
        };
        self.changelog.produce(&key, &transformed)?;
        debug!(
            station_id = transformed.station_id,
            line = %transformed.line,
            "station transformed"
        );
        self.table.upsert(transformed.clone());
        Ok(transformed)
    }

    /// Rebuild the table from the changelog up to its end when `source`
    /// was opened.
    ///
    /// Empty polls are expected while partitions are being fetched and do not
    /// end the replay. Not catching up within `limit` is a `Broker` error.
    /// Nothing is republished. Returns the number of records applied.
    pub fn restore(
        &mut self,
        source: &mut dyn ReplaySource,
        poll_timeout: Duration,
        limit: Duration,
    ) -> Result<usize> {
        let deadline = Instant::now() + limit;
        let key_schema = self.changelog.key_schema().schema.clone();
        let value_schema = self.changelog.value_schema().schema.clone();
        let mut applied = 0;
        while !source.caught_up()? {
            if Instant::now() >= deadline {
                return Err(TransitError::Broker(format!(
                    "{} not replayed within {:?} ({} records applied)",
                    self.changelog_topic(),
                    limit,
                    applied
                )));
            }
            match source.poll(poll_timeout)? {
                PollOutcome::Empty => {}
                PollOutcome::MessageError(reason) => {
                    warn!(topic = %self.changelog_topic(), "skipping changelog record: {reason}");
                }
                PollOutcome::Message(message) => {
                    self.table
                        .apply_changelog(&message, &key_schema, &value_schema)?;
                    applied += 1;
                }
            }
        }
        info!(
            "Restored {} stations from {} ({} records)",
            self.table.len(),
            self.changelog_topic(),
            applied
        );
        Ok(applied)
    }

    /// Flush the changelog producer.
    pub fn close(&self) -> Result<()> {
        self.changelog.close()
    }
}

impl MessageHandler for StationTransformer {
    fn handle(&mut self, message: &ConsumedMessage) -> Result<()> {
        if message.topic != self.source_topic {
            return Ok(());
        }
        // The connector writes schemaless JSON rows.
        let station: Station = message.json_value()?;
        self.process(&station)?;
        Ok(())
    }
}
