use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use transit_core::{
    ConsumedMessage, MessageHandler, MessageSource, PollOutcome, RecordSchema, RecordSink,
    ReplaySource, Result, SchemaRegistry, TopicAdmin, TopicSpec, TopicsSpec, TransitError,
};
use transit_io::TopicProvisioner;
use transit_tx::{Station, StationTransformer, NO_LINE};

#[derive(Default)]
struct CountingAdmin {
    created: Mutex<Vec<TopicSpec>>,
}

#[async_trait]
impl TopicAdmin for CountingAdmin {
    async fn topic_exists(&self, name: &str, _timeout: Duration) -> Result<bool> {
        Ok(self.created.lock().unwrap().iter().any(|t| t.name == name))
    }

    async fn create_topic(&self, spec: &TopicSpec, _timeout: Duration) -> Result<()> {
        self.created.lock().unwrap().push(spec.clone());
        Ok(())
    }
}

/// Keeps every enqueued record as a consumable changelog message
#[derive(Default)]
struct ChangelogSink {
    records: Mutex<Vec<ConsumedMessage>>,
}

impl RecordSink for ChangelogSink {
    fn enqueue(&self, topic: &str, key: &[u8], payload: &[u8]) -> Result<()> {
        let mut records = self.records.lock().unwrap();
        let offset = records.len() as i64;
        records.push(ConsumedMessage {
            topic: topic.to_string(),
            partition: 0,
            offset,
            key: Some(key.to_vec()),
            payload: Some(payload.to_vec()),
            timestamp: None,
        });
        Ok(())
    }

    fn flush(&self, _timeout: Duration) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct MemoryRegistry {
    subjects: Mutex<Vec<String>>,
}

#[async_trait]
impl SchemaRegistry for MemoryRegistry {
    async fn register(&self, subject: &str, _schema: &RecordSchema) -> Result<u32> {
        let mut subjects = self.subjects.lock().unwrap();
        subjects.push(subject.to_string());
        Ok(subjects.len() as u32)
    }
}

/// Scripted changelog that is caught up once no record is left to read
struct Replay(VecDeque<Result<PollOutcome>>);

impl MessageSource for Replay {
    fn poll(&mut self, _timeout: Duration) -> Result<PollOutcome> {
        self.0.pop_front().unwrap_or(Ok(PollOutcome::Empty))
    }
}

impl ReplaySource for Replay {
    fn caught_up(&mut self) -> Result<bool> {
        Ok(!self.0.iter().any(|outcome| {
            matches!(
                outcome,
                Ok(PollOutcome::Message(_)) | Ok(PollOutcome::MessageError(_)) | Err(_)
            )
        }))
    }
}

/// A changelog whose end is never reached
struct Stalled;

impl MessageSource for Stalled {
    fn poll(&mut self, _timeout: Duration) -> Result<PollOutcome> {
        Ok(PollOutcome::Empty)
    }
}

impl ReplaySource for Stalled {
    fn caught_up(&mut self) -> Result<bool> {
        Ok(false)
    }
}

const POLL: Duration = Duration::from_millis(100);
const LIMIT: Duration = Duration::from_secs(5);

fn station(station_id: i64, name: &str, red: bool, blue: bool, green: bool) -> Station {
    Station {
        stop_id: station_id - 10_000,
        direction_id: "N".to_string(),
        stop_name: name.to_string(),
        station_name: name.to_string(),
        station_descriptive_name: name.to_string(),
        station_id,
        order: 1,
        red,
        blue,
        green,
    }
}

fn reference_message(station: &Station) -> ConsumedMessage {
    ConsumedMessage {
        topic: "org.chicago.cta.information.stations".to_string(),
        payload: Some(serde_json::to_vec(station).unwrap()),
        ..Default::default()
    }
}

async fn transformer() -> (Arc<CountingAdmin>, Arc<ChangelogSink>, StationTransformer) {
    let admin = Arc::new(CountingAdmin::default());
    let provisioner = TopicProvisioner::new(admin.clone(), Duration::from_secs(1));
    let sink = Arc::new(ChangelogSink::default());
    let transformer = StationTransformer::with_sink(
        &provisioner,
        &MemoryRegistry::default(),
        &TopicsSpec::default(),
        sink.clone(),
    )
    .await
    .unwrap();
    (admin, sink, transformer)
}

fn changelog_script(sink: &ChangelogSink) -> VecDeque<Result<PollOutcome>> {
    sink.records
        .lock()
        .unwrap()
        .iter()
        .cloned()
        .map(|m| Ok(PollOutcome::Message(m)))
        .collect()
}

#[tokio::test]
async fn test_changelog_topic_is_provisioned_with_one_partition() {
    let (admin, _sink, transformer) = transformer().await;
    let created = admin.created.lock().unwrap().clone();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].name, transformer.changelog_topic());
    assert_eq!(created[0].partitions, 1);
    assert_eq!(transformer.source_topic(), "org.chicago.cta.information.stations");
}

#[tokio::test]
async fn test_reference_rows_update_table_and_changelog() {
    let (_admin, sink, mut transformer) = transformer().await;

    transformer
        .handle(&reference_message(&station(40380, "Clark/Lake", false, true, false)))
        .unwrap();
    transformer
        .handle(&reference_message(&station(40900, "Howard", false, false, false)))
        .unwrap();
    // A later row for the same station supersedes the first one.
    transformer
        .handle(&reference_message(&station(40380, "Clark/Lake", true, false, false)))
        .unwrap();

    let table = transformer.table();
    assert_eq!(table.len(), 2);
    assert_eq!(table.get(40380).unwrap().line, "red");
    assert_eq!(table.get(40900).unwrap().line, NO_LINE);
    assert_eq!(sink.records.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn test_messages_from_other_topics_are_ignored() {
    let (_admin, sink, mut transformer) = transformer().await;
    let mut message = reference_message(&station(40380, "Clark/Lake", false, true, false));
    message.topic = "weather.update.v1".to_string();

    transformer.handle(&message).unwrap();
    assert!(transformer.table().is_empty());
    assert!(sink.records.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_undecodable_reference_row_is_fatal() {
    let (_admin, _sink, mut transformer) = transformer().await;
    let message = ConsumedMessage {
        topic: "org.chicago.cta.information.stations".to_string(),
        payload: Some(b"{\"station_id\": 1}".to_vec()),
        ..Default::default()
    };
    let err = transformer.handle(&message).unwrap_err();
    assert!(matches!(err, TransitError::Deserialization(_)));
}

#[tokio::test]
async fn test_restarted_job_restores_table_from_changelog() {
    let (_admin, sink, mut first) = transformer().await;
    for s in [
        station(40380, "Clark/Lake", false, true, false),
        station(41400, "Roosevelt", false, false, true),
        station(40380, "Clark/Lake", false, false, true),
    ] {
        first.process(&s).unwrap();
    }
    let expected = first.table().clone();
    first.close().unwrap();

    let (_admin2, restored_sink, mut second) = transformer().await;
    let mut script = changelog_script(&sink);
    script.insert(1, Ok(PollOutcome::MessageError("Broker: corrupt message".to_string())));
    let mut replay = Replay(script);

    let applied = second.restore(&mut replay, POLL, LIMIT).unwrap();
    assert_eq!(applied, 3);
    assert_eq!(second.table(), &expected);
    assert_eq!(second.table().get(40380).unwrap().line, "green");
    // Restoring never republishes.
    assert!(restored_sink.records.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_restore_stops_on_broker_failure() {
    let (_admin, _sink, mut transformer) = transformer().await;
    let mut replay = Replay(VecDeque::from(vec![Err(TransitError::Broker(
        "transport failure".to_string(),
    ))]));
    assert!(transformer.restore(&mut replay, POLL, LIMIT).is_err());
}

#[tokio::test]
async fn test_restore_keeps_polling_past_empty_polls() {
    let (_admin, sink, mut first) = transformer().await;
    first
        .process(&station(40380, "Clark/Lake", false, true, false))
        .unwrap();
    first
        .process(&station(41400, "Roosevelt", false, false, true))
        .unwrap();

    let (_admin2, _sink2, mut second) = transformer().await;
    // A fresh group sees nothing until its partitions are assigned.
    let mut script = changelog_script(&sink);
    script.push_front(Ok(PollOutcome::Empty));
    script.insert(2, Ok(PollOutcome::Empty));
    let mut replay = Replay(script);

    let applied = second.restore(&mut replay, POLL, LIMIT).unwrap();
    assert_eq!(applied, 2);
    assert_eq!(second.table().len(), 2);
    assert_eq!(second.table().get(41400).unwrap().line, "green");
}

#[tokio::test]
async fn test_restore_of_empty_changelog_applies_nothing() {
    let (_admin, _sink, mut transformer) = transformer().await;
    let mut replay = Replay(VecDeque::new());
    assert_eq!(transformer.restore(&mut replay, POLL, LIMIT).unwrap(), 0);
    assert!(transformer.table().is_empty());
}

#[tokio::test]
async fn test_restore_gives_up_after_limit() {
    let (_admin, _sink, mut transformer) = transformer().await;
    let err = transformer
        .restore(&mut Stalled, POLL, Duration::from_millis(20))
        .unwrap_err();
    assert!(matches!(err, TransitError::Broker(_)));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_changelog_schemas_are_registered() {
    let admin = Arc::new(CountingAdmin::default());
    let provisioner = TopicProvisioner::new(admin, Duration::from_secs(1));
    let registry = MemoryRegistry::default();
    StationTransformer::with_sink(
        &provisioner,
        &registry,
        &TopicsSpec::default(),
        Arc::new(ChangelogSink::default()),
    )
    .await
    .unwrap();
    assert_eq!(
        *registry.subjects.lock().unwrap(),
        vec![
            "org.chicago.cta.information.stations.transformed.v1-key".to_string(),
            "org.chicago.cta.information.stations.transformed.v1-value".to_string(),
        ]
    );
}
