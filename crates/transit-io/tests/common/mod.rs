#![allow(dead_code)]

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use transit_core::{
    ConsumedMessage, MessageSource, PollOutcome, RecordSchema, RecordSink, Result,
    SchemaRegistry, TopicAdmin, TopicSpec, TransitError,
};

/// Broker admin that remembers every request
#[derive(Default)]
pub struct RecordingAdmin {
    pub existing: Mutex<HashSet<String>>,
    pub created: Mutex<Vec<TopicSpec>>,
}

impl RecordingAdmin {
    pub fn create_calls(&self) -> Vec<TopicSpec> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl TopicAdmin for RecordingAdmin {
    async fn topic_exists(&self, name: &str, _timeout: Duration) -> Result<bool> {
        Ok(self.existing.lock().unwrap().contains(name))
    }

    async fn create_topic(&self, spec: &TopicSpec, _timeout: Duration) -> Result<()> {
        self.created.lock().unwrap().push(spec.clone());
        self.existing.lock().unwrap().insert(spec.name.clone());
        Ok(())
    }
}

/// Schema registry handing out ids in registration order
#[derive(Default)]
pub struct MemoryRegistry {
    pub subjects: Mutex<Vec<String>>,
}

impl MemoryRegistry {
    pub fn subjects(&self) -> Vec<String> {
        self.subjects.lock().unwrap().clone()
    }
}

#[async_trait]
impl SchemaRegistry for MemoryRegistry {
    async fn register(&self, subject: &str, _schema: &RecordSchema) -> Result<u32> {
        let mut subjects = self.subjects.lock().unwrap();
        subjects.push(subject.to_string());
        Ok(subjects.len() as u32)
    }
}

/// Registry that refuses every schema
pub struct RejectingRegistry;

#[async_trait]
impl SchemaRegistry for RejectingRegistry {
    async fn register(&self, subject: &str, _schema: &RecordSchema) -> Result<u32> {
        Err(TransitError::Http {
            url: format!("http://registry/subjects/{subject}/versions"),
            status: 409,
            body: "incompatible schema".to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentRecord {
    pub topic: String,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl SentRecord {
    pub fn key_as<T: DeserializeOwned>(&self, schema: &RecordSchema) -> T {
        schema.decode(&self.key).unwrap()
    }

    pub fn value_as<T: DeserializeOwned>(&self, schema: &RecordSchema) -> T {
        schema.decode(&self.value).unwrap()
    }
}

/// Record sink that keeps enqueued records until flushed
#[derive(Default)]
pub struct MemorySink {
    pub pending: Mutex<Vec<SentRecord>>,
    pub delivered: Mutex<Vec<SentRecord>>,
    pub flushes: Mutex<usize>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn pending(&self) -> Vec<SentRecord> {
        self.pending.lock().unwrap().clone()
    }

    pub fn delivered(&self) -> Vec<SentRecord> {
        self.delivered.lock().unwrap().clone()
    }
}

impl RecordSink for MemorySink {
    fn enqueue(&self, topic: &str, key: &[u8], payload: &[u8]) -> Result<()> {
        self.pending.lock().unwrap().push(SentRecord {
            topic: topic.to_string(),
            key: key.to_vec(),
            value: payload.to_vec(),
        });
        Ok(())
    }

    fn flush(&self, _timeout: Duration) -> Result<()> {
        let mut pending = self.pending.lock().unwrap();
        self.delivered.lock().unwrap().extend(pending.drain(..));
        *self.flushes.lock().unwrap() += 1;
        Ok(())
    }
}

/// Message source replaying a script of poll results
pub struct ScriptedSource {
    script: VecDeque<Result<PollOutcome>>,
    pub polls: usize,
    pub closed: Arc<Mutex<bool>>,
}

impl ScriptedSource {
    pub fn new(script: Vec<Result<PollOutcome>>) -> Self {
        Self {
            script: script.into(),
            polls: 0,
            closed: Arc::new(Mutex::new(false)),
        }
    }
}

impl MessageSource for ScriptedSource {
    fn poll(&mut self, _timeout: Duration) -> Result<PollOutcome> {
        self.polls += 1;
        self.script.pop_front().unwrap_or(Ok(PollOutcome::Empty))
    }

    fn close(&mut self) -> Result<()> {
        *self.closed.lock().unwrap() = true;
        Ok(())
    }
}

pub fn message(topic: &str, offset: i64, payload: &[u8]) -> Result<PollOutcome> {
    Ok(PollOutcome::Message(ConsumedMessage {
        topic: topic.to_string(),
        partition: 0,
        offset,
        key: None,
        payload: Some(payload.to_vec()),
        timestamp: None,
    }))
}

/// Value framed the way a producer registered under `schema_id` writes it
pub fn framed<T: Serialize>(schema: RecordSchema, schema_id: u32, value: &T) -> Vec<u8> {
    schema.with_id(schema_id).encode(value).unwrap()
}

pub fn message_error(reason: &str) -> Result<PollOutcome> {
    Ok(PollOutcome::MessageError(reason.to_string()))
}

pub fn empty() -> Result<PollOutcome> {
    Ok(PollOutcome::Empty)
}

pub fn broker_failure(reason: &str) -> Result<PollOutcome> {
    Err(TransitError::Broker(reason.to_string()))
}
