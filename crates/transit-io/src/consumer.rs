use rdkafka::consumer::{BaseConsumer, Consumer, ConsumerContext};
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::message::BorrowedMessage;
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use rdkafka::types::RDKafkaRespErr;
use rdkafka::{ClientConfig, ClientContext, Message as KafkaMessage};

use std::convert::Infallible;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, error, info};
use transit_core::{
    BrokerSpec, ConsumedMessage, ConsumerSpec, MessageHandler, MessageSource, OffsetPolicy,
    PartitionAssignment, PartitionEnd, PollOutcome, ReplaySource, Result, StartOffset,
    TransitError,
};

/// Where a [`PollingConsumer`] is in its drain/wait cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Idle,
    Draining,
    Waiting,
    Closed,
}

/// What one drain phase did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainReport {
    /// Messages handed to the handler
    pub delivered: usize,
    /// Messages dropped because the broker attached an error
    pub discarded: usize,
}

enum Polled {
    Delivered,
    Discarded,
    Empty,
}

/// Drives a [`MessageHandler`] over a subscription.
///
/// Alternates between draining (poll with a short timeout until a poll comes
/// back empty) and waiting (sleep for the configured interval). The sleep is
/// the only suspension point; polls themselves block for at most the poll
/// timeout.
pub struct PollingConsumer<S, H> {
    pattern: String,
    source: S,
    handler: H,
    consume_timeout: Duration,
    sleep_interval: Duration,
    state: ConsumerState,
}

impl<H: MessageHandler> PollingConsumer<KafkaMessageSource, H> {
    /// Subscribe to `pattern` on the broker.
    ///
    /// Patterns starting with `^` are matched as regular expressions.
    pub fn subscribe(
        broker: &BrokerSpec,
        settings: &ConsumerSpec,
        pattern: &str,
        handler: H,
    ) -> Result<Self> {
        let policy = OffsetPolicy::from_earliest_flag(settings.offset_earliest);
        let source = KafkaMessageSource::subscribe(broker, pattern, policy)?;
        Ok(Self::new(pattern, source, handler, settings))
    }
}

impl<S: MessageSource, H: MessageHandler> PollingConsumer<S, H> {
    pub fn new(pattern: &str, source: S, handler: H, settings: &ConsumerSpec) -> Self {
        Self {
            pattern: pattern.to_string(),
            source,
            handler,
            consume_timeout: settings.consume_timeout(),
            sleep_interval: settings.sleep_interval(),
            state: ConsumerState::Idle,
        }
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn sleep_interval(&self) -> Duration {
        self.sleep_interval
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Poll until a poll yields nothing.
    ///
    /// Messages carrying a broker error are logged and skipped without ending
    /// the phase. A client failure or a handler error is fatal and returned.
    pub fn drain(&mut self) -> Result<DrainReport> {
        self.state = ConsumerState::Draining;
        let mut report = DrainReport::default();
        loop {
            match self.poll_once()? {
                Polled::Delivered => report.delivered += 1,
                Polled::Discarded => report.discarded += 1,
                Polled::Empty => break,
            }
        }
        if report.delivered > 0 || report.discarded > 0 {
            debug!(
                topic = %self.pattern,
                delivered = report.delivered,
                discarded = report.discarded,
                "drain phase finished"
            );
        }
        Ok(report)
    }

    /// Suspend for the sleep interval.
    pub async fn wait(&mut self) {
        self.state = ConsumerState::Waiting;
        tokio::time::sleep(self.sleep_interval).await;
    }

    /// Drain, wait, repeat.
    ///
    /// Only returns on a fatal error; the host is expected to log it and exit.
    pub async fn consume(&mut self) -> Result<Infallible> {
        loop {
            self.drain()?;
            self.wait().await;
        }
    }

    fn poll_once(&mut self) -> Result<Polled> {
        match self.source.poll(self.consume_timeout) {
            Ok(PollOutcome::Empty) => Ok(Polled::Empty),
            Ok(PollOutcome::MessageError(reason)) => {
                error!(
                    "Error occurred on consumer for topic \"{}\": {}",
                    self.pattern, reason
                );
                Ok(Polled::Discarded)
            }
            Ok(PollOutcome::Message(message)) => {
                if let Err(e) = self.handler.handle(&message) {
                    error!(
                        partition = message.partition,
                        offset = message.offset,
                        "Fatal error while handling message for topic \"{}\": {}",
                        self.pattern,
                        e
                    );
                    return Err(e);
                }
                Ok(Polled::Delivered)
            }
            Err(e) => {
                error!(
                    "Fatal error occurred during poll for topic \"{}\": {}",
                    self.pattern, e
                );
                Err(e)
            }
        }
    }

    /// Release the subscription.
    pub fn close(mut self) -> Result<()> {
        self.source.close()?;
        self.state = ConsumerState::Closed;
        info!("Closed consumer for topic \"{}\"", self.pattern);
        Ok(())
    }
}

/// Apply the offset policy to a fresh assignment, then confirm it.
///
/// `confirm` always runs, and always after every start offset has been
/// rewritten.
pub fn confirm_assignment<F>(
    policy: OffsetPolicy,
    partitions: &mut [PartitionAssignment],
    confirm: F,
) -> Result<()>
where
    F: FnOnce(&[PartitionAssignment]) -> Result<()>,
{
    policy.apply(partitions);
    confirm(partitions)
}

/// Consumer context that owns the rebalance callback
///
/// librdkafka gives the callback no way to report an error, so a failed
/// assignment is parked here and handed back by the next poll.
pub struct AssignmentContext {
    pattern: String,
    policy: OffsetPolicy,
    failure: Mutex<Option<String>>,
}

impl AssignmentContext {
    pub fn new(pattern: &str, policy: OffsetPolicy) -> Self {
        Self {
            pattern: pattern.to_string(),
            policy,
            failure: Mutex::new(None),
        }
    }

    /// Apply the policy to a fresh assignment and confirm it, recording a
    /// failure instead of dropping it.
    pub fn settle<F>(&self, partitions: &mut [PartitionAssignment], confirm: F)
    where
        F: FnOnce(&[PartitionAssignment]) -> Result<()>,
    {
        match confirm_assignment(self.policy, partitions, confirm) {
            Ok(()) => info!(
                partitions = partitions.len(),
                "partitions assigned for {}", self.pattern
            ),
            Err(e) => {
                error!("Failed to assign partitions for {}: {}", self.pattern, e);
                self.record_failure(format!("partition assignment failed: {e}"));
            }
        }
    }

    fn record_failure(&self, reason: String) {
        if let Ok(mut failure) = self.failure.lock() {
            failure.get_or_insert(reason);
        }
    }

    /// Turn a recorded assignment failure into a fatal error, once.
    pub fn check(&self) -> Result<()> {
        let reason = match self.failure.lock() {
            Ok(mut failure) => failure.take(),
            Err(_) => Some("assignment state poisoned".to_string()),
        };
        match reason {
            Some(reason) => Err(TransitError::Broker(format!("{}: {reason}", self.pattern))),
            None => Ok(()),
        }
    }
}

impl ClientContext for AssignmentContext {}

impl ConsumerContext for AssignmentContext {
    fn rebalance(
        &self,
        base_consumer: &BaseConsumer<Self>,
        err: RDKafkaRespErr,
        tpl: &mut TopicPartitionList,
    ) {
        match err {
            RDKafkaRespErr::RD_KAFKA_RESP_ERR__ASSIGN_PARTITIONS => {
                let mut partitions: Vec<PartitionAssignment> = tpl
                    .elements()
                    .iter()
                    .map(|e| PartitionAssignment::new(e.topic(), e.partition()))
                    .collect();
                self.settle(&mut partitions, |assigned| {
                    let list = to_partition_list(assigned)?;
                    base_consumer
                        .assign(&list)
                        .map_err(|e| TransitError::Broker(format!("assign failed: {e}")))
                });
            }
            RDKafkaRespErr::RD_KAFKA_RESP_ERR__REVOKE_PARTITIONS => {
                if let Err(e) = base_consumer.unassign() {
                    error!("Failed to revoke partitions for {}: {}", self.pattern, e);
                    self.record_failure(format!("revoking partitions failed: {e}"));
                }
                info!("partitions revoked for {}", self.pattern);
            }
            other => {
                error!("Rebalance error for {}: {:?}", self.pattern, other);
                if let Err(e) = base_consumer.unassign() {
                    self.record_failure(format!("unassign after {other:?} failed: {e}"));
                }
            }
        }
    }
}

fn to_partition_list(partitions: &[PartitionAssignment]) -> Result<TopicPartitionList> {
    let mut list = TopicPartitionList::with_capacity(partitions.len());
    for p in partitions {
        let offset = match p.start {
            StartOffset::Earliest => Offset::Beginning,
            StartOffset::Stored => Offset::Invalid,
        };
        list.add_partition_offset(&p.topic, p.partition, offset)
            .map_err(|e| TransitError::Broker(e.to_string()))?;
    }
    Ok(list)
}

/// [`MessageSource`] over an rdkafka `BaseConsumer`
pub struct KafkaMessageSource {
    consumer: BaseConsumer<AssignmentContext>,
    closed: bool,
}

impl KafkaMessageSource {
    /// Join the configured consumer group and subscribe to `pattern`.
    pub fn subscribe(broker: &BrokerSpec, pattern: &str, policy: OffsetPolicy) -> Result<Self> {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &broker.bootstrap_servers)
            .set("group.id", &broker.group_id)
            .set("enable.partition.eof", "false");
        if policy == OffsetPolicy::Earliest {
            config.set("auto.offset.reset", "earliest");
        }
        let consumer: BaseConsumer<AssignmentContext> = config
            .create_with_context(AssignmentContext::new(pattern, policy))
            .map_err(|e| TransitError::Broker(format!("failed to create consumer: {e}")))?;
        consumer
            .subscribe(&[pattern])
            .map_err(|e| TransitError::Broker(format!("failed to subscribe to {pattern}: {e}")))?;
        Ok(Self {
            consumer,
            closed: false,
        })
    }
}

impl MessageSource for KafkaMessageSource {
    fn poll(&mut self, timeout: Duration) -> Result<PollOutcome> {
        let polled = self.consumer.poll(timeout);
        // The rebalance callback runs inside poll.
        self.consumer.context().check()?;
        to_outcome(polled)
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.consumer.unsubscribe();
            self.closed = true;
        }
        Ok(())
    }
}

/// Reads a topic from its beginning up to the end it had when opened.
///
/// Partitions are assigned directly rather than through a group, so no
/// rebalance delays the first fetch and nothing is committed.
pub struct KafkaReplaySource {
    consumer: BaseConsumer,
    topic: String,
    ends: Vec<PartitionEnd>,
}

impl KafkaReplaySource {
    pub fn open(broker: &BrokerSpec, topic: &str) -> Result<Self> {
        let timeout = broker.client_timeout();
        let consumer: BaseConsumer = ClientConfig::new()
            .set("bootstrap.servers", &broker.bootstrap_servers)
            .set("group.id", format!("{}-replay", broker.group_id))
            .set("enable.auto.commit", "false")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| TransitError::Broker(format!("failed to create consumer: {e}")))?;

        let metadata = consumer
            .fetch_metadata(Some(topic), timeout)
            .map_err(|e| TransitError::Metadata(e.to_string()))?;
        let partitions: Vec<i32> = metadata
            .topics()
            .iter()
            .filter(|t| t.name() == topic)
            .flat_map(|t| t.partitions().iter().map(|p| p.id()))
            .collect();
        if partitions.is_empty() {
            return Err(TransitError::Metadata(format!(
                "topic \"{topic}\" has no partitions"
            )));
        }

        let mut list = TopicPartitionList::with_capacity(partitions.len());
        let mut ends = Vec::with_capacity(partitions.len());
        for partition in partitions {
            let (low, high) = consumer
                .fetch_watermarks(topic, partition, timeout)
                .map_err(|e| TransitError::Metadata(e.to_string()))?;
            list.add_partition_offset(topic, partition, Offset::Beginning)
                .map_err(|e| TransitError::Broker(e.to_string()))?;
            ends.push(PartitionEnd {
                partition,
                low,
                high,
            });
        }
        consumer
            .assign(&list)
            .map_err(|e| TransitError::Broker(format!("assign failed: {e}")))?;
        debug!(topic, ?ends, "replay opened");

        Ok(Self {
            consumer,
            topic: topic.to_string(),
            ends,
        })
    }

    pub fn ends(&self) -> &[PartitionEnd] {
        &self.ends
    }
}

impl MessageSource for KafkaReplaySource {
    fn poll(&mut self, timeout: Duration) -> Result<PollOutcome> {
        to_outcome(self.consumer.poll(timeout))
    }

    fn close(&mut self) -> Result<()> {
        self.consumer
            .unassign()
            .map_err(|e| TransitError::Broker(format!("unassign failed: {e}")))
    }
}

impl ReplaySource for KafkaReplaySource {
    fn caught_up(&mut self) -> Result<bool> {
        let positions = self
            .consumer
            .position()
            .map_err(|e| TransitError::Broker(format!("position lookup failed: {e}")))?;
        Ok(self.ends.iter().all(|end| {
            let next = positions
                .find_partition(&self.topic, end.partition)
                .and_then(|elem| match elem.offset() {
                    Offset::Offset(next) => Some(next),
                    _ => None,
                });
            end.reached_by(next)
        }))
    }
}

fn to_outcome(polled: Option<KafkaResult<BorrowedMessage<'_>>>) -> Result<PollOutcome> {
    match polled {
        None => Ok(PollOutcome::Empty),
        Some(Ok(m)) => Ok(PollOutcome::Message(to_consumed(&m))),
        Some(Err(KafkaError::MessageConsumption(code))) => {
            Ok(PollOutcome::MessageError(code.to_string()))
        }
        Some(Err(KafkaError::PartitionEOF(partition))) => Ok(PollOutcome::MessageError(
            format!("end of partition {partition}"),
        )),
        Some(Err(e)) => Err(TransitError::Broker(e.to_string())),
    }
}

fn to_consumed(m: &BorrowedMessage) -> ConsumedMessage {
    ConsumedMessage {
        topic: m.topic().to_string(),
        partition: m.partition(),
        offset: m.offset(),
        key: m.key().map(<[u8]>::to_vec),
        payload: m.payload().map(<[u8]>::to_vec),
        timestamp: m.timestamp().to_millis(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirm_sees_overridden_offsets() {
        let mut partitions = vec![
            PartitionAssignment::new("station.a", 0),
            PartitionAssignment::new("station.b", 0),
        ];
        let mut confirmed = Vec::new();
        confirm_assignment(OffsetPolicy::Earliest, &mut partitions, |assigned| {
            confirmed.extend_from_slice(assigned);
            Ok(())
        })
        .unwrap();
        assert_eq!(confirmed.len(), 2);
        assert!(confirmed.iter().all(|p| p.start == StartOffset::Earliest));
    }

    #[test]
    fn test_confirm_runs_without_override() {
        let mut partitions = vec![PartitionAssignment::new("station.a", 3)];
        let mut calls = 0;
        confirm_assignment(OffsetPolicy::BrokerDefault, &mut partitions, |assigned| {
            calls += 1;
            assert_eq!(assigned[0].start, StartOffset::Stored);
            Ok(())
        })
        .unwrap();
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_failed_assignment_surfaces_once_as_broker_error() {
        let context = AssignmentContext::new("^station.*", OffsetPolicy::Earliest);
        let mut partitions = vec![PartitionAssignment::new("station.a", 0)];
        context.settle(&mut partitions, |_| {
            Err(TransitError::Broker("assign failed: Local: Erroneous state".into()))
        });

        let err = context.check().unwrap_err();
        assert!(matches!(err, TransitError::Broker(_)));
        assert!(err.is_fatal());
        assert!(err.to_string().contains("^station.*"));
        assert!(context.check().is_ok());
    }

    #[test]
    fn test_successful_assignment_records_nothing() {
        let context = AssignmentContext::new("t", OffsetPolicy::BrokerDefault);
        let mut partitions = vec![PartitionAssignment::new("t", 0)];
        context.settle(&mut partitions, |_| Ok(()));
        assert!(context.check().is_ok());
    }

    #[test]
    fn test_first_failure_is_kept() {
        let context = AssignmentContext::new("t", OffsetPolicy::BrokerDefault);
        context.record_failure("first".into());
        context.record_failure("second".into());
        assert!(context.check().unwrap_err().to_string().contains("first"));
    }

    #[test]
    fn test_partition_list_offsets() {
        let mut partitions = vec![
            PartitionAssignment::new("t", 0),
            PartitionAssignment::new("t", 1),
        ];
        partitions[1].start = StartOffset::Earliest;
        let list = to_partition_list(&partitions).unwrap();
        let elements = list.elements();
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].offset(), Offset::Invalid);
        assert_eq!(elements[1].offset(), Offset::Beginning);
    }
}
