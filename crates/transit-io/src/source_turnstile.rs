use chrono::{DateTime, Timelike, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use transit_core::{
    turnstile_topic, BrokerSpec, Line, RecordSchema, Result, SchemaRegistry, StationSpec, TopicSpec,
    TopicsSpec,
};

use crate::producer::{MonotonicMillis, RecordProducer, TimestampKey};
use crate::provisioner::TopicProvisioner;

/// Value of a turnstile entry record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnstileEntry {
    pub station_id: i64,
    pub station_name: String,
    pub line: Line,
}

/// Number of riders passing a turnstile during one simulated time step
pub trait EntryRate: Send {
    fn entries(&mut self, at: DateTime<Utc>, time_step: Duration) -> u32;
}

// Share of a day's riders entering during each hour.
const HOURLY_SHARE: [f64; 24] = [
    0.005, 0.003, 0.002, 0.002, 0.004, 0.015, 0.045, 0.090, 0.095, 0.060, 0.045, 0.045,
    0.050, 0.050, 0.050, 0.060, 0.085, 0.095, 0.070, 0.045, 0.030, 0.025, 0.020, 0.009,
];

/// Default ridership model: a daily total spread over a commuter-shaped
/// hourly curve, with up to 20% random jitter per step.
pub struct HourlyRidership {
    daily_entries: u32,
    rng: StdRng,
}

impl HourlyRidership {
    pub fn new(daily_entries: u32) -> Self {
        Self {
            daily_entries,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(daily_entries: u32, seed: u64) -> Self {
        Self {
            daily_entries,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Entries expected during `time_step` starting at `at`, before jitter
    pub fn expected(&self, at: DateTime<Utc>, time_step: Duration) -> f64 {
        let share = HOURLY_SHARE[at.hour() as usize];
        self.daily_entries as f64 * share * time_step.as_secs_f64() / 3600.0
    }
}

impl EntryRate for HourlyRidership {
    fn entries(&mut self, at: DateTime<Utc>, time_step: Duration) -> u32 {
        let jitter = self.rng.gen_range(0.8..=1.2);
        (self.expected(at, time_step) * jitter).round().max(0.0) as u32
    }
}

/// Synthetic turnstile at one station, publishing to its own topic
pub struct Turnstile {
    station: StationSpec,
    producer: RecordProducer<TimestampKey, TurnstileEntry>,
    rate: Box<dyn EntryRate>,
    clock: MonotonicMillis,
}

impl Turnstile {
    /// Provision the station topic, register its schemas and connect a
    /// producer to it.
    pub async fn connect(
        station: StationSpec,
        provisioner: &TopicProvisioner,
        registry: &dyn SchemaRegistry,
        broker: &BrokerSpec,
        topics: &TopicsSpec,
        rate: Box<dyn EntryRate>,
    ) -> Result<Self> {
        let producer = RecordProducer::connect(
            provisioner,
            registry,
            broker,
            Self::topic_spec(&station, topics),
            RecordSchema::timestamp_key()?,
            RecordSchema::turnstile_value()?,
        )
        .await?;
        Ok(Self::new(station, producer, rate))
    }

    pub fn new(
        station: StationSpec,
        producer: RecordProducer<TimestampKey, TurnstileEntry>,
        rate: Box<dyn EntryRate>,
    ) -> Self {
        Self {
            station,
            producer,
            rate,
            clock: MonotonicMillis::new(),
        }
    }

    pub fn topic_spec(station: &StationSpec, topics: &TopicsSpec) -> TopicSpec {
        TopicSpec::new(turnstile_topic(&station.name))
            .with_partitions(topics.partitions)
            .with_replication(topics.replication)
            .with_config(topics.config.clone())
    }

    /// Emit one record per rider entering during this time step.
    pub fn run(&mut self, at: DateTime<Utc>, time_step: Duration) -> Result<u32> {
        let count = self.rate.entries(at, time_step);
        let entry = TurnstileEntry {
            station_id: self.station.station_id,
            station_name: self.station.name.clone(),
            line: self.station.line,
        };
        for _ in 0..count {
            let key = TimestampKey {
                timestamp: self.clock.next(),
            };
            self.producer.produce(&key, &entry)?;
        }
        debug!(station = %self.station.name, entries = count, "turnstile step");
        Ok(count)
    }

    pub fn station(&self) -> &StationSpec {
        &self.station
    }

    pub fn topic(&self) -> &str {
        self.producer.topic()
    }

    pub fn close(&self) -> Result<()> {
        self.producer.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_expected_follows_hourly_curve() {
        let model = HourlyRidership::seeded(10_000, 1);
        let rush = Utc.with_ymd_and_hms(2024, 3, 4, 8, 0, 0).unwrap();
        let night = Utc.with_ymd_and_hms(2024, 3, 4, 3, 0, 0).unwrap();
        let step = Duration::from_secs(3600);
        assert!((model.expected(rush, step) - 950.0).abs() < 1e-9);
        assert!(model.expected(night, step) < model.expected(rush, step));
    }

    #[test]
    fn test_entries_stay_within_jitter_band() {
        let mut model = HourlyRidership::seeded(10_000, 7);
        let at = Utc.with_ymd_and_hms(2024, 3, 4, 17, 0, 0).unwrap();
        let step = Duration::from_secs(600);
        let expected = model.expected(at, step);
        for _ in 0..100 {
            let n = model.entries(at, step) as f64;
            assert!(n >= (expected * 0.8).floor() && n <= (expected * 1.2).ceil());
        }
    }

    #[test]
    fn test_hourly_share_sums_to_one_day() {
        let total: f64 = HOURLY_SHARE.iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
    }
}
