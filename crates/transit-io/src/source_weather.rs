use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;
use std::fmt;
use transit_core::{
    BrokerSpec, RecordSchema, Result, SchemaRegistry, TopicSpec, TopicsSpec, WEATHER_TOPIC,
};

use crate::producer::{MonotonicMillis, RecordProducer, TimestampKey};
use crate::provisioner::TopicProvisioner;
use crate::rest_proxy::RestProxyProducer;

/// Lower clamp of a single temperature step
pub const MIN_STEP: f64 = -20.0;
/// Upper clamp of a single temperature step
pub const MAX_STEP: f64 = 100.0;

const WINTER_MONTHS: [u32; 6] = [0, 1, 2, 3, 10, 11];
const SUMMER_MONTHS: [u32; 3] = [6, 7, 8];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeatherStatus {
    Sunny,
    PartlyCloudy,
    Cloudy,
    Windy,
    Precipitation,
}

impl WeatherStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WeatherStatus::Sunny => "sunny",
            WeatherStatus::PartlyCloudy => "partly_cloudy",
            WeatherStatus::Cloudy => "cloudy",
            WeatherStatus::Windy => "windy",
            WeatherStatus::Precipitation => "precipitation",
        }
    }

    pub const ALL: [WeatherStatus; 5] = [
        WeatherStatus::Sunny,
        WeatherStatus::PartlyCloudy,
        WeatherStatus::Cloudy,
        WeatherStatus::Windy,
        WeatherStatus::Precipitation,
    ];
}

impl fmt::Display for WeatherStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value of a weather update record
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeatherUpdate {
    pub temperature: f64,
    pub status: WeatherStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Season {
    Winter,
    Summer,
    Mild,
}

impl Season {
    /// Season of a zero-based month
    pub fn of_month(month: u32) -> Self {
        if WINTER_MONTHS.contains(&month) {
            Season::Winter
        } else if SUMMER_MONTHS.contains(&month) {
            Season::Summer
        } else {
            Season::Mild
        }
    }

    pub fn initial_temperature(&self) -> f64 {
        match self {
            Season::Winter => 40.0,
            Season::Summer => 85.0,
            Season::Mild => 70.0,
        }
    }

    /// Mode of the triangular step distribution
    pub fn bias(&self) -> f64 {
        match self {
            Season::Winter => -1.0,
            Season::Summer => 1.0,
            Season::Mild => 0.0,
        }
    }
}

/// Inverse CDF of the triangular distribution on `[low, high]` peaking at `mode`.
///
/// `u` is a uniform draw from `[0, 1]`.
pub fn triangular(low: f64, high: f64, mode: f64, u: f64) -> f64 {
    let u = u.clamp(0.0, 1.0);
    let span = high - low;
    if span <= 0.0 {
        return low;
    }
    let cut = (mode - low) / span;
    if u < cut {
        low + (u * span * (mode - low)).sqrt()
    } else {
        high - ((1.0 - u) * span * (high - mode)).sqrt()
    }
}

/// Next temperature given the current one, the seasonal bias and a uniform draw
pub fn next_temperature(current: f64, bias: f64, u: f64) -> f64 {
    current + triangular(-10.0, 10.0, bias, u).clamp(MIN_STEP, MAX_STEP)
}

/// Bounded random walk over temperature and status
pub struct WeatherWalk {
    temperature: f64,
    status: WeatherStatus,
    rng: StdRng,
}

impl WeatherWalk {
    pub fn new(month: u32) -> Self {
        Self::with_rng(month, StdRng::from_entropy())
    }

    pub fn seeded(month: u32, seed: u64) -> Self {
        Self::with_rng(month, StdRng::seed_from_u64(seed))
    }

    fn with_rng(month: u32, rng: StdRng) -> Self {
        Self {
            temperature: Season::of_month(month).initial_temperature(),
            status: WeatherStatus::Sunny,
            rng,
        }
    }

    pub fn current(&self) -> WeatherUpdate {
        WeatherUpdate {
            temperature: self.temperature,
            status: self.status,
        }
    }

    pub fn step(&mut self, month: u32) -> WeatherUpdate {
        let bias = Season::of_month(month).bias();
        self.temperature = next_temperature(self.temperature, bias, self.rng.gen());
        self.status = WeatherStatus::ALL[self.rng.gen_range(0..WeatherStatus::ALL.len())];
        self.current()
    }
}

/// How weather updates reach the broker
pub enum WeatherTransport {
    Broker,
    RestProxy(RestProxyProducer),
}

/// Where a [`Weather`] source writes its readings
pub enum WeatherPublisher {
    Broker(RecordProducer<TimestampKey, WeatherUpdate>),
    RestProxy {
        proxy: RestProxyProducer,
        topic: String,
        key_schema: RecordSchema,
        value_schema: RecordSchema,
    },
}

impl WeatherPublisher {
    /// Provision the weather topic for posting through `proxy`.
    ///
    /// No broker producer is opened; the proxy registers the schemas itself.
    pub async fn rest_proxy(
        provisioner: &TopicProvisioner,
        topics: &TopicsSpec,
        proxy: RestProxyProducer,
    ) -> Result<Self> {
        let spec = Weather::topic_spec(topics);
        provisioner.ensure(&spec).await?;
        Ok(WeatherPublisher::RestProxy {
            proxy,
            topic: spec.name,
            key_schema: RecordSchema::timestamp_key()?,
            value_schema: RecordSchema::weather_value()?,
        })
    }

    pub fn topic(&self) -> &str {
        match self {
            WeatherPublisher::Broker(producer) => producer.topic(),
            WeatherPublisher::RestProxy { topic, .. } => topic,
        }
    }

    async fn publish(&self, key: &TimestampKey, update: &WeatherUpdate) -> Result<()> {
        match self {
            WeatherPublisher::Broker(producer) => producer.produce(key, update),
            WeatherPublisher::RestProxy {
                proxy,
                topic,
                key_schema,
                value_schema,
            } => {
                proxy
                    .post(topic, key_schema, value_schema, key, update)
                    .await
            }
        }
    }

    fn close(&self) -> Result<()> {
        match self {
            WeatherPublisher::Broker(producer) => producer.close(),
            // Every post already completed.
            WeatherPublisher::RestProxy { .. } => Ok(()),
        }
    }
}

/// Synthetic weather station publishing to the shared weather topic
pub struct Weather {
    publisher: WeatherPublisher,
    walk: WeatherWalk,
    clock: MonotonicMillis,
}

impl Weather {
    pub async fn connect(
        month: u32,
        provisioner: &TopicProvisioner,
        registry: &dyn SchemaRegistry,
        broker: &BrokerSpec,
        topics: &TopicsSpec,
        transport: WeatherTransport,
    ) -> Result<Self> {
        let publisher = match transport {
            WeatherTransport::Broker => WeatherPublisher::Broker(
                RecordProducer::connect(
                    provisioner,
                    registry,
                    broker,
                    Self::topic_spec(topics),
                    RecordSchema::timestamp_key()?,
                    RecordSchema::weather_value()?,
                )
                .await?,
            ),
            WeatherTransport::RestProxy(proxy) => {
                WeatherPublisher::rest_proxy(provisioner, topics, proxy).await?
            }
        };
        Ok(Self::new(publisher, WeatherWalk::new(month)))
    }

    pub fn new(publisher: WeatherPublisher, walk: WeatherWalk) -> Self {
        Self {
            publisher,
            walk,
            clock: MonotonicMillis::new(),
        }
    }

    pub fn topic_spec(topics: &TopicsSpec) -> TopicSpec {
        TopicSpec::new(WEATHER_TOPIC)
            .with_partitions(topics.partitions)
            .with_replication(topics.replication)
            .with_config(topics.config.clone())
    }

    /// Advance the walk by one step and publish the new reading.
    pub async fn run(&mut self, month: u32) -> Result<WeatherUpdate> {
        let update = self.walk.step(month);
        let key = TimestampKey {
            timestamp: self.clock.next(),
        };
        self.publisher.publish(&key, &update).await?;
        debug!(
            "sent weather data to kafka, temp: {}, status: {:?}",
            update.temperature, update.status
        );
        Ok(update)
    }

    pub fn current(&self) -> WeatherUpdate {
        self.walk.current()
    }

    pub fn topic(&self) -> &str {
        self.publisher.topic()
    }

    pub fn close(&self) -> Result<()> {
        self.publisher.close()
    }
}
