use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::ClientConfig;

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use transit_core::{BrokerSpec, Result, TopicAdmin, TopicSpec, TransitError};

/// Idempotent topic creation shared by every producer in a process.
///
/// The set of provisioned names is the only state shared between producers.
/// It sits behind an async mutex that is held for the whole check-and-create
/// sequence, so concurrent `ensure` calls for one name issue a single
/// creation request.
pub struct TopicProvisioner {
    admin: Arc<dyn TopicAdmin>,
    timeout: Duration,
    provisioned: Mutex<HashSet<String>>,
}

impl TopicProvisioner {
    pub fn new(admin: Arc<dyn TopicAdmin>, timeout: Duration) -> Self {
        Self {
            admin,
            timeout,
            provisioned: Mutex::new(HashSet::new()),
        }
    }

    /// Provisioner backed by a Kafka admin client
    pub fn connect(broker: &BrokerSpec) -> Result<Self> {
        let admin = KafkaTopicAdmin::new(broker)?;
        Ok(Self::new(Arc::new(admin), broker.client_timeout()))
    }

    /// Make sure `spec.name` exists on the broker.
    ///
    /// The first call for a name checks broker metadata and creates the topic
    /// when it is missing; later calls return immediately. Any failure is
    /// logged and returned, and the name stays unprovisioned.
    pub async fn ensure(&self, spec: &TopicSpec) -> Result<()> {
        let mut provisioned = self.provisioned.lock().await;
        if provisioned.contains(&spec.name) {
            debug!(topic = %spec.name, "topic already provisioned");
            return Ok(());
        }

        let exists = self
            .admin
            .topic_exists(&spec.name, self.timeout)
            .await
            .map_err(|e| {
                error!(topic = %spec.name, error = %e, "Failed to fetch topic metadata");
                e
            })?;

        if exists {
            info!("Existing topic \"{}\" found.", spec.name);
        } else {
            warn!("Topic \"{}\" not present yet.", spec.name);
            if let Err(e) = self.admin.create_topic(spec, self.timeout).await {
                error!("Failed to create topic \"{}\": {}", spec.name, e);
                return Err(e);
            }
            warn!(
                partitions = spec.partitions,
                replication = spec.replication,
                "Created topic \"{}\".",
                spec.name
            );
        }

        provisioned.insert(spec.name.clone());
        Ok(())
    }

    pub async fn is_provisioned(&self, name: &str) -> bool {
        self.provisioned.lock().await.contains(name)
    }
}

/// [`TopicAdmin`] over the librdkafka admin API
pub struct KafkaTopicAdmin {
    client: Arc<AdminClient<DefaultClientContext>>,
}

impl KafkaTopicAdmin {
    pub fn new(broker: &BrokerSpec) -> Result<Self> {
        let client: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", &broker.bootstrap_servers)
            .create()
            .map_err(|e| TransitError::Broker(format!("failed to create admin client: {e}")))?;
        Ok(Self {
            client: Arc::new(client),
        })
    }
}

/// Run a blocking librdkafka call on the blocking pool.
pub(crate) async fn off_runtime<T, F>(call: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(call)
        .await
        .map_err(|e| TransitError::Metadata(format!("metadata lookup aborted: {e}")))?
}

#[async_trait]
impl TopicAdmin for KafkaTopicAdmin {
    async fn topic_exists(&self, name: &str, timeout: Duration) -> Result<bool> {
        let client = Arc::clone(&self.client);
        let name = name.to_string();
        off_runtime(move || {
            // Listing all topics avoids triggering broker-side auto creation.
            let metadata = client
                .inner()
                .fetch_metadata(None, timeout)
                .map_err(|e| TransitError::Metadata(e.to_string()))?;
            Ok(metadata.topics().iter().any(|t| t.name() == name))
        })
        .await
    }

    async fn create_topic(&self, spec: &TopicSpec, timeout: Duration) -> Result<()> {
        let entries = spec.config.entries();
        let mut new_topic = NewTopic::new(
            &spec.name,
            spec.partitions,
            TopicReplication::Fixed(spec.replication),
        );
        for (key, value) in &entries {
            new_topic = new_topic.set(key, value);
        }
        let options = AdminOptions::new().operation_timeout(Some(timeout));

        let creation_failed = |reason: String| TransitError::TopicCreation {
            topic: spec.name.clone(),
            reason,
        };

        let results = tokio::time::timeout(timeout, self.client.create_topics(&[new_topic], &options))
            .await
            .map_err(|_| creation_failed(format!("no response within {timeout:?}")))?
            .map_err(|e| creation_failed(e.to_string()))?;

        for result in results {
            match result {
                Ok(_) => {}
                // Created by another process between the metadata check and now.
                Err((_, RDKafkaErrorCode::TopicAlreadyExists)) => {}
                Err((_, code)) => return Err(creation_failed(code.to_string())),
            }
        }
        Ok(())
    }
}
