// src/clients/kafka.rs
use crate::config::KafkaConfig;
use crate::health::BrokerMetadata;
use crate::lifecycle::Deadline;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{BaseProducer, FutureProducer, Producer};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::info;

/// Upper bound for a blocking librdkafka call made without a deadline.
const BLOCKING_CALL_TIMEOUT: Duration = Duration::from_secs(10);

fn client_config(config: &KafkaConfig) -> ClientConfig {
    let mut client = ClientConfig::new();
    client
        .set("bootstrap.servers", config.brokers.join(","))
        .set("client.id", "demo-api");
    client
}

fn blocking_timeout(deadline: Deadline) -> Duration {
    deadline.remaining().unwrap_or(BLOCKING_CALL_TIMEOUT)
}

/// Metadata handle on the kafka cluster. Every broker lookup is a fresh
/// metadata request, so brokers that went away stop being listed.
pub struct KafkaClient {
    handle: RwLock<Option<Arc<BaseProducer>>>,
}

impl KafkaClient {
    /// Create the handle without talking to the cluster.
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        let handle: BaseProducer = client_config(config)
            .create()
            .context("failed to create kafka client")?;
        Ok(Self {
            handle: RwLock::new(Some(Arc::new(handle))),
        })
    }

    /// Create the handle and require the cluster to list at least one broker.
    pub async fn connect(config: &KafkaConfig) -> Result<Self> {
        let client = Self::new(config)?;
        let brokers = client
            .brokers(Deadline::after(config.connect_timeout()))
            .await
            .with_context(|| format!("kafka cluster unreachable via {:?}", config.brokers))?;

        if brokers.is_empty() {
            bail!("no kafka brokers advertised via {:?}", config.brokers);
        }

        info!(?brokers, "Connected to Kafka");
        Ok(client)
    }

    fn handle(&self) -> Option<Arc<BaseProducer>> {
        self.handle
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub async fn close(&self) -> Result<()> {
        let handle = self
            .handle
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            // librdkafka joins its broker threads on drop
            tokio::task::spawn_blocking(move || drop(handle))
                .await
                .context("kafka client close task failed")?;
            info!("Kafka client closed");
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerMetadata for KafkaClient {
    async fn brokers(&self, deadline: Deadline) -> Result<Vec<String>> {
        let handle = self.handle().context("kafka client closed")?;
        let timeout = blocking_timeout(deadline);

        let metadata = tokio::task::spawn_blocking(move || {
            handle.client().fetch_metadata(None, timeout)
        })
        .await
        .context("kafka metadata task failed")?
        .context("kafka metadata request failed")?;

        Ok(metadata
            .brokers()
            .iter()
            .map(|broker| format!("{}:{}", broker.host(), broker.port()))
            .collect())
    }
}

/// Producer for the service topic. Closing flushes whatever is still
/// queued, bounded by the shutdown deadline.
pub struct KafkaProducer {
    producer: RwLock<Option<FutureProducer>>,
    topic: String,
}

impl KafkaProducer {
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        let producer: FutureProducer = client_config(config)
            .set("acks", "all")
            .create()
            .context("failed to create kafka producer")?;

        info!(topic = %config.topic, "Kafka producer created");
        Ok(Self {
            producer: RwLock::new(Some(producer)),
            topic: config.topic.clone(),
        })
    }

    pub async fn close(&self, deadline: Deadline) -> Result<()> {
        let producer = self
            .producer
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let Some(producer) = producer else {
            return Ok(());
        };

        let timeout = blocking_timeout(deadline);
        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .context("kafka producer close task failed")?
            .context("kafka producer flush failed")?;

        info!(topic = %self.topic, "Kafka producer closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{BrokerProbe, Probe, ServiceState};

    fn gone_broker() -> KafkaConfig {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        KafkaConfig {
            brokers: vec![addr],
            topic: "messages".to_string(),
            connect_timeout_secs: 1,
        }
    }

    #[tokio::test]
    async fn test_connect_fails_without_live_cluster() {
        let result = KafkaClient::connect(&gone_broker()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_lost_cluster_is_reported_down() {
        let client = KafkaClient::new(&gone_broker()).unwrap();
        let probe = BrokerProbe::new("kafka", Some(Arc::new(client)));

        let status = probe.check(Deadline::after(Duration::from_secs(2))).await;

        assert_eq!(status.status, ServiceState::Down);
    }

    #[tokio::test]
    async fn test_closed_client_refuses_metadata() {
        let client = KafkaClient::new(&gone_broker()).unwrap();
        client.close().await.unwrap();

        let err = client
            .brokers(Deadline::after(Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "kafka client closed");
    }

    #[tokio::test]
    async fn test_producer_close_flushes_once() {
        let producer = KafkaProducer::new(&gone_broker()).unwrap();
        assert_eq!(producer.topic, "messages");

        producer
            .close(Deadline::after(Duration::from_secs(2)))
            .await
            .unwrap();
        assert!(producer.producer.read().unwrap().is_none());

        producer
            .close(Deadline::after(Duration::from_secs(2)))
            .await
            .unwrap();
    }
}
