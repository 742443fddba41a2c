// src/clients/mod.rs
mod elasticsearch;
mod kafka;
mod redis;
mod sql;

pub use self::elasticsearch::ElasticsearchClient;
pub use self::kafka::{KafkaClient, KafkaProducer};
pub use self::redis::RedisClient;
pub use self::sql::{connect_mysql, connect_postgres};

use crate::config::Config;
use crate::health::{BrokerMetadata, BrokerProbe, Ping, PingProbe, Probe};
use crate::lifecycle::ShutdownCoordinator;
use anyhow::{Context, Result};
use sqlx::{MySqlPool, PgPool};
use std::sync::Arc;
use tracing::warn;

/// Every external client the service talks to. `None` means the dependency
/// is not configured or could not be reached at startup.
#[derive(Default)]
pub struct Dependencies {
    pub mysql: Option<MySqlPool>,
    pub postgres: Option<PgPool>,
    pub redis: Option<Arc<RedisClient>>,
    pub kafka: Option<Arc<KafkaClient>>,
    pub kafka_producer: Option<Arc<KafkaProducer>>,
    pub elasticsearch: Option<Arc<ElasticsearchClient>>,
}

impl Dependencies {
    /// SQL failures are fatal; cache, queue and search failures only warn
    /// and leave the client unset.
    pub async fn connect(config: &Config) -> Result<Self> {
        let mysql = match &config.mysql {
            Some(mysql) => Some(connect_mysql(mysql).await.context("mysql init failed")?),
            None => None,
        };

        let postgres = match &config.postgres {
            Some(postgres) => Some(
                connect_postgres(postgres)
                    .await
                    .context("postgres init failed")?,
            ),
            None => None,
        };

        let redis = match &config.redis {
            Some(redis) => match RedisClient::connect(redis).await {
                Ok(client) => Some(Arc::new(client)),
                Err(e) => {
                    warn!(error = %format!("{e:#}"), "Redis initialization warning");
                    None
                }
            },
            None => None,
        };

        // The producer is only created once the cluster has answered.
        let (kafka, kafka_producer) = match &config.kafka {
            Some(kafka) => match KafkaClient::connect(kafka).await {
                Ok(client) => {
                    let producer = match KafkaProducer::new(kafka) {
                        Ok(producer) => Some(Arc::new(producer)),
                        Err(e) => {
                            warn!(error = %format!("{e:#}"), "Kafka producer creation failed");
                            None
                        }
                    };
                    (Some(Arc::new(client)), producer)
                }
                Err(e) => {
                    warn!(error = %format!("{e:#}"), "Kafka initialization warning");
                    (None, None)
                }
            },
            None => (None, None),
        };

        let elasticsearch = match &config.elasticsearch {
            Some(elasticsearch) => match ElasticsearchClient::new(elasticsearch) {
                Ok(client) => {
                    // An unreachable cluster keeps its client; the health report shows it down.
                    if let Err(e) = client.ping().await {
                        warn!(error = %format!("{e:#}"), url = %client.url(), "Elasticsearch ping failed");
                    }
                    Some(Arc::new(client))
                }
                Err(e) => {
                    warn!(error = %format!("{e:#}"), "Elasticsearch initialization warning");
                    None
                }
            },
            None => None,
        };

        let dependencies = Self {
            mysql,
            postgres,
            redis,
            kafka,
            kafka_producer,
            elasticsearch,
        };

        for name in dependencies.missing() {
            warn!(dependency = name, "Dependency is not configured");
        }

        Ok(dependencies)
    }

    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.mysql.is_none() {
            missing.push("mysql");
        }
        if self.postgres.is_none() {
            missing.push("postgres");
        }
        if self.redis.is_none() {
            missing.push("redis");
        }
        if self.kafka.is_none() {
            missing.push("kafka");
        }
        if self.elasticsearch.is_none() {
            missing.push("elasticsearch");
        }
        missing
    }

    /// One probe per dependency, configured or not.
    pub fn probes(&self) -> Vec<Arc<dyn Probe>> {
        let mysql = self
            .mysql
            .clone()
            .map(|pool| Arc::new(pool) as Arc<dyn Ping>);
        let postgres = self
            .postgres
            .clone()
            .map(|pool| Arc::new(pool) as Arc<dyn Ping>);
        let redis = self.redis.clone().map(|client| client as Arc<dyn Ping>);
        let kafka = self
            .kafka
            .clone()
            .map(|client| client as Arc<dyn BrokerMetadata>);
        let elasticsearch = self
            .elasticsearch
            .clone()
            .map(|client| client as Arc<dyn Ping>);

        vec![
            Arc::new(PingProbe::new("mysql", mysql)),
            Arc::new(PingProbe::new("postgres", postgres)),
            Arc::new(PingProbe::new("redis", redis)),
            Arc::new(BrokerProbe::new("kafka", kafka)),
            Arc::new(
                PingProbe::new("elasticsearch", elasticsearch)
                    .with_not_configured_message("elasticsearch client not initialized"),
            ),
        ]
    }

    /// Register a close action per configured client: cache, then queue
    /// producer and client, then the SQL pools.
    pub fn register_shutdown(&self, coordinator: &ShutdownCoordinator) {
        if let Some(redis) = &self.redis {
            let redis = redis.clone();
            coordinator.add_handler("redis", move |deadline| async move {
                deadline.run(redis.close()).await?;
                Ok(())
            });
        }

        if let Some(producer) = &self.kafka_producer {
            let producer = producer.clone();
            coordinator.add_handler("kafka-producer", move |deadline| async move {
                producer
                    .close(deadline)
                    .await
                    .context("kafka producer cleanup")
            });
        }

        if let Some(kafka) = &self.kafka {
            let kafka = kafka.clone();
            coordinator.add_handler("kafka-client", move |deadline| async move {
                deadline
                    .run(kafka.close())
                    .await?
                    .context("kafka client cleanup")
            });
        }

        if let Some(pool) = &self.postgres {
            let pool = pool.clone();
            coordinator.add_handler("postgres", move |deadline| async move {
                deadline
                    .run(pool.close())
                    .await
                    .context("postgres pool did not drain")?;
                Ok(())
            });
        }

        if let Some(pool) = &self.mysql {
            let pool = pool.clone();
            coordinator.add_handler("mysql", move |deadline| async move {
                deadline
                    .run(pool.close())
                    .await
                    .context("mysql pool did not drain")?;
                Ok(())
            });
        }
    }
}
