// src/health/probe.rs
use super::ServiceStatus;
use crate::lifecycle::Deadline;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::Instant;

/// A named, side-effect-free liveness check for one dependency.
#[async_trait]
pub trait Probe: Send + Sync {
    fn name(&self) -> &str;

    async fn check(&self, deadline: Deadline) -> ServiceStatus;
}

/// A client with a single round-trip ping.
#[async_trait]
pub trait Ping: Send + Sync {
    async fn ping(&self) -> anyhow::Result<()>;
}

/// A broker-style client that can ask the cluster which brokers it
/// currently advertises.
#[async_trait]
pub trait BrokerMetadata: Send + Sync {
    async fn brokers(&self, deadline: Deadline) -> anyhow::Result<Vec<String>>;
}

/// Probe for connection-oriented dependencies (SQL pools, cache, search).
pub struct PingProbe {
    name: String,
    client: Option<Arc<dyn Ping>>,
    not_configured: String,
}

impl PingProbe {
    pub fn new(name: impl Into<String>, client: Option<Arc<dyn Ping>>) -> Self {
        let name = name.into();
        let not_configured = format!("{name} connection not initialized");
        Self {
            name,
            client,
            not_configured,
        }
    }

    pub fn with_not_configured_message(mut self, message: impl Into<String>) -> Self {
        self.not_configured = message.into();
        self
    }
}

#[async_trait]
impl Probe for PingProbe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, deadline: Deadline) -> ServiceStatus {
        let Some(client) = &self.client else {
            return ServiceStatus::down(self.not_configured.clone(), None);
        };

        let start = Instant::now();
        let result = deadline.run(client.ping()).await;
        let latency = Some(start.elapsed());

        match result {
            Ok(Ok(())) => ServiceStatus::up(latency),
            Ok(Err(err)) => ServiceStatus::down(format!("{err:#}"), latency),
            Err(err) => ServiceStatus::down(err.to_string(), latency),
        }
    }
}

/// Probe for brokers that have no single-shot ping: up while a fresh
/// metadata request lists at least one broker.
pub struct BrokerProbe {
    name: String,
    client: Option<Arc<dyn BrokerMetadata>>,
    not_configured: String,
}

impl BrokerProbe {
    pub fn new(name: impl Into<String>, client: Option<Arc<dyn BrokerMetadata>>) -> Self {
        let name = name.into();
        let not_configured = format!("{name} client not initialized");
        Self {
            name,
            client,
            not_configured,
        }
    }
}

#[async_trait]
impl Probe for BrokerProbe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, deadline: Deadline) -> ServiceStatus {
        let Some(client) = &self.client else {
            return ServiceStatus::down(self.not_configured.clone(), None);
        };

        match deadline.run(client.brokers(deadline)).await {
            Ok(Ok(brokers)) if brokers.is_empty() => {
                ServiceStatus::down(format!("no {} brokers available", self.name), None)
            }
            Ok(Ok(_)) => ServiceStatus::up(None),
            Ok(Err(err)) => ServiceStatus::down(format!("{err:#}"), None),
            Err(err) => ServiceStatus::down(err.to_string(), None),
        }
    }
}
