// src/clients/redis.rs
use crate::config::RedisConfig;
use crate::health::Ping;
use anyhow::{anyhow, ensure, Context, Result};
use async_trait::async_trait;
use ::redis::aio::ConnectionManager;
use tokio::sync::RwLock;
use tracing::info;

/// Shared cache connection. Closing drops the multiplexed connection; later
/// pings fail instead of reconnecting.
pub struct RedisClient {
    manager: RwLock<Option<ConnectionManager>>,
}

impl RedisClient {
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let client = ::redis::Client::open(config.url()).context("Invalid redis address")?;
        let manager = ConnectionManager::new(client)
            .await
            .with_context(|| format!("Failed to connect to redis at {}:{}", config.host, config.port))?;

        info!(host = %config.host, port = config.port, "Connected to Redis");
        Ok(Self {
            manager: RwLock::new(Some(manager)),
        })
    }

    pub async fn connection(&self) -> Result<ConnectionManager> {
        self.manager
            .read()
            .await
            .clone()
            .ok_or_else(|| anyhow!("redis client is closed"))
    }

    pub async fn close(&self) {
        if self.manager.write().await.take().is_some() {
            info!("Redis connection closed");
        }
    }
}

#[async_trait]
impl Ping for RedisClient {
    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let reply: String = ::redis::cmd("PING").query_async(&mut conn).await?;
        ensure!(reply == "PONG", "unexpected PING reply {reply:?}");
        Ok(())
    }
}
