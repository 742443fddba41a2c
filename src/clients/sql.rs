// src/clients/sql.rs
use crate::config::SqlConfig;
use crate::health::Ping;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::Connection;
use std::time::Duration;
use tracing::info;

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn connect_mysql(config: &SqlConfig) -> Result<MySqlPool> {
    let options = MySqlConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.user)
        .password(&config.password)
        .database(&config.database);

    let pool = MySqlPoolOptions::new()
        .max_connections(config.max_open_conns)
        .min_connections(config.max_idle_conns.min(config.max_open_conns))
        .max_lifetime(config.max_lifetime())
        .idle_timeout(config.max_idle_time())
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to connect to mysql at {}:{}", config.host, config.port))?;

    info!(
        host = %config.host,
        port = config.port,
        database = %config.database,
        "Connected to MySQL"
    );
    Ok(pool)
}

pub async fn connect_postgres(config: &SqlConfig) -> Result<PgPool> {
    let options = PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.user)
        .password(&config.password)
        .database(&config.database);

    let pool = PgPoolOptions::new()
        .max_connections(config.max_open_conns)
        .min_connections(config.max_idle_conns.min(config.max_open_conns))
        .max_lifetime(config.max_lifetime())
        .idle_timeout(config.max_idle_time())
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to connect to postgres at {}:{}", config.host, config.port))?;

    info!(
        host = %config.host,
        port = config.port,
        database = %config.database,
        "Connected to PostgreSQL"
    );
    Ok(pool)
}

#[async_trait]
impl Ping for MySqlPool {
    async fn ping(&self) -> Result<()> {
        let mut conn = self.acquire().await?;
        conn.ping().await?;
        Ok(())
    }
}

#[async_trait]
impl Ping for PgPool {
    async fn ping(&self) -> Result<()> {
        let mut conn = self.acquire().await?;
        conn.ping().await?;
        Ok(())
    }
}
