// src/config/models.rs
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub tracing: TracingConfig,

    // An absent section leaves that dependency unconfigured.
    pub mysql: Option<SqlConfig>,
    pub postgres: Option<SqlConfig>,
    pub redis: Option<RedisConfig>,
    pub kafka: Option<KafkaConfig>,
    pub elasticsearch: Option<ElasticsearchConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            shutdown_timeout_secs: 30,
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(format!("{}:{}", self.host, self.port)))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub timeout_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self { timeout_secs: 5 }
    }
}

impl HealthConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/metrics".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SqlConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub database: String,
    #[serde(default = "default_max_open_conns")]
    pub max_open_conns: u32,
    #[serde(default)]
    pub max_idle_conns: u32,
    #[serde(default = "default_pool_minutes")]
    pub max_lifetime_mins: u64,
    #[serde(default = "default_pool_minutes")]
    pub max_idle_time_mins: u64,
}

impl SqlConfig {
    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_mins * 60)
    }

    pub fn max_idle_time(&self) -> Duration {
        Duration::from_secs(self.max_idle_time_mins * 60)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub host: String,
    #[serde(default = "default_redis_port")]
    pub port: u16,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub db: i64,
}

impl RedisConfig {
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) => format!("redis://:{}@{}:{}/{}", password, self.host, self.port, self.db),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct KafkaConfig {
    pub brokers: Vec<String>,
    #[serde(default)]
    pub topic: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl KafkaConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ElasticsearchConfig {
    pub url: Url,
    #[serde(default = "default_connect_timeout_secs")]
    pub timeout_secs: u64,
}

impl ElasticsearchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// OTLP span export. Off unless `enabled` is set.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    pub enabled: bool,
    pub service_name: String,
    /// Full OTLP/HTTP traces endpoint.
    pub collector_url: String,
    pub sampling_ratio: f64,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            service_name: "demo-api".to_string(),
            collector_url: "http://localhost:4318/v1/traces".to_string(),
            sampling_ratio: 1.0,
        }
    }
}

fn default_max_open_conns() -> u32 {
    10
}

fn default_pool_minutes() -> u64 {
    5
}

fn default_redis_port() -> u16 {
    6379
}

fn default_connect_timeout_secs() -> u64 {
    5
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("server.shutdown_timeout_secs must be greater than zero")]
    ZeroShutdownTimeout,

    #[error("health.timeout_secs must be greater than zero")]
    ZeroHealthTimeout,

    #[error("kafka.brokers must list at least one broker")]
    NoKafkaBrokers,

    #[error("metrics.path must start with '/', got {0:?}")]
    InvalidMetricsPath(String),

    #[error("invalid listen address {0:?}")]
    InvalidAddress(String),

    #[error("tracing.sampling_ratio must be within 0.0..=1.0, got {0}")]
    InvalidSamplingRatio(f64),

    #[error("tracing.service_name must not be empty")]
    EmptyServiceName,

    #[error("invalid tracing.collector_url {0:?}")]
    InvalidCollectorUrl(String),
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.shutdown_timeout_secs == 0 {
            return Err(ConfigError::ZeroShutdownTimeout);
        }
        if self.health.timeout_secs == 0 {
            return Err(ConfigError::ZeroHealthTimeout);
        }
        if let Some(kafka) = &self.kafka {
            if kafka.brokers.is_empty() {
                return Err(ConfigError::NoKafkaBrokers);
            }
        }
        if self.metrics.enabled && !self.metrics.path.starts_with('/') {
            return Err(ConfigError::InvalidMetricsPath(self.metrics.path.clone()));
        }
        if self.tracing.enabled {
            if !(0.0..=1.0).contains(&self.tracing.sampling_ratio) {
                return Err(ConfigError::InvalidSamplingRatio(self.tracing.sampling_ratio));
            }
            if self.tracing.service_name.is_empty() {
                return Err(ConfigError::EmptyServiceName);
            }
            if Url::parse(&self.tracing.collector_url).is_err() {
                return Err(ConfigError::InvalidCollectorUrl(
                    self.tracing.collector_url.clone(),
                ));
            }
        }
        self.server.addr()?;
        Ok(())
    }
}
