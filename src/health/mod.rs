// src/health/mod.rs
mod aggregator;
mod probe;
mod status;

pub use aggregator::{HealthAggregator, HealthError, DEFAULT_HEALTH_TIMEOUT};
pub use probe::{BrokerMetadata, BrokerProbe, Ping, PingProbe, Probe};
pub use status::{HealthReport, OverallStatus, ServiceState, ServiceStatus};
