// src/health/status.rs
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Ok,
    Degraded,
}

/// Result of probing one dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    pub status: ServiceState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_latency"
    )]
    pub latency: Option<Duration>,
}

impl ServiceStatus {
    pub fn up(latency: Option<Duration>) -> Self {
        Self {
            status: ServiceState::Up,
            message: None,
            latency,
        }
    }

    pub fn down(message: impl Into<String>, latency: Option<Duration>) -> Self {
        Self {
            status: ServiceState::Down,
            message: Some(message.into()),
            latency,
        }
    }

    pub fn is_up(&self) -> bool {
        self.status == ServiceState::Up
    }
}

/// Aggregate answer to one health request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: OverallStatus,
    pub timestamp: DateTime<Utc>,
    pub services: BTreeMap<String, ServiceStatus>,
}

impl HealthReport {
    /// `status` is `degraded` iff any service is down.
    pub fn new(timestamp: DateTime<Utc>, services: BTreeMap<String, ServiceStatus>) -> Self {
        let status = if services.values().all(ServiceStatus::is_up) {
            OverallStatus::Ok
        } else {
            OverallStatus::Degraded
        };

        Self {
            status,
            timestamp,
            services,
        }
    }

    pub fn down_services(&self) -> impl Iterator<Item = &str> {
        self.services
            .iter()
            .filter(|(_, service)| !service.is_up())
            .map(|(name, _)| name.as_str())
    }
}

// Rendered like `1.234ms`, matching what operators see in the logs.
fn serialize_latency<S>(latency: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match latency {
        Some(latency) => serializer.serialize_str(&format!("{latency:?}")),
        None => serializer.serialize_none(),
    }
}
