// src/health/aggregator.rs
use super::{HealthReport, Probe, ServiceStatus};
use crate::lifecycle::Deadline;
use crate::metrics::MetricsCollector;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum HealthError {
    #[error("probe `{0}` is already registered")]
    DuplicateProbe(String),
}

/// Checks every registered dependency in parallel under one shared budget
/// and reduces the results into a [`HealthReport`].
pub struct HealthAggregator {
    probes: Vec<Arc<dyn Probe>>,
    timeout: Duration,
    metrics: Option<Arc<MetricsCollector>>,
}

impl HealthAggregator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            probes: Vec::new(),
            timeout,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn register(&mut self, probe: Arc<dyn Probe>) -> Result<(), HealthError> {
        if self.probes.iter().any(|p| p.name() == probe.name()) {
            return Err(HealthError::DuplicateProbe(probe.name().to_string()));
        }
        self.probes.push(probe);
        Ok(())
    }

    pub fn with_probe(mut self, probe: Arc<dyn Probe>) -> Result<Self, HealthError> {
        self.register(probe)?;
        Ok(self)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn probe_names(&self) -> Vec<&str> {
        self.probes.iter().map(|p| p.name()).collect()
    }

    /// Never fails: unreachable, slow or panicking dependencies show up as
    /// `down` entries in the report.
    pub async fn check_health(&self, parent: Deadline) -> HealthReport {
        let deadline = parent.bounded(self.timeout);
        let timestamp = Utc::now();

        let mut names = Vec::with_capacity(self.probes.len());
        let mut tasks = Vec::with_capacity(self.probes.len());
        for probe in &self.probes {
            names.push(probe.name().to_string());
            let probe = probe.clone();
            tasks.push(tokio::spawn(async move { run_probe(probe, deadline).await }));
        }

        let results = futures::future::join_all(tasks).await;

        let mut services = BTreeMap::new();
        for (name, result) in names.into_iter().zip(results) {
            let status = match result {
                Ok(status) => status,
                Err(e) => ServiceStatus::down(format!("probe task failed: {e}"), None),
            };

            if status.is_up() {
                debug!(service = %name, latency = ?status.latency, "Dependency is up");
            } else {
                warn!(
                    service = %name,
                    reason = status.message.as_deref().unwrap_or_default(),
                    "Dependency is down"
                );
            }

            if let Some(metrics) = &self.metrics {
                metrics.record_probe(&name, status.is_up(), status.latency);
            }

            services.insert(name, status);
        }

        let report = HealthReport::new(timestamp, services);

        if let Some(metrics) = &self.metrics {
            metrics.record_health_check();
        }

        info!(
            status = ?report.status,
            services = report.services.len(),
            down = ?report.down_services().collect::<Vec<_>>(),
            "Health check complete"
        );

        report
    }
}

// Enforces the deadline even for probes that ignore the one they are given.
async fn run_probe(probe: Arc<dyn Probe>, deadline: Deadline) -> ServiceStatus {
    let start = Instant::now();
    match deadline.run(probe.check(deadline)).await {
        Ok(status) => status,
        Err(e) => ServiceStatus::down(e.to_string(), Some(start.elapsed())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{OverallStatus, PingProbe, ServiceState};
    use async_trait::async_trait;

    struct StaticProbe {
        name: &'static str,
        delay: Duration,
        up: bool,
    }

    #[async_trait]
    impl Probe for StaticProbe {
        fn name(&self) -> &str {
            self.name
        }

        async fn check(&self, _deadline: Deadline) -> ServiceStatus {
            // deliberately ignores the deadline
            tokio::time::sleep(self.delay).await;
            if self.up {
                ServiceStatus::up(Some(self.delay))
            } else {
                ServiceStatus::down("unreachable", Some(self.delay))
            }
        }
    }

    struct PanickingProbe;

    #[async_trait]
    impl Probe for PanickingProbe {
        fn name(&self) -> &str {
            "search"
        }

        async fn check(&self, _deadline: Deadline) -> ServiceStatus {
            panic!("client bug")
        }
    }

    fn probe(name: &'static str, delay_ms: u64, up: bool) -> Arc<dyn Probe> {
        Arc::new(StaticProbe {
            name,
            delay: Duration::from_millis(delay_ms),
            up,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_up_reports_ok() {
        let aggregator = HealthAggregator::new(DEFAULT_HEALTH_TIMEOUT)
            .with_probe(probe("mysql", 5, true))
            .unwrap()
            .with_probe(probe("redis", 1, true))
            .unwrap();

        let report = aggregator.check_health(Deadline::unbounded()).await;

        assert_eq!(report.status, OverallStatus::Ok);
        assert_eq!(report.services.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probes_run_in_parallel() {
        let aggregator = HealthAggregator::new(DEFAULT_HEALTH_TIMEOUT)
            .with_probe(probe("a", 400, true))
            .unwrap()
            .with_probe(probe("b", 400, true))
            .unwrap()
            .with_probe(probe("c", 400, true))
            .unwrap();

        let start = Instant::now();
        aggregator.check_health(Deadline::unbounded()).await;

        assert_eq!(start.elapsed(), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_down_degrades_and_keeps_every_entry() {
        let aggregator = HealthAggregator::new(DEFAULT_HEALTH_TIMEOUT)
            .with_probe(probe("mysql", 1, true))
            .unwrap()
            .with_probe(probe("kafka", 1, false))
            .unwrap()
            .with_probe(Arc::new(PingProbe::new("redis", None)))
            .unwrap();

        let report = aggregator.check_health(Deadline::unbounded()).await;

        assert_eq!(report.status, OverallStatus::Degraded);
        assert_eq!(report.services["mysql"].status, ServiceState::Up);
        assert_eq!(report.services["kafka"].status, ServiceState::Down);
        assert_eq!(
            report.services["redis"].message.as_deref(),
            Some("redis connection not initialized")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_probe_is_down_at_budget() {
        let aggregator = HealthAggregator::new(DEFAULT_HEALTH_TIMEOUT)
            .with_probe(probe("elasticsearch", 60_000, true))
            .unwrap()
            .with_probe(probe("mysql", 10, true))
            .unwrap();

        let start = Instant::now();
        let report = aggregator.check_health(Deadline::unbounded()).await;

        assert_eq!(start.elapsed(), DEFAULT_HEALTH_TIMEOUT);
        assert_eq!(report.status, OverallStatus::Degraded);
        assert_eq!(
            report.services["elasticsearch"],
            ServiceStatus::down("deadline exceeded", Some(DEFAULT_HEALTH_TIMEOUT))
        );
        assert!(report.services["mysql"].is_up());
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_deadline_tightens_budget() {
        let aggregator =
            HealthAggregator::new(DEFAULT_HEALTH_TIMEOUT).with_probe(probe("mysql", 2_000, true)).unwrap();

        let start = Instant::now();
        let report = aggregator
            .check_health(Deadline::after(Duration::from_secs(1)))
            .await;

        assert_eq!(start.elapsed(), Duration::from_secs(1));
        assert_eq!(report.status, OverallStatus::Degraded);
    }

    #[tokio::test]
    async fn test_panicking_probe_is_down() {
        let aggregator = HealthAggregator::new(DEFAULT_HEALTH_TIMEOUT)
            .with_probe(Arc::new(PanickingProbe))
            .unwrap();

        let report = aggregator.check_health(Deadline::unbounded()).await;

        let search = &report.services["search"];
        assert_eq!(search.status, ServiceState::Down);
        assert!(search.message.as_deref().unwrap().starts_with("probe task failed"));
    }

    #[test]
    fn test_duplicate_probe_is_rejected() {
        let mut aggregator = HealthAggregator::new(DEFAULT_HEALTH_TIMEOUT);
        aggregator.register(probe("mysql", 1, true)).unwrap();

        let err = aggregator.register(probe("mysql", 1, true)).unwrap_err();

        assert!(matches!(err, HealthError::DuplicateProbe(ref name) if name == "mysql"));
        assert_eq!(aggregator.probe_names(), vec!["mysql"]);
    }

    #[tokio::test]
    async fn test_no_probes_is_ok() {
        let report = HealthAggregator::new(DEFAULT_HEALTH_TIMEOUT)
            .check_health(Deadline::unbounded())
            .await;

        assert_eq!(report.status, OverallStatus::Ok);
        assert!(report.services.is_empty());
    }
}
