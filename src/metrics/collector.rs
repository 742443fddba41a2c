// src/metrics/collector.rs
use anyhow::Result;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

pub struct MetricsRegistry {
    registry: Registry,
    collector: Arc<MetricsCollector>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let collector = Arc::new(MetricsCollector::new(&registry)?);

        Ok(Self {
            registry,
            collector,
        })
    }

    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    /// Encode every registered family in the prometheus text format.
    pub fn gather(&self) -> Result<Vec<u8>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(buffer)
    }

    pub fn content_type(&self) -> &'static str {
        "text/plain; version=0.0.4"
    }
}

pub struct MetricsCollector {
    // Request metrics
    pub http_requests_total: IntCounterVec,
    pub http_request_duration_seconds: HistogramVec,

    // Health metrics
    pub health_checks_total: IntCounter,
    pub health_service_up: IntGaugeVec,
    pub health_probe_duration_seconds: HistogramVec,

    // Shutdown metrics
    pub shutdown_actions_total: IntCounterVec,
}

impl MetricsCollector {
    pub fn new(registry: &Registry) -> Result<Self> {
        let http_requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests"),
            &["method", "endpoint", "status"],
        )?;
        registry.register(Box::new(http_requests_total.clone()))?;

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "Duration of HTTP requests",
            ),
            &["method", "endpoint"],
        )?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;

        let health_checks_total =
            IntCounter::new("health_checks_total", "Total number of aggregate health checks")?;
        registry.register(Box::new(health_checks_total.clone()))?;

        let health_service_up = IntGaugeVec::new(
            Opts::new(
                "health_service_up",
                "Dependency status from the last health check (1=up, 0=down)",
            ),
            &["service"],
        )?;
        registry.register(Box::new(health_service_up.clone()))?;

        let health_probe_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "health_probe_duration_seconds",
                "Duration of a single dependency probe",
            ),
            &["service"],
        )?;
        registry.register(Box::new(health_probe_duration_seconds.clone()))?;

        let shutdown_actions_total = IntCounterVec::new(
            Opts::new(
                "shutdown_actions_total",
                "Shutdown actions finished, by result",
            ),
            &["result"],
        )?;
        registry.register(Box::new(shutdown_actions_total.clone()))?;

        Ok(Self {
            http_requests_total,
            http_request_duration_seconds,
            health_checks_total,
            health_service_up,
            health_probe_duration_seconds,
            shutdown_actions_total,
        })
    }

    pub fn record_request(&self, method: &str, endpoint: &str, status_code: u16, duration: Duration) {
        let status = status_code.to_string();
        self.http_requests_total
            .with_label_values(&[method, endpoint, &status])
            .inc();

        self.http_request_duration_seconds
            .with_label_values(&[method, endpoint])
            .observe(duration.as_secs_f64());
    }

    pub fn record_health_check(&self) {
        self.health_checks_total.inc();
    }

    pub fn record_probe(&self, service: &str, up: bool, latency: Option<Duration>) {
        let value = if up { 1 } else { 0 };
        self.health_service_up
            .with_label_values(&[service])
            .set(value);

        if let Some(latency) = latency {
            self.health_probe_duration_seconds
                .with_label_values(&[service])
                .observe(latency.as_secs_f64());
        }
    }

    /// `result` is one of `ok`, `error` or `panic`.
    pub fn record_shutdown_action(&self, result: &str) {
        self.shutdown_actions_total
            .with_label_values(&[result])
            .inc();
    }
}
