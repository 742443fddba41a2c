// src/telemetry/mod.rs
use crate::config::TracingConfig;
use crate::lifecycle::{Deadline, ShutdownCoordinator};
use anyhow::{Context, Result};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::trace::{Sampler, Tracer, TracerProvider};
use opentelemetry_sdk::{runtime, Resource};
use tracing::info;

/// OTLP span export over HTTP, batched on the tokio runtime.
pub struct Telemetry {
    provider: TracerProvider,
}

impl Telemetry {
    /// `None` when tracing is disabled. Must be called inside a tokio runtime.
    pub fn init(config: &TracingConfig) -> Result<Option<Self>> {
        if !config.enabled {
            return Ok(None);
        }

        let exporter = SpanExporter::builder()
            .with_http()
            .with_endpoint(config.collector_url.as_str())
            .build()
            .context("failed to build OTLP span exporter")?;

        let sampler = Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
            config.sampling_ratio,
        )));

        let provider = TracerProvider::builder()
            .with_batch_exporter(exporter, runtime::Tokio)
            .with_sampler(sampler)
            .with_resource(Resource::new([KeyValue::new(
                "service.name",
                config.service_name.clone(),
            )]))
            .build();

        info!(
            service = %config.service_name,
            collector = %config.collector_url,
            sampling_ratio = config.sampling_ratio,
            "Tracing enabled"
        );
        Ok(Some(Self { provider }))
    }

    pub fn tracer(&self) -> Tracer {
        self.provider.tracer("demo-api")
    }

    /// Flush and stop the exporter as its own shutdown action.
    pub fn register_shutdown(&self, coordinator: &ShutdownCoordinator) {
        let provider = self.provider.clone();
        coordinator.add_handler("tracer", move |deadline: Deadline| async move {
            // shutdown blocks until the batch processor has drained
            deadline
                .run(tokio::task::spawn_blocking(move || provider.shutdown()))
                .await?
                .context("tracer shutdown task failed")?
                .context("tracer shutdown failed")
        });
    }
}
