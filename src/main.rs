// src/main.rs
use anyhow::Result;
use demo_api::{
    clients::Dependencies,
    config::{self, Config, DEFAULT_CONFIG_PATH},
    health::HealthAggregator,
    lifecycle::{Deadline, ShutdownCoordinator},
    metrics::MetricsRegistry,
    server::{RequestHandler, ServerBuilder},
    telemetry::Telemetry,
};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::oneshot;
use tracing::{error, info};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first: it decides whether spans are exported
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("CONFIG_PATH").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = config::load_config(&config_path)?;

    // Initialize tracing
    let telemetry = Telemetry::init(&config.tracing)?;
    let otel_layer = telemetry
        .as_ref()
        .map(|telemetry| tracing_opentelemetry::layer().with_tracer(telemetry.tracer()));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("demo_api=debug".parse()?)
                .add_directive("hyper=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(otel_layer)
        .init();

    info!("Loaded configuration from: {}", config_path);

    // Initialize metrics
    let metrics_registry = Arc::new(MetricsRegistry::new()?);
    let metrics = metrics_registry.collector();

    // Connect dependencies
    let dependencies = Dependencies::connect(&config).await?;

    let mut aggregator = HealthAggregator::new(config.health.timeout()).with_metrics(metrics.clone());
    for probe in dependencies.probes() {
        aggregator.register(probe)?;
    }
    let aggregator = Arc::new(aggregator);

    let mut handler = RequestHandler::new(aggregator.clone());
    if config.metrics.enabled {
        handler = handler.with_metrics(metrics_registry.clone(), config.metrics.path.clone());
    }

    // Start HTTP server; it stops accepting once `stop_tx` fires
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = ServerBuilder::new(config.server.addr()?)
        .with_handler(handler)
        .spawn(async {
            let _ = stop_rx.await;
        })
        .await?;

    // Release order: HTTP server, cache, queue, SQL pools, tracer
    let coordinator = ShutdownCoordinator::new(config.server.shutdown_timeout()).with_metrics(metrics);
    coordinator.add_handler("http", move |deadline: Deadline| async move {
        deadline.run(server.stopped()).await??;
        Ok(())
    });
    dependencies.register_shutdown(&coordinator);
    if let Some(telemetry) = &telemetry {
        telemetry.register_shutdown(&coordinator);
    }

    log_startup(&config, &dependencies, &aggregator, &coordinator);

    shutdown_signal().await;
    let _ = stop_tx.send(());

    match coordinator.shutdown(Deadline::unbounded()).await {
        Ok(()) => {
            info!("Server shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Shutdown completed with errors");
            std::process::exit(1);
        }
    }
}

fn log_startup(
    config: &Config,
    dependencies: &Dependencies,
    aggregator: &HealthAggregator,
    coordinator: &ShutdownCoordinator,
) {
    info!(
        addr = %format!("{}:{}", config.server.host, config.server.port),
        shutdown_timeout = ?coordinator.timeout(),
        shutdown_actions = coordinator.pending(),
        health_timeout = ?aggregator.timeout(),
        probes = ?aggregator.probe_names(),
        unconfigured = ?dependencies.missing(),
        tracing = config.tracing.enabled,
        "Service started"
    );
}

// Graceful shutdown trigger
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, initiating graceful shutdown");
}
