// src/server/handler.rs
use crate::health::HealthAggregator;
use crate::lifecycle::Deadline;
use crate::metrics::{MetricsCollector, MetricsRegistry};
use hyper::header::CONTENT_TYPE;
use hyper::{Body, Method, Request, Response, StatusCode};
use std::sync::Arc;
use tokio::time::Instant;
use tower::Service;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Clone)]
struct MetricsEndpoint {
    registry: Arc<MetricsRegistry>,
    path: Arc<str>,
}

/// Routes the health, liveness and metrics endpoints.
///
/// `/health` and `/health/ready` always answer 200; a degraded dependency is
/// reported in the JSON body, never through the status code.
#[derive(Clone)]
pub struct RequestHandler {
    health: Arc<HealthAggregator>,
    metrics: Option<MetricsEndpoint>,
    collector: Option<Arc<MetricsCollector>>,
}

impl RequestHandler {
    pub fn new(health: Arc<HealthAggregator>) -> Self {
        Self {
            health,
            metrics: None,
            collector: None,
        }
    }

    /// Expose `registry` on `path` and record request metrics into it.
    pub fn with_metrics(mut self, registry: Arc<MetricsRegistry>, path: impl Into<String>) -> Self {
        self.collector = Some(registry.collector());
        self.metrics = Some(MetricsEndpoint {
            registry,
            path: Arc::from(path.into()),
        });
        self
    }

    pub async fn handle(&self, req: Request<Body>) -> Result<Response<Body>, BoxError> {
        let start = Instant::now();
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let (endpoint, response) = self.route(&method, &path).await?;

        if let Some(collector) = &self.collector {
            collector.record_request(
                method.as_str(),
                endpoint,
                response.status().as_u16(),
                start.elapsed(),
            );
        }
        tracing::debug!(%method, %path, status = %response.status(), "request served");

        Ok(response)
    }

    async fn route(
        &self,
        method: &Method,
        path: &str,
    ) -> Result<(&'static str, Response<Body>), BoxError> {
        let endpoint = match path {
            "/health" => "/health",
            "/health/ready" | "/health/ready/" => "/health/ready",
            "/health/live" | "/health/live/" => "/health/live",
            p if self.is_metrics_path(p) => "/metrics",
            _ => return Ok(("unmatched", not_found()?)),
        };

        if *method != Method::GET {
            return Ok((endpoint, method_not_allowed()?));
        }

        let response = match endpoint {
            "/health/live" => text(StatusCode::OK, "OK")?,
            "/metrics" => self.metrics_response()?,
            _ => self.health_response().await?,
        };

        Ok((endpoint, response))
    }

    async fn health_response(&self) -> Result<Response<Body>, BoxError> {
        let report = self.health.check_health(Deadline::unbounded()).await;
        let body = serde_json::to_vec(&report)?;

        Ok(Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body))?)
    }

    fn metrics_response(&self) -> Result<Response<Body>, BoxError> {
        let Some(metrics) = &self.metrics else {
            return Ok(not_found()?);
        };

        Ok(Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, metrics.registry.content_type())
            .body(Body::from(metrics.registry.gather()?))?)
    }

    fn is_metrics_path(&self, path: &str) -> bool {
        matches!(&self.metrics, Some(metrics) if *metrics.path == *path)
    }
}

impl Service<Request<Body>> for RequestHandler {
    type Response = Response<Body>;
    type Error = BoxError;
    type Future = futures::future::BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let handler = self.clone();
        Box::pin(async move {
            handler.handle(req).await.map_err(|e| {
                tracing::error!(%e, "request handling error");
                e
            })
        })
    }
}

fn text(status: StatusCode, body: &'static str) -> Result<Response<Body>, hyper::http::Error> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from(body))
}

fn not_found() -> Result<Response<Body>, hyper::http::Error> {
    text(StatusCode::NOT_FOUND, "Not Found")
}

fn method_not_allowed() -> Result<Response<Body>, hyper::http::Error> {
    text(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
}
