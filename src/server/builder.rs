// ────────────────────────────────
// src/server/builder.rs
// ────────────────────────────────
use crate::server::listener::bind_tcp;
use anyhow::{Context, Result};
use hyper::service::make_service_fn;
use hyper::{Body, Request, Response, Server};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use tokio::task::JoinHandle;
use tower::Service;

/// Builder pattern so `main.rs` can inject its request handler.
pub struct ServerBuilder<H>
where
    H: Service<Request<Body>, Response = Response<Body>> + Send + Clone + 'static,
    H::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    H::Future: Send + 'static,
{
    addr: SocketAddr,
    handler: Option<H>,
}

impl<H> ServerBuilder<H>
where
    H: Service<Request<Body>, Response = Response<Body>> + Send + Clone + 'static,
    H::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    H::Future: Send + 'static,
{
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr, handler: None }
    }

    pub fn with_handler(mut self, handler: H) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Bind the listener and serve on a background task until `signal`
    /// resolves. After that the listener stops accepting and in-flight
    /// connections drain; [`ServerHandle::stopped`] waits for the drain.
    pub async fn spawn<F>(self, signal: F) -> Result<ServerHandle>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handler = self
            .handler
            .context("handler must be set via with_handler()")?;

        let listener = bind_tcp(self.addr).await?;
        let local_addr = listener.local_addr()?;

        let make_service = make_service_fn(move |_| {
            let svc = handler.clone();
            async move { Ok::<_, Infallible>(svc) }
        });

        let server = Server::from_tcp(listener.into_std()?)?
            .serve(make_service)
            .with_graceful_shutdown(signal);
        tracing::info!("HTTP server listening on {}", local_addr);

        let task = tokio::spawn(async move {
            let result = server.await;
            tracing::info!("HTTP server stopped");
            result
        });

        Ok(ServerHandle { local_addr, task })
    }
}

pub struct ServerHandle {
    local_addr: SocketAddr,
    task: JoinHandle<hyper::Result<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Resolves once the server has stopped and every connection drained.
    pub async fn stopped(self) -> Result<()> {
        self.task
            .await
            .context("HTTP server task failed")?
            .context("HTTP server error")?;
        Ok(())
    }
}
