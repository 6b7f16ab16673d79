//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Mount the application routes and the metrics endpoint
//! - Wire up middleware (observability, timeout, body limit)
//! - Bind server to listener and serve until shutdown
//!
//! # Layer order (outermost first)
//! ```text
//! observe_requests → TimeoutLayer → RequestBodyLimitLayer → routes/fallback
//! ```
//! The pipeline sits outside the timeout so a timed-out request is still
//! reported, as a completed 408.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use axum::{middleware, Router};
use tokio::net::TcpListener;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer};

use crate::config::ServiceConfig;
use crate::http::handlers::not_found;
use crate::http::metrics_endpoint::metrics_routes;
use crate::http::middleware::{observe_requests, ObservabilityState};

/// HTTP server wrapping an application router with the request pipeline.
pub struct HttpServer {
    router: Router,
    config: ServiceConfig,
}

impl HttpServer {
    /// Wrap `app` with the pipeline described by `state`.
    pub fn new(config: ServiceConfig, app: Router, state: ObservabilityState) -> Self {
        let router = Self::build_router(&config, app, state);
        Self { router, config }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    pub fn build_router(config: &ServiceConfig, app: Router, state: ObservabilityState) -> Router {
        let mut router = app;
        if let (true, Some(recorder)) = (config.metrics.enabled, state.recorder.clone()) {
            router = router.merge(metrics_routes(&config.metrics.path, recorder));
        }

        router
            .fallback(not_found)
            .layer(RequestBodyLimitLayer::new(config.listener.max_body_size))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(middleware::from_fn_with_state(state, observe_requests))
    }

    /// The fully layered router, for in-process use.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server until `shutdown` resolves, then drain in-flight
    /// connections.
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            metrics_path = %self.config.metrics.path,
            "HTTP server starting"
        );

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }
}
