//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::Path,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::layer::SubscriberExt;

use request_observability::config::ServiceConfig;
use request_observability::observability::logging::LogRecord;
use request_observability::observability::sink::MemorySink;
use request_observability::observability::tracing::Telemetry;
use request_observability::{HttpServer, Pipeline, Shutdown};

/// Routes resembling a small JSON API.
pub fn todo_routes() -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route(
            "/api/v1/todos",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(42)).await;
                Json(json!([{ "id": 1, "title": "write tests" }]))
            })
            .post(|Json(body): Json<Value>| async move { (StatusCode::CREATED, Json(body)) }),
        )
        .route(
            "/api/v1/todos/{id}",
            get(|Path(id): Path<u64>| async move { Json(json!({ "id": id })) }),
        )
        .route("/api/v1/login", post(|body: String| async move { body }))
}

/// Pipeline and layered router sharing one in-memory sink.
pub struct TestApp {
    pub router: Router,
    pub sink: Arc<MemorySink>,
    pub pipeline: Pipeline,
}

pub fn build_app(config: &ServiceConfig, app: Router) -> TestApp {
    let sink = Arc::new(MemorySink::new());
    let pipeline = Pipeline::with_sink(config, sink.clone()).unwrap();
    let router = HttpServer::build_router(config, app, pipeline.state());
    TestApp {
        router,
        sink,
        pipeline,
    }
}

/// A server bound to an ephemeral port.
pub struct RunningServer {
    pub addr: SocketAddr,
    pub sink: Arc<MemorySink>,
    pub pipeline: Pipeline,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<Result<(), std::io::Error>>,
}

impl RunningServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

pub async fn start_server(config: ServiceConfig, app: Router) -> RunningServer {
    let sink = Arc::new(MemorySink::new());
    let pipeline = Pipeline::with_sink(&config, sink.clone()).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server = HttpServer::new(config, app, pipeline.state());
    let handle = tokio::spawn(server.run(listener, shutdown.wait()));

    RunningServer {
        addr,
        sink,
        pipeline,
        shutdown,
        handle,
    }
}

/// Wait until `count` records with message `msg` exist.
pub async fn wait_for_records(sink: &MemorySink, msg: &str, count: usize) -> Vec<LogRecord> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let records = sink.with_message(msg);
        if records.len() >= count || tokio::time::Instant::now() > deadline {
            return records;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Give spans OpenTelemetry ids on this thread until the guard drops.
pub fn install_tracer() -> DefaultGuard {
    let telemetry = Telemetry::from_config(&ServiceConfig::default()).unwrap();
    tracing::subscriber::set_default(
        tracing_subscriber::registry()
            .with(tracing_opentelemetry::layer().with_tracer(telemetry.tracer())),
    )
}

pub fn get_request(uri: &str) -> axum::http::Request<Body> {
    axum::http::Request::get(uri).body(Body::empty()).unwrap()
}

pub async fn read_body(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}
