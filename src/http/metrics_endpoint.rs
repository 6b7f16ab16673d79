//! Prometheus scrape endpoint.

use std::sync::Arc;

use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    routing::get,
    Router,
};

use crate::observability::metrics::{MetricsRecorder, EXPOSITION_CONTENT_TYPE};

/// Router serving the registry snapshot on `path`.
pub fn metrics_routes(path: &str, recorder: Arc<MetricsRecorder>) -> Router {
    Router::new()
        .route(path, get(render_metrics))
        .with_state(recorder)
}

/// Current snapshot in the text exposition format. Always 200.
pub async fn render_metrics(State(recorder): State<Arc<MetricsRecorder>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)],
        recorder.snapshot(),
    )
}
