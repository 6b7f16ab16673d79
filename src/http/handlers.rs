//! Demo application routes.
//!
//! Small enough to exercise the pipeline end to end: a health probe outside
//! the metered prefix and a couple of JSON endpoints inside it.

use axum::{
    extract::Path,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use serde_json::{json, Value};

use crate::http::middleware::RequestLogger;

pub fn demo_routes() -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/echo", post(echo))
        .route("/api/v1/todos/{id}", get(get_todo))
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn echo(Extension(RequestLogger(log)): Extension<RequestLogger>, Json(body): Json<Value>) -> impl IntoResponse {
    log.debug("Echoing request body", "EchoHandler", Value::Null);
    Json(body)
}

async fn get_todo(Path(id): Path<u64>) -> impl IntoResponse {
    if id == 0 {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": "Todo not found" })));
    }
    (StatusCode::OK, Json(json!({ "id": id, "title": format!("Todo {}", id), "done": false })))
}

/// Fallback for unmatched paths.
pub async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Not Found" })))
}
