//! End-to-end pipeline behaviour, driven in-process.

use std::collections::HashSet;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    routing::get,
    Router,
};
use futures_util::future::join_all;
use serde_json::json;
use tower::ServiceExt;

use request_observability::config::ServiceConfig;
use request_observability::observability::metrics::{
    sample_value, HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION,
};
use request_observability::observability::tracing::TRACEPARENT;

mod common;

#[tokio::test(start_paused = true)]
async fn test_get_todos_scenario() {
    let _tracer = common::install_tracer();
    let app = common::build_app(&ServiceConfig::default(), common::todo_routes());

    let response = app
        .router
        .oneshot(common::get_request("/api/v1/todos?page=2"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let request_id = response.headers()["x-request-id"].to_str().unwrap().to_string();
    common::read_body(response).await;

    let records = app.sink.records();
    assert_eq!(records.len(), 2);

    let incoming = &records[0];
    assert_eq!(incoming.msg, "Incoming request");
    assert_eq!(incoming.context, "HttpLogger");
    assert_eq!(incoming.field("method"), Some(&json!("GET")));
    assert_eq!(incoming.field("url"), Some(&json!("/api/v1/todos?page=2")));
    assert_eq!(incoming.field("route"), Some(&json!("/api/v1/todos")));
    assert_eq!(incoming.field("query"), Some(&json!("page=2")));
    assert_eq!(incoming.field("requestId"), Some(&json!(request_id)));

    let completed = &records[1];
    assert_eq!(completed.msg, "Request completed");
    assert_eq!(completed.field("statusCode"), Some(&json!(200)));
    assert_eq!(completed.field("duration"), Some(&json!(42)));
    assert_eq!(completed.trace_id, incoming.trace_id);
    assert_eq!(completed.trace_id.len(), 32);
    assert_eq!(completed.bindings["env"], "development");

    let recorder = app.pipeline.recorder.as_ref().unwrap();
    let snapshot = recorder.snapshot();
    let labels = [("method", "GET"), ("path", "/api/v1/todos"), ("status", "200")];
    assert_eq!(sample_value(&snapshot, HTTP_REQUESTS_TOTAL, &labels), Some(1.0));
    assert_eq!(sample_value(&snapshot, HTTP_REQUEST_DURATION, &labels), Some(0.042));
    assert_eq!(
        sample_value(
            &snapshot,
            "http_server_request_duration_seconds_sum",
            &[("route", "/api/v1/todos"), ("status_code", "200")]
        ),
        Some(0.042)
    );
}

#[tokio::test]
async fn test_inbound_request_id_is_echoed() {
    let app = common::build_app(&ServiceConfig::default(), common::todo_routes());

    let response = app
        .router
        .oneshot(
            Request::get("/api/v1/todos/7")
                .header("x-request-id", "abc-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.headers()["x-request-id"], "abc-123");
    common::read_body(response).await;

    let records = app.sink.records();
    assert_eq!(records.len(), 2);
    assert!(records
        .iter()
        .all(|r| r.field("requestId") == Some(&json!("abc-123"))));
}

#[tokio::test]
async fn test_concurrent_requests_get_distinct_ids() {
    let _tracer = common::install_tracer();
    let app = common::build_app(&ServiceConfig::default(), common::todo_routes());

    let responses = join_all((0..100).map(|i| {
        app.router
            .clone()
            .oneshot(common::get_request(&format!("/api/v1/todos/{}", i)))
    }))
    .await;

    let mut ids = HashSet::new();
    for response in responses {
        let response = response.unwrap();
        ids.insert(response.headers()["x-request-id"].to_str().unwrap().to_string());
        common::read_body(response).await;
    }
    assert_eq!(ids.len(), 100);

    // Every request's records agree on its ID and trace
    for completed in app.sink.with_message("Request completed") {
        let id = completed.field("requestId").unwrap().clone();
        let incoming: Vec<_> = app
            .sink
            .with_message("Incoming request")
            .into_iter()
            .filter(|r| r.field("requestId") == Some(&id))
            .collect();
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].trace_id, completed.trace_id);
        assert_eq!(completed.trace_id.len(), 32);
    }
}

#[tokio::test]
async fn test_traceparent_is_continued() {
    let _tracer = common::install_tracer();
    let app = common::build_app(&ServiceConfig::default(), common::todo_routes());

    let response = app
        .router
        .oneshot(
            Request::get("/health")
                .header(
                    TRACEPARENT,
                    "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
                )
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    common::read_body(response).await;

    let records = app.sink.records();
    assert_eq!(records.len(), 2);
    for record in records {
        assert_eq!(record.trace_id, "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_ne!(record.span_id, "00f067aa0ba902b7");
    }
}

#[tokio::test]
async fn test_traceparent_ignored_when_not_accepted() {
    let _tracer = common::install_tracer();
    let mut config = ServiceConfig::default();
    config.tracing.accept_traceparent = false;
    let app = common::build_app(&config, common::todo_routes());

    let response = app
        .router
        .oneshot(
            Request::get("/health")
                .header(
                    TRACEPARENT,
                    "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
                )
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    common::read_body(response).await;

    for record in app.sink.records() {
        assert_eq!(record.trace_id.len(), 32);
        assert_ne!(record.trace_id, "4bf92f3577b34da6a3ce929d0e0e4736");
    }
}

#[tokio::test]
async fn test_tracing_disabled_marks_ids_undefined() {
    let _tracer = common::install_tracer();
    let mut config = ServiceConfig::default();
    config.tracing.enabled = false;
    let app = common::build_app(&config, common::todo_routes());

    let response = app.router.oneshot(common::get_request("/health")).await.unwrap();
    common::read_body(response).await;

    let records = app.sink.records();
    assert_eq!(records.len(), 2);
    for record in records {
        assert_eq!(record.trace_id, "undefined");
        assert_eq!(record.span_id, "undefined");
    }
}

#[tokio::test]
async fn test_sensitive_values_never_reach_the_sink() {
    let app = common::build_app(&ServiceConfig::default(), common::todo_routes());

    let response = app
        .router
        .oneshot(
            Request::post("/api/v1/todos")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::AUTHORIZATION, "Bearer abc.def")
                .header(header::COOKIE, "session=s3cr3t")
                .body(Body::from(
                    r#"{"title":"pay rent","token":"tok_live_1","credit_card":"4111111111111111"}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let echoed = common::read_body(response).await;
    assert!(String::from_utf8(echoed).unwrap().contains("tok_live_1"));

    let incoming = &app.sink.with_message("Incoming request")[0];
    assert_eq!(
        incoming.field("body"),
        Some(&json!({
            "title": "pay rent",
            "token": "[REDACTED]",
            "credit_card": "[REDACTED]",
        }))
    );

    for record in app.sink.records() {
        let line = record.to_line();
        for secret in ["abc.def", "s3cr3t", "tok_live_1", "4111111111111111"] {
            assert!(!line.contains(secret), "{} leaked in {}", secret, line);
        }
    }
}

#[tokio::test]
async fn test_non_json_body_is_masked_whole() {
    let app = common::build_app(&ServiceConfig::default(), common::todo_routes());

    let response = app
        .router
        .oneshot(
            Request::post("/api/v1/login")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from("user=alice&password=hunter2"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(common::read_body(response).await, b"user=alice&password=hunter2");

    let incoming = &app.sink.with_message("Incoming request")[0];
    assert_eq!(incoming.field("body"), Some(&json!("[REDACTED]")));
}

#[tokio::test]
async fn test_large_body_is_not_captured() {
    let mut config = ServiceConfig::default();
    config.redaction.max_body_bytes = 16;
    let app = common::build_app(&config, common::todo_routes());

    let payload = format!(r#"{{"title":"{}"}}"#, "x".repeat(64));
    let response = app
        .router
        .oneshot(
            Request::post("/api/v1/login")
                .body(Body::from(payload.clone()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(common::read_body(response).await, payload.as_bytes());

    let incoming = &app.sink.with_message("Incoming request")[0];
    assert_eq!(incoming.field("body"), Some(&json!(null)));
}

#[tokio::test]
async fn test_untracked_requests_are_logged_but_not_metered() {
    let app = common::build_app(&ServiceConfig::default(), common::todo_routes());

    for uri in ["/health", "/prometheus/metrics", "/does/not/exist"] {
        let response = app.router.clone().oneshot(common::get_request(uri)).await.unwrap();
        common::read_body(response).await;
    }

    assert_eq!(app.sink.with_message("Request completed").len(), 3);
    let snapshot = app.pipeline.recorder.as_ref().unwrap().snapshot();
    assert!(sample_value(&snapshot, HTTP_REQUESTS_TOTAL, &[]).is_none());
}

#[tokio::test]
async fn test_series_follow_route_templates() {
    let app = common::build_app(&ServiceConfig::default(), common::todo_routes());

    for id in 0..50 {
        let response = app
            .router
            .clone()
            .oneshot(common::get_request(&format!("/api/v1/todos/{}", id)))
            .await
            .unwrap();
        common::read_body(response).await;
    }

    let snapshot = app.pipeline.recorder.as_ref().unwrap().snapshot();
    assert_eq!(
        sample_value(&snapshot, HTTP_REQUESTS_TOTAL, &[("path", "/api/v1/todos/{id}")]),
        Some(50.0)
    );
    let series = snapshot
        .lines()
        .filter(|l| l.starts_with("http_requests_total{"))
        .count();
    assert_eq!(series, 1);
}

#[tokio::test]
async fn test_body_stream_error_is_a_failure() {
    let app = Router::new().route(
        "/api/v1/export",
        get(|| async {
            let chunks: Vec<Result<&'static str, std::io::Error>> = vec![
                Ok("id,title\n"),
                Err(std::io::Error::new(std::io::ErrorKind::Other, "database cursor lost")),
            ];
            Body::from_stream(futures_util::stream::iter(chunks))
        }),
    );
    let app = common::build_app(&ServiceConfig::default(), app);

    let response = app.router.oneshot(common::get_request("/api/v1/export")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(axum::body::to_bytes(response.into_body(), usize::MAX).await.is_err());

    let failed = app.sink.with_message("Request failed");
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].level.as_str(), "error");
    let message = failed[0].field("error").unwrap()["message"].as_str().unwrap();
    assert!(message.contains("database cursor lost"));
    assert!(app.sink.with_message("Request completed").is_empty());

    let snapshot = app.pipeline.recorder.as_ref().unwrap().snapshot();
    assert!(sample_value(&snapshot, HTTP_REQUESTS_TOTAL, &[]).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_request_is_reported_once() {
    let mut config = ServiceConfig::default();
    config.timeouts.request_secs = 2;
    let app = Router::new().route(
        "/api/v1/slow",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            "late"
        }),
    );
    let app = common::build_app(&config, app);

    let response = app.router.oneshot(common::get_request("/api/v1/slow")).await.unwrap();
    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    common::read_body(response).await;

    let terminal: Vec<_> = app
        .sink
        .records()
        .into_iter()
        .filter(|r| r.msg != "Incoming request")
        .collect();
    assert_eq!(terminal.len(), 1);
    assert_eq!(terminal[0].field("statusCode"), Some(&json!(408)));

    let snapshot = app.pipeline.recorder.as_ref().unwrap().snapshot();
    assert_eq!(
        sample_value(
            &snapshot,
            HTTP_REQUESTS_TOTAL,
            &[("path", "/api/v1/slow"), ("status", "408")]
        ),
        Some(1.0)
    );
}
