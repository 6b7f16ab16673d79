//! Tests against a server listening on a real socket.

use std::time::Duration;

use serde_json::json;

use request_observability::config::ServiceConfig;
use request_observability::observability::metrics::{
    sample_value, HTTP_REQUESTS_TOTAL, PROCESS_START_TIME,
};

mod common;

#[tokio::test]
async fn test_request_id_over_http() {
    let server = common::start_server(ServiceConfig::default(), common::todo_routes()).await;
    let client = reqwest::Client::new();

    let response = client
        .get(server.url("/api/v1/todos/1"))
        .header("x-request-id", "abc-123")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["x-request-id"], "abc-123");
    response.text().await.unwrap();

    let response = client.get(server.url("/health")).send().await.unwrap();
    let generated = response.headers()["x-request-id"].to_str().unwrap().to_string();
    assert!(uuid::Uuid::parse_str(&generated).is_ok());
    response.text().await.unwrap();

    let completed = common::wait_for_records(&server.sink, "Request completed", 2).await;
    assert_eq!(completed[0].field("requestId"), Some(&json!("abc-123")));
    assert_eq!(completed[1].field("requestId"), Some(&json!(generated)));

    let incoming = server.sink.with_message("Incoming request");
    assert_eq!(incoming[0].field("ip"), Some(&json!("127.0.0.1")));

    server.shutdown.trigger();
    server.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_scrape_after_traffic() {
    let server = common::start_server(ServiceConfig::default(), common::todo_routes()).await;
    let client = reqwest::Client::new();

    for id in 1..=3 {
        client
            .get(server.url(&format!("/api/v1/todos/{}", id)))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
    }
    common::wait_for_records(&server.sink, "Request completed", 3).await;

    let response = client
        .get(server.url("/prometheus/metrics"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-type"],
        "text/plain; version=0.0.4"
    );
    let body = response.text().await.unwrap();
    assert_eq!(
        sample_value(
            &body,
            HTTP_REQUESTS_TOTAL,
            &[("method", "GET"), ("path", "/api/v1/todos/{id}"), ("status", "200")]
        ),
        Some(3.0)
    );
    assert!(body.contains("# TYPE http_server_request_duration_seconds histogram"));
    assert!(sample_value(&body, PROCESS_START_TIME, &[]).is_some());

    server.shutdown.trigger();
    server.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_graceful_shutdown_waits_for_in_flight_requests() {
    let server = common::start_server(ServiceConfig::default(), common::todo_routes()).await;
    let url = server.url("/api/v1/todos");

    let in_flight = tokio::spawn(async move { reqwest::get(url).await?.text().await });
    common::wait_for_records(&server.sink, "Incoming request", 1).await;
    server.shutdown.trigger();

    let body = in_flight.await.unwrap().unwrap();
    assert!(body.contains("write tests"));
    tokio::time::timeout(Duration::from_secs(5), server.handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(server.sink.with_message("Request completed").len(), 1);
}
