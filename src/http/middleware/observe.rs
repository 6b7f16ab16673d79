//! Request observability middleware.
//!
//! Per request:
//!
//! ```text
//! Entry      resolve request ID, open the request span (continuing an
//!            inbound traceparent), capture body, log "Incoming request"
//!            with redacted headers/body
//! In-flight  run the rest of the stack inside the request span
//! Completed  response body fully sent: log "Request completed",
//!            record metrics if the route template is tracked
//! Aborted    cancelled, body error or body dropped early: log
//!            "Request failed", no metrics
//! ```
//!
//! Exactly one of Completed/Aborted is reported. Cancellation is observed
//! through `Drop`, so a request whose future is dropped mid-flight still
//! produces its terminal record.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, MatchedPath, Request, State},
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use hyper::body::Body as HttpBody;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{Instrument, Span};
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::config::ServiceConfig;
use crate::http::request::{RequestId, X_REQUEST_ID};
use crate::http::response::{BodyOutcome, ObservedBody};
use crate::observability::logging::StructuredLogger;
use crate::observability::metrics::MetricsRecorder;
use crate::observability::redaction::RedactionPolicy;
use crate::observability::tracing::{extract_parent, TraceContext};

/// Source tag of the pipeline's records.
pub const SOURCE: &str = "HttpLogger";

/// Pipeline switches derived from configuration.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub request_id_header: HeaderName,
    pub log_bodies: bool,
    pub max_body_bytes: usize,
    pub tracing_enabled: bool,
    pub accept_traceparent: bool,
}

impl PipelineOptions {
    pub fn from_config(config: &ServiceConfig) -> Self {
        let request_id_header = HeaderName::from_bytes(config.correlation.header.as_bytes())
            .unwrap_or(HeaderName::from_static(X_REQUEST_ID));
        Self {
            request_id_header,
            log_bodies: config.redaction.log_bodies,
            max_body_bytes: config.redaction.max_body_bytes,
            tracing_enabled: config.tracing.enabled,
            accept_traceparent: config.tracing.accept_traceparent,
        }
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from_config(&ServiceConfig::default())
    }
}

/// Shared references handed to every request.
#[derive(Debug, Clone)]
pub struct ObservabilityState {
    pub logger: StructuredLogger,
    /// `None` when metrics are disabled.
    pub recorder: Option<Arc<MetricsRecorder>>,
    pub redaction: Arc<RedactionPolicy>,
    pub options: Arc<PipelineOptions>,
}

impl ObservabilityState {
    pub fn new(
        logger: StructuredLogger,
        recorder: Option<Arc<MetricsRecorder>>,
        redaction: RedactionPolicy,
        options: PipelineOptions,
    ) -> Self {
        Self {
            logger,
            recorder,
            redaction: Arc::new(redaction),
            options: Arc::new(options),
        }
    }
}

/// Request-scoped logger: the service logger bound to the request ID and
/// pinned to the request's trace context. Available to handlers as an
/// extension.
#[derive(Debug, Clone)]
pub struct RequestLogger(pub StructuredLogger);

/// What the pipeline remembers about a request between entry and its
/// terminal event.
#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub request_id: RequestId,
    pub method: Method,
    pub path: String,
    pub url: String,
    /// Route template, when the router matched one.
    pub route: Option<String>,
    pub client: Option<SocketAddr>,
    pub user_agent: Option<String>,
}

/// The middleware. Mount with `axum::middleware::from_fn_with_state`.
pub async fn observe_requests(
    State(state): State<ObservabilityState>,
    mut request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let options = state.options.clone();

    let request_id = RequestId::resolve(request.headers().get(&options.request_id_header));
    let span = tracing::info_span!(
        "http_request",
        otel.kind = "server",
        otel.status_code = tracing::field::Empty,
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path(),
        http.response.status_code = tracing::field::Empty,
    );
    let trace = if options.tracing_enabled {
        if let Some(parent) = extract_parent(request.headers(), options.accept_traceparent) {
            span.set_parent(parent);
        }
        TraceContext::from_otel(&span.context())
    } else {
        None
    };
    let logger = state
        .logger
        .with_trace_context(trace)
        .with_bindings([("requestId", request_id.as_str())]);

    if let Some(value) = request_id.header_value() {
        request
            .headers_mut()
            .insert(options.request_id_header.clone(), value);
    }
    request.extensions_mut().insert(request_id.clone());
    request.extensions_mut().insert(RequestLogger(logger.clone()));

    let record = RequestRecord {
        request_id: request_id.clone(),
        method: request.method().clone(),
        path: request.uri().path().to_string(),
        url: request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| request.uri().path().to_string()),
        route: request
            .extensions()
            .get::<MatchedPath>()
            .map(|p| p.as_str().to_string()),
        client: request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr),
        user_agent: request
            .headers()
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    };
    let entry = json!({
        "requestId": record.request_id.as_str(),
        "method": record.method.as_str(),
        "url": record.url,
        "path": record.path,
        "route": record.route,
        "query": request.uri().query(),
        "headers": state.redaction.redact_headers(request.headers()),
        "body": null,
        "ip": record.client.map(|addr| addr.ip().to_string()),
        "userAgent": record.user_agent,
    });

    // From here on, dropping this future still reports the request
    let mut in_flight = InFlight {
        record,
        logger,
        recorder: state.recorder.clone(),
        header: options.request_id_header.clone(),
        span: span.clone(),
        start,
        entry: Some(entry),
        done: false,
    };

    let (request, captured) = capture_body(request, &options).await;
    match captured {
        Ok(body) => in_flight.log_entry(state.redaction.redact_body(body.as_ref())),
        Err(message) => {
            in_flight.abort(&message, Vec::new());
            let mut response = StatusCode::BAD_REQUEST.into_response();
            if let Some(value) = request_id.header_value() {
                response
                    .headers_mut()
                    .insert(options.request_id_header.clone(), value);
            }
            return response;
        }
    }

    let response = next.run(request).instrument(span).await;
    in_flight.respond(response)
}

/// Buffer the request body for logging when it is small enough.
///
/// Returns the request (with an equivalent body) and the parsed body:
/// `Ok(None)` when nothing was captured, `Err` when reading the body failed.
async fn capture_body(
    request: Request,
    options: &PipelineOptions,
) -> (Request, Result<Option<Value>, String>) {
    let size = request.body().size_hint().upper();
    let capturable = options.log_bodies
        && matches!(size, Some(n) if n > 0 && n <= options.max_body_bytes as u64);
    if !capturable {
        return (request, Ok(None));
    }

    let (parts, body) = request.into_parts();
    match axum::body::to_bytes(body, options.max_body_bytes).await {
        Ok(bytes) => {
            let parsed = serde_json::from_slice::<Value>(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
            (Request::from_parts(parts, Body::from(bytes)), Ok(Some(parsed)))
        }
        Err(e) => (
            Request::from_parts(parts, Body::empty()),
            Err(format!("failed to read request body: {}", e)),
        ),
    }
}

/// A request between entry and its terminal event.
struct InFlight {
    record: RequestRecord,
    logger: StructuredLogger,
    recorder: Option<Arc<MetricsRecorder>>,
    header: HeaderName,
    span: Span,
    start: Instant,
    /// "Incoming request" metadata not yet logged.
    entry: Option<Value>,
    done: bool,
}

impl InFlight {
    /// Log "Incoming request" with the captured body, once.
    fn log_entry(&mut self, body: Option<Value>) {
        if let Some(mut entry) = self.entry.take() {
            entry["body"] = body.unwrap_or(Value::Null);
            self.logger.info("Incoming request", SOURCE, entry);
        }
    }

    /// Attach the request ID to the response and arrange for the terminal
    /// event to fire when the body ends.
    fn respond(self, response: Response) -> Response {
        let (mut parts, body) = response.into_parts();
        if let Some(value) = self.record.request_id.header_value() {
            parts.headers.insert(self.header.clone(), value);
        }

        let status = parts.status;
        let content_length = parts
            .headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v: &HeaderValue| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        let bodiless = self.record.method == Method::HEAD
            || status.is_informational()
            || status == StatusCode::NO_CONTENT
            || status == StatusCode::NOT_MODIFIED;
        if bodiless || body.is_end_stream() {
            self.complete(status, content_length.or(Some(0)));
            return Response::from_parts(parts, body);
        }

        let body = ObservedBody::new(
            body,
            Box::new(move |outcome| match outcome {
                BodyOutcome::Complete { bytes } => self.complete(status, content_length.or(Some(bytes))),
                BodyOutcome::Failed { message, sources } => self.abort(&message, sources),
                BodyOutcome::Disconnected { bytes } => self.abort(
                    &format!("client disconnected after {} of the response body bytes", bytes),
                    Vec::new(),
                ),
            }),
        );
        Response::from_parts(parts, Body::new(body))
    }

    fn complete(mut self, status: StatusCode, content_length: Option<u64>) {
        self.done = true;
        self.span.record("http.response.status_code", status.as_u16());
        let elapsed = self.start.elapsed();
        let record = &self.record;

        self.logger.info(
            "Request completed",
            SOURCE,
            json!({
                "requestId": record.request_id.as_str(),
                "method": record.method.as_str(),
                "url": record.url,
                "route": record.route,
                "statusCode": status.as_u16(),
                "duration": elapsed.as_millis() as u64,
                "contentLength": content_length,
                "userAgent": record.user_agent,
            }),
        );

        if let (Some(recorder), Some(route)) = (&self.recorder, &record.route) {
            if recorder.tracks(route) {
                recorder.record_request(record.method.as_str(), route, status.as_u16(), elapsed);
            }
        }
    }

    fn abort(mut self, message: &str, sources: Vec<String>) {
        self.done = true;
        self.report_failure(message, sources);
    }

    fn report_failure(&mut self, message: &str, sources: Vec<String>) {
        self.log_entry(None);
        self.span.record("otel.status_code", "error");
        let record = &self.record;
        self.logger.error(
            "Request failed",
            SOURCE,
            json!({
                "requestId": record.request_id.as_str(),
                "method": record.method.as_str(),
                "url": record.url,
                "route": record.route,
                "duration": self.start.elapsed().as_millis() as u64,
                "error": {
                    "message": message,
                    "stack": sources,
                },
            }),
        );
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if !self.done {
            self.done = true;
            self.report_failure("request cancelled before a response was produced", Vec::new());
        }
    }
}
