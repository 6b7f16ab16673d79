//! Distributed tracing support.
//!
//! # Responsibilities
//! - Extract W3C trace context (`traceparent`) from incoming requests
//! - Attach it to the request span so the span continues the caller's trace
//! - Export spans over OTLP when an endpoint is configured
//! - Expose the active trace/span ids to the structured logger
//!
//! # Design Decisions
//! - Spans are `tracing` spans; the OpenTelemetry layer gives them ids, so
//!   ids exist only while that layer is installed
//! - The provider is owned by [`Telemetry`], never a process global
//! - The logger only sees the `TraceContextProvider` capability, so it can be
//!   tested without any tracing backend

use axum::http::HeaderMap;
use opentelemetry::{
    propagation::{Extractor, TextMapPropagator},
    trace::{TraceContextExt, TracerProvider as _},
    Context as OtelContext, KeyValue,
};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    propagation::TraceContextPropagator,
    trace::{Config, Tracer, TracerProvider},
    Resource,
};
use thiserror::Error;
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::config::ServiceConfig;

/// W3C trace context header.
pub const TRACEPARENT: &str = "traceparent";

const SERVICE_NAME: &str = "service.name";
const DEPLOYMENT_ENVIRONMENT: &str = "deployment.environment";

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to build OTLP exporter for {endpoint}: {message}")]
    Exporter { endpoint: String, message: String },

    #[error("failed to shut down tracer provider: {0}")]
    Shutdown(String),
}

/// Identifiers of the active span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    /// 32 lowercase hex digits.
    pub trace_id: String,
    /// 16 lowercase hex digits.
    pub span_id: String,
    pub sampled: bool,
}

impl TraceContext {
    /// The ids of the span carried by `cx`, if it carries a valid one.
    pub fn from_otel(cx: &OtelContext) -> Option<Self> {
        let span = cx.span();
        let span_context = span.span_context();
        span_context.is_valid().then(|| Self {
            trace_id: span_context.trace_id().to_string(),
            span_id: span_context.span_id().to_string(),
            sampled: span_context.is_sampled(),
        })
    }

    /// The ids of the current `tracing` span.
    pub fn current() -> Option<Self> {
        Self::from_otel(&Span::current().context())
    }
}

/// Read the caller's trace context from request headers.
///
/// Returns `None` when inbound context is not accepted or the header is
/// missing or malformed; the request span then starts a new trace.
pub fn extract_parent(headers: &HeaderMap, accept_inbound: bool) -> Option<OtelContext> {
    if !accept_inbound {
        return None;
    }
    let cx = TraceContextPropagator::new().extract(&HeaderExtractor(headers));
    cx.span().span_context().is_valid().then_some(cx)
}

struct HeaderExtractor<'a>(&'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|k| k.as_str()).collect()
    }
}

/// Source of the active trace context.
pub trait TraceContextProvider: Send + Sync {
    fn current(&self) -> Option<TraceContext>;
}

/// Reads the ids of the current `tracing` span.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpanTraceContext;

impl TraceContextProvider for SpanTraceContext {
    fn current(&self) -> Option<TraceContext> {
        TraceContext::current()
    }
}

/// Always reports the same context.
#[derive(Debug, Clone)]
pub struct FixedTraceContext(pub TraceContext);

impl TraceContextProvider for FixedTraceContext {
    fn current(&self) -> Option<TraceContext> {
        Some(self.0.clone())
    }
}

/// Tracing disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTraceContext;

impl TraceContextProvider for NoTraceContext {
    fn current(&self) -> Option<TraceContext> {
        None
    }
}

/// The tracer provider behind the request spans.
///
/// Always assigns ids; exports spans in batches only when
/// `tracing.otlp_endpoint` is set.
pub struct Telemetry {
    provider: TracerProvider,
    tracer: Tracer,
    exporting: bool,
}

impl Telemetry {
    /// Build the provider. Must run inside a Tokio runtime when an OTLP
    /// endpoint is configured.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, TelemetryError> {
        let resource = Resource::new(vec![
            KeyValue::new(SERVICE_NAME, config.logging.service_name.clone()),
            KeyValue::new(DEPLOYMENT_ENVIRONMENT, config.logging.environment.clone()),
        ]);

        let mut builder =
            TracerProvider::builder().with_config(Config::default().with_resource(resource));

        let exporting = config.tracing.otlp_endpoint.is_some();
        if let Some(endpoint) = &config.tracing.otlp_endpoint {
            let exporter = opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .with_endpoint(endpoint)
                .build()
                .map_err(|e| TelemetryError::Exporter {
                    endpoint: endpoint.clone(),
                    message: e.to_string(),
                })?;
            builder = builder.with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio);
        }

        let provider = builder.build();
        let tracer = provider.tracer(config.logging.service_name.clone());

        tracing::debug!(
            service_name = %config.logging.service_name,
            otlp_endpoint = ?config.tracing.otlp_endpoint,
            "Tracer provider initialized"
        );

        Ok(Self {
            provider,
            tracer,
            exporting,
        })
    }

    pub fn tracer(&self) -> Tracer {
        self.tracer.clone()
    }

    /// Whether finished spans leave the process.
    pub fn exporting(&self) -> bool {
        self.exporting
    }

    /// Flush pending spans and stop the exporter.
    pub async fn shutdown(self) -> Result<(), TelemetryError> {
        let provider = self.provider;
        tokio::task::spawn_blocking(move || provider.shutdown())
            .await
            .map_err(|e| TelemetryError::Shutdown(e.to_string()))?
            .map_err(|e| TelemetryError::Shutdown(e.to_string()))
    }
}

/// Install a subscriber carrying only the OpenTelemetry layer on this thread.
#[cfg(test)]
pub(crate) fn install_test_tracer() -> tracing::subscriber::DefaultGuard {
    use tracing_subscriber::layer::SubscriberExt;

    let tracer = TracerProvider::builder().build().tracer("test");
    tracing::subscriber::set_default(
        tracing_subscriber::registry().with(tracing_opentelemetry::layer().with_tracer(tracer)),
    )
}
