//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the service.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root configuration for the observed service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// Listener configuration (bind address, body limits).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Correlation identifier settings.
    pub correlation: CorrelationConfig,

    /// Structured logging and log shipping.
    pub logging: LoggingConfig,

    /// Sensitive field masking applied before anything is logged.
    pub redaction: RedactionConfig,

    /// Request metrics and the exposition endpoint.
    pub metrics: MetricsConfig,

    /// Trace context propagation.
    pub tracing: TracingConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:3000").
    pub bind_address: String,

    /// Maximum request body size accepted by the server, in bytes.
    pub max_body_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            max_body_size: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,

    /// Grace period for draining log sinks on shutdown, in seconds.
    pub shutdown_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            shutdown_secs: 10,
        }
    }
}

/// Correlation identifier settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Header read on the way in and written on the way out.
    pub header: String,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            header: "x-request-id".to_string(),
        }
    }
}

/// Output format for process diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

/// Where structured request records are shipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// JSON lines on stdout, batched.
    Stdout,
    /// Forwarded into the process `tracing` subscriber.
    #[default]
    Tracing,
    /// Batched HTTP push to a Loki instance.
    Loki,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum level (trace, debug, info, warn, error).
    pub level: String,

    /// Diagnostics format for the `tracing` subscriber.
    pub format: LogFormat,

    /// Record sink.
    pub sink: SinkKind,

    /// Deployment environment, bound into every record as `env`.
    pub environment: String,

    /// Service name, bound into every record as `service`.
    pub service_name: String,

    /// Batching parameters for the buffered sinks.
    pub batch: BatchConfig,

    /// Loki push settings, used when `sink = "loki"`.
    pub loki: LokiConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
            sink: SinkKind::default(),
            environment: "development".to_string(),
            service_name: "convohub-backend-api".to_string(),
            batch: BatchConfig::default(),
            loki: LokiConfig::default(),
        }
    }
}

/// Batching parameters for buffered sinks.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Flush interval in seconds.
    pub interval_secs: u64,

    /// Flush early once this many records are queued.
    pub batch_size: usize,

    /// Queue capacity; the oldest record is dropped on overflow.
    pub capacity: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            batch_size: 500,
            capacity: 10_000,
        }
    }
}

/// Loki push configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LokiConfig {
    /// Base URL of the Loki instance.
    pub host: String,

    /// Push request timeout in seconds.
    pub timeout_secs: u64,

    /// Static stream labels.
    pub labels: BTreeMap<String, String>,
}

impl Default for LokiConfig {
    fn default() -> Self {
        let mut labels = BTreeMap::new();
        labels.insert("application".to_string(), "convohub".to_string());
        labels.insert("environment".to_string(), "development".to_string());
        labels.insert("service".to_string(), "convohub-backend-api".to_string());
        labels.insert("hostname".to_string(), "convohub".to_string());
        Self {
            host: "http://loki:3100".to_string(),
            timeout_secs: 10,
            labels,
        }
    }
}

/// Redaction configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RedactionConfig {
    /// Header names masked in request logs (case-insensitive).
    pub headers: Vec<String>,

    /// Body field names masked in request logs (case-insensitive).
    pub body_fields: Vec<String>,

    /// Replacement value.
    pub marker: String,

    /// Recurse into nested objects and arrays instead of masking one level.
    pub nested: bool,

    /// Log request bodies at all.
    pub log_bodies: bool,

    /// Largest body buffered for logging, in bytes.
    pub max_body_bytes: usize,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            headers: vec![
                "authorization".to_string(),
                "cookie".to_string(),
                "password".to_string(),
            ],
            body_fields: vec![
                "password".to_string(),
                "token".to_string(),
                "secret".to_string(),
                "credit_card".to_string(),
            ],
            marker: "[REDACTED]".to_string(),
            nested: false,
            log_bodies: true,
            max_body_bytes: 64 * 1024,
        }
    }
}

/// How the HTTP status is rendered as a metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StatusLabel {
    /// Exact code, e.g. `"404"`.
    #[default]
    Code,
    /// Class, e.g. `"4xx"`.
    Class,
}

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Mount the exposition endpoint.
    pub enabled: bool,

    /// Path of the exposition endpoint.
    pub path: String,

    /// Route template prefixes that produce samples.
    pub tracked_prefixes: Vec<String>,

    /// Status label rendering.
    pub status_label: StatusLabel,

    /// Buckets of the coarse SLA histogram, in seconds.
    pub sla_buckets: Vec<f64>,

    /// Buckets of the fine-grained latency histogram, in seconds.
    pub latency_buckets: Vec<f64>,

    /// Also expose CPU, memory, file descriptor and start time gauges of
    /// this process.
    pub process_metrics: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/prometheus/metrics".to_string(),
            tracked_prefixes: vec!["/api/v1/".to_string()],
            status_label: StatusLabel::default(),
            sla_buckets: vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0],
            latency_buckets: vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0],
            process_metrics: true,
        }
    }
}

/// Trace context configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TracingConfig {
    /// Attach trace/span identifiers to request records.
    pub enabled: bool,

    /// Continue the caller's trace from an inbound `traceparent` header.
    pub accept_traceparent: bool,

    /// OTLP/gRPC collector endpoint. Spans are exported only when set.
    pub otlp_endpoint: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            accept_traceparent: true,
            otlp_endpoint: None,
        }
    }
}
