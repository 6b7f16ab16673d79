//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! HTTP pipeline produces:
//!     → logging.rs (structured records, leveled, with bindings)
//!     → metrics.rs (counters, gauges, histograms per route template)
//!     → tracing.rs (trace/span IDs, W3C traceparent)
//!
//! Consumers:
//!     → sink.rs (tracing subscriber, stdout JSON lines, Loki push)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID flows through every record of a request
//! - Metrics are cheap (atomic increments)
//! - Sensitive values are masked before anything reaches a sink

pub mod logging;
pub mod metrics;
pub mod redaction;
pub mod sink;
pub mod tracing;

pub use self::logging::{LogLevel, LogRecord, LogSink, StructuredLogger};
pub use self::metrics::MetricsRecorder;
pub use self::redaction::RedactionPolicy;
pub use self::tracing::TraceContext;
