//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the process diagnostics subscriber (`tracing`)
//! - Build leveled, structured request records with stable shape
//! - Attach the active trace/span identifiers to every record
//! - Hand records to a non-blocking sink
//!
//! # Design Decisions
//! - Uses tracing crate for process diagnostics
//! - JSON format for production, pretty format for development
//! - Request records always carry `traceId`/`spanId`; without an active
//!   trace both render as `"undefined"`
//! - Child loggers share the sink and copy their bindings

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};
use crate::observability::tracing::{
    FixedTraceContext, NoTraceContext, SpanTraceContext, Telemetry, TraceContext,
    TraceContextProvider,
};

/// Rendered in place of a missing trace or span id.
pub const UNDEFINED: &str = "undefined";

/// Record severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown level name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown log level '{0}'")]
pub struct ParseLevelError(pub String);

impl FromStr for LogLevel {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" | "verbose" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" | "log" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(ParseLevelError(s.to_string())),
        }
    }
}

/// One structured log record.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    /// Milliseconds since the Unix epoch.
    pub time: u64,
    pub level: LogLevel,
    pub msg: String,
    /// Source tag, e.g. `HttpLogger`.
    pub context: String,
    pub metadata: Value,
    pub trace_id: String,
    pub span_id: String,
    /// Base and child bindings.
    pub bindings: Map<String, Value>,
}

impl LogRecord {
    /// The record as a JSON object. Record fields take precedence over bindings.
    pub fn to_value(&self) -> Value {
        let mut object = self.bindings.clone();
        object.insert("time".to_string(), Value::from(self.time));
        object.insert("level".to_string(), Value::from(self.level.as_str()));
        object.insert("msg".to_string(), Value::from(self.msg.clone()));
        object.insert("context".to_string(), Value::from(self.context.clone()));
        object.insert("metadata".to_string(), self.metadata.clone());
        object.insert("traceId".to_string(), Value::from(self.trace_id.clone()));
        object.insert("spanId".to_string(), Value::from(self.span_id.clone()));
        Value::Object(object)
    }

    /// Single-line JSON text.
    pub fn to_line(&self) -> String {
        self.to_value().to_string()
    }

    /// Look up a metadata field.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }
}

impl Serialize for LogRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

/// Delivery counters of a sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SinkStats {
    /// Records delivered to the backend.
    pub exported: u64,
    /// Records discarded because the buffer was full or closed.
    pub dropped: u64,
    /// Records lost to failed exports.
    pub failed: u64,
}

/// Destination of structured records.
///
/// `emit` must return promptly and never fail into the caller; delivery
/// problems are counted and reported through [`LogSink::stats`].
pub trait LogSink: Send + Sync {
    fn emit(&self, record: LogRecord);

    fn stats(&self) -> SinkStats {
        SinkStats::default()
    }
}

/// Leveled structured logger.
#[derive(Clone)]
pub struct StructuredLogger {
    sink: Arc<dyn LogSink>,
    trace: Arc<dyn TraceContextProvider>,
    min_level: LogLevel,
    bindings: Arc<Map<String, Value>>,
}

impl StructuredLogger {
    /// A logger at `info` reading the current span's trace context.
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self {
            sink,
            trace: Arc::new(SpanTraceContext),
            min_level: LogLevel::Info,
            bindings: Arc::new(Map::new()),
        }
    }

    /// Build the service logger: level, `env`/`service` base fields and the
    /// trace capability selected by configuration.
    pub fn from_config(
        config: &LoggingConfig,
        tracing_enabled: bool,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        let level = config.level.parse().unwrap_or(LogLevel::Info);
        let trace: Arc<dyn TraceContextProvider> = if tracing_enabled {
            Arc::new(SpanTraceContext)
        } else {
            Arc::new(NoTraceContext)
        };

        Self::new(sink)
            .with_level(level)
            .with_trace_provider(trace)
            .with_bindings([
                ("env", config.environment.as_str()),
                ("service", config.service_name.as_str()),
            ])
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    pub fn with_trace_provider(mut self, trace: Arc<dyn TraceContextProvider>) -> Self {
        self.trace = trace;
        self
    }

    /// A child logger whose records carry `extra` in addition to this
    /// logger's bindings. The parent is unaffected.
    pub fn with_bindings<I, K, V>(&self, extra: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut bindings = (*self.bindings).clone();
        for (key, value) in extra {
            bindings.insert(key.into(), value.into());
        }
        Self {
            sink: self.sink.clone(),
            trace: self.trace.clone(),
            min_level: self.min_level,
            bindings: Arc::new(bindings),
        }
    }

    /// A child logger pinned to an explicit trace context.
    ///
    /// `None` keeps the current provider.
    pub fn with_trace_context(&self, ctx: Option<TraceContext>) -> Self {
        match ctx {
            Some(ctx) => self.clone().with_trace_provider(Arc::new(FixedTraceContext(ctx))),
            None => self.clone(),
        }
    }

    pub fn level(&self) -> LogLevel {
        self.min_level
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        level >= self.min_level
    }

    pub fn sink_stats(&self) -> SinkStats {
        self.sink.stats()
    }

    /// Emit one record.
    ///
    /// String messages are used as-is; any other serializable message is
    /// rendered as JSON text.
    pub fn emit<M>(&self, level: LogLevel, message: &M, source: &str, metadata: Value)
    where
        M: Serialize + ?Sized,
    {
        if !self.enabled(level) {
            return;
        }

        let (trace_id, span_id) = match self.trace.current() {
            Some(ctx) => (ctx.trace_id, ctx.span_id),
            None => (UNDEFINED.to_string(), UNDEFINED.to_string()),
        };

        self.sink.emit(LogRecord {
            time: now_millis(),
            level,
            msg: render_message(message),
            context: source.to_string(),
            metadata,
            trace_id,
            span_id,
            bindings: (*self.bindings).clone(),
        });
    }

    pub fn trace<M: Serialize + ?Sized>(&self, message: &M, source: &str, metadata: Value) {
        self.emit(LogLevel::Trace, message, source, metadata)
    }

    pub fn debug<M: Serialize + ?Sized>(&self, message: &M, source: &str, metadata: Value) {
        self.emit(LogLevel::Debug, message, source, metadata)
    }

    pub fn info<M: Serialize + ?Sized>(&self, message: &M, source: &str, metadata: Value) {
        self.emit(LogLevel::Info, message, source, metadata)
    }

    pub fn warn<M: Serialize + ?Sized>(&self, message: &M, source: &str, metadata: Value) {
        self.emit(LogLevel::Warn, message, source, metadata)
    }

    pub fn error<M: Serialize + ?Sized>(&self, message: &M, source: &str, metadata: Value) {
        self.emit(LogLevel::Error, message, source, metadata)
    }
}

impl fmt::Debug for StructuredLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StructuredLogger")
            .field("min_level", &self.min_level)
            .field("bindings", &self.bindings)
            .finish_non_exhaustive()
    }
}

fn render_message<M: Serialize + ?Sized>(message: &M) -> String {
    match serde_json::to_value(message) {
        Ok(Value::String(text)) => text,
        Ok(other) => other.to_string(),
        Err(e) => format!("<unserializable message: {}>", e),
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Initialize the process-wide `tracing` subscriber.
///
/// With `telemetry`, spans get OpenTelemetry ids (and are exported when the
/// provider has an exporter). `RUST_LOG` overrides the configured level.
pub fn init_tracing(
    config: &LoggingConfig,
    telemetry: Option<&Telemetry>,
) -> Result<(), tracing_subscriber::util::TryInitError> {
    let level = config.level.parse().unwrap_or(LogLevel::Info);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("request_observability={level},tower_http={level},warn").into()
    });
    let otel = telemetry.map(|t| tracing_opentelemetry::layer().with_tracer(t.tracer()));

    match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(otel)
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(otel)
            .with(tracing_subscriber::fmt::layer())
            .try_init(),
    }
}
