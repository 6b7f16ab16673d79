//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the log sink selected by configuration
//! - Build the service logger, metrics registry and redaction policy
//! - Hand the HTTP layer a ready [`ObservabilityState`]
//! - Drain batching sinks on shutdown
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Nothing is installed globally; each [`Pipeline`] owns its registry

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::{ServiceConfig, SinkKind};
use crate::http::middleware::{ObservabilityState, PipelineOptions};
use crate::observability::logging::{LogSink, SinkStats, StructuredLogger};
use crate::observability::metrics::{MetricsError, MetricsRecorder};
use crate::observability::redaction::RedactionPolicy;
use crate::observability::sink::{
    BatchingSink, ExportError, LokiExporter, StdoutExporter, TracingSink,
};

/// Errors that abort startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Metrics setup failed: {0}")]
    Metrics(#[from] MetricsError),
    #[error("Log exporter setup failed: {0}")]
    Exporter(#[from] ExportError),
}

/// Everything the request pipeline needs, built from one configuration.
pub struct Pipeline {
    pub logger: StructuredLogger,
    pub recorder: Option<Arc<MetricsRecorder>>,
    state: ObservabilityState,
    batching: Option<Arc<BatchingSink>>,
}

impl Pipeline {
    /// Build the pipeline with the sink selected by `config.logging.sink`.
    ///
    /// Must be called from within a Tokio runtime when a batching sink is
    /// selected.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, StartupError> {
        let batch = &config.logging.batch;
        let (sink, batching): (Arc<dyn LogSink>, Option<Arc<BatchingSink>>) =
            match config.logging.sink {
                SinkKind::Tracing => (Arc::new(TracingSink), None),
                SinkKind::Stdout => {
                    let sink = Arc::new(BatchingSink::spawn(StdoutExporter, batch));
                    (sink.clone() as Arc<dyn LogSink>, Some(sink))
                }
                SinkKind::Loki => {
                    let exporter = LokiExporter::new(&config.logging.loki)?;
                    tracing::info!(endpoint = %exporter.endpoint(), "Shipping logs to Loki");
                    let sink = Arc::new(BatchingSink::spawn(exporter, batch));
                    (sink.clone() as Arc<dyn LogSink>, Some(sink))
                }
            };

        let mut pipeline = Self::with_sink(config, sink)?;
        pipeline.batching = batching;
        Ok(pipeline)
    }

    /// Build the pipeline around an existing sink.
    pub fn with_sink(config: &ServiceConfig, sink: Arc<dyn LogSink>) -> Result<Self, StartupError> {
        let logger = StructuredLogger::from_config(&config.logging, config.tracing.enabled, sink);
        let recorder = if config.metrics.enabled {
            Some(Arc::new(MetricsRecorder::new(&config.metrics)?))
        } else {
            None
        };

        let state = ObservabilityState::new(
            logger.clone(),
            recorder.clone(),
            RedactionPolicy::from_config(&config.redaction),
            PipelineOptions::from_config(config),
        );

        Ok(Self {
            logger,
            recorder,
            state,
            batching: None,
        })
    }

    pub fn state(&self) -> ObservabilityState {
        self.state.clone()
    }

    pub fn sink_stats(&self) -> SinkStats {
        self.logger.sink_stats()
    }

    /// Flush queued records, giving up after `timeout`.
    pub async fn drain(&self, timeout: Duration) {
        let Some(batching) = &self.batching else {
            return;
        };
        if tokio::time::timeout(timeout, batching.shutdown()).await.is_err() {
            tracing::warn!(
                queued = batching.queued(),
                "Log drain timed out, remaining records discarded"
            );
        }
        let stats = batching.stats();
        tracing::info!(
            exported = stats.exported,
            dropped = stats.dropped,
            failed = stats.failed,
            "Log sink drained"
        );
    }
}
