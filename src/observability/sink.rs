//! Log sinks.
//!
//! # Responsibilities
//! - Accept records from request handling without blocking it
//! - Batch records and ship them to stdout or a Loki instance
//! - Count drops and failed exports instead of surfacing them
//!
//! # Design Decisions
//! - Bounded queue; on overflow the oldest record is dropped
//! - A single background task per batching sink flushes on an interval or
//!   as soon as a full batch is queued
//! - Shutdown drains whatever is still queued

use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::config::{BatchConfig, LokiConfig};
use crate::observability::logging::{LogLevel, LogRecord, LogSink, SinkStats};

/// Error type for exporters.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Backend rejected batch with status {0}")]
    Status(u16),
}

/// Ships one batch of records to a backend.
pub trait LogExporter: Send + Sync + 'static {
    fn export(&self, batch: &[LogRecord]) -> impl Future<Output = Result<(), ExportError>> + Send;
}

struct Shared {
    queue: Mutex<VecDeque<LogRecord>>,
    capacity: usize,
    batch_size: usize,
    wake: Notify,
    closed: AtomicBool,
    exported: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

impl Shared {
    fn queue(&self) -> MutexGuard<'_, VecDeque<LogRecord>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_batch(&self) -> Vec<LogRecord> {
        let mut queue = self.queue();
        let n = queue.len().min(self.batch_size);
        queue.drain(..n).collect()
    }
}

/// Buffered sink with a background flush task.
pub struct BatchingSink {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl BatchingSink {
    /// Start the flush task. Must be called from within a Tokio runtime.
    pub fn spawn<E: LogExporter>(exporter: E, config: &BatchConfig) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::with_capacity(config.capacity.min(4096))),
            capacity: config.capacity.max(1),
            batch_size: config.batch_size.max(1),
            wake: Notify::new(),
            closed: AtomicBool::new(false),
            exported: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        });
        let interval = Duration::from_secs(config.interval_secs.max(1));
        let worker = tokio::spawn(run_flusher(shared.clone(), exporter, interval));

        Self {
            shared,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Records currently queued.
    pub fn queued(&self) -> usize {
        self.shared.queue().len()
    }

    /// Stop accepting records, flush the queue and wait for the flush task.
    pub async fn shutdown(&self) {
        self.close();
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Log flush task failed");
            }
        }
    }

    fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.wake.notify_one();
    }
}

impl LogSink for BatchingSink {
    fn emit(&self, record: LogRecord) {
        if self.shared.closed.load(Ordering::Acquire) {
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let queued = {
            let mut queue = self.shared.queue();
            if queue.len() >= self.shared.capacity {
                queue.pop_front();
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            }
            queue.push_back(record);
            queue.len()
        };

        if queued >= self.shared.batch_size {
            self.shared.wake.notify_one();
        }
    }

    fn stats(&self) -> SinkStats {
        SinkStats {
            exported: self.shared.exported.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
        }
    }
}

impl Drop for BatchingSink {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_flusher<E: LogExporter>(shared: Arc<Shared>, exporter: E, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shared.wake.notified() => {}
        }

        flush(&shared, &exporter).await;

        if shared.closed.load(Ordering::Acquire) {
            flush(&shared, &exporter).await;
            break;
        }
    }

    tracing::debug!("Log flush task stopped");
}

async fn flush<E: LogExporter>(shared: &Shared, exporter: &E) {
    loop {
        let batch = shared.next_batch();
        if batch.is_empty() {
            return;
        }
        let n = batch.len() as u64;

        match exporter.export(&batch).await {
            Ok(()) => {
                shared.exported.fetch_add(n, Ordering::Relaxed);
            }
            Err(e) => {
                shared.failed.fetch_add(n, Ordering::Relaxed);
                tracing::warn!(error = %e, records = n, "Log export failed, batch discarded");
            }
        }
    }
}

/// Writes JSON lines to stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutExporter;

impl LogExporter for StdoutExporter {
    async fn export(&self, batch: &[LogRecord]) -> Result<(), ExportError> {
        let mut buf = String::new();
        for record in batch {
            buf.push_str(&record.to_line());
            buf.push('\n');
        }

        let mut stdout = tokio::io::stdout();
        stdout.write_all(buf.as_bytes()).await?;
        stdout.flush().await?;
        Ok(())
    }
}

/// Pushes batches to Loki's HTTP push API, one stream per level.
#[derive(Debug, Clone)]
pub struct LokiExporter {
    client: reqwest::Client,
    endpoint: String,
    labels: BTreeMap<String, String>,
}

impl LokiExporter {
    pub fn new(config: &LokiConfig) -> Result<Self, ExportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/loki/api/v1/push", config.host.trim_end_matches('/')),
            labels: config.labels.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Request body for one batch.
    pub fn push_body(&self, batch: &[LogRecord]) -> Value {
        let mut by_level: BTreeMap<LogLevel, Vec<Value>> = BTreeMap::new();
        for record in batch {
            let nanos = u128::from(record.time) * 1_000_000;
            by_level
                .entry(record.level)
                .or_default()
                .push(json!([nanos.to_string(), record.to_line()]));
        }

        let streams: Vec<Value> = by_level
            .into_iter()
            .map(|(level, values)| {
                let mut stream: serde_json::Map<String, Value> = self
                    .labels
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from(v.clone())))
                    .collect();
                stream.insert("level".to_string(), Value::from(level.as_str()));
                json!({ "stream": stream, "values": values })
            })
            .collect();

        json!({ "streams": streams })
    }
}

impl LogExporter for LokiExporter {
    async fn export(&self, batch: &[LogRecord]) -> Result<(), ExportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&self.push_body(batch))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ExportError::Status(status.as_u16()))
        }
    }
}

/// Forwards each record to the process `tracing` subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, record: LogRecord) {
        let line = record.to_line();
        match record.level {
            LogLevel::Trace => tracing::trace!(source = %record.context, record = %line, "{}", record.msg),
            LogLevel::Debug => tracing::debug!(source = %record.context, record = %line, "{}", record.msg),
            LogLevel::Info => tracing::info!(source = %record.context, record = %line, "{}", record.msg),
            LogLevel::Warn => tracing::warn!(source = %record.context, record = %line, "{}", record.msg),
            LogLevel::Error => tracing::error!(source = %record.context, record = %line, "{}", record.msg),
        }
    }
}

/// Keeps records in memory, for tests and local inspection.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<LogRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Records with the given message, in emission order.
    pub fn with_message(&self, msg: &str) -> Vec<LogRecord> {
        self.records().into_iter().filter(|r| r.msg == msg).collect()
    }
}

impl LogSink for MemorySink {
    fn emit(&self, record: LogRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }
}
