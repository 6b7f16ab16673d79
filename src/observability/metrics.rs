//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define request metrics (count, last duration, latency histograms)
//! - Render the registry in the Prometheus text exposition format
//! - Decide which route templates are metered
//!
//! # Metrics
//! - `http_requests_total` (counter): requests by method, path, status
//! - `http_request_duration_seconds` (gauge): duration of the latest request
//! - `http_server_request_duration_seconds` (histogram): coarse SLA buckets
//! - `http_request_latency_percentiles_seconds` (histogram): fine buckets
//! - `process_cpu_seconds_total`, `process_resident_memory_bytes`,
//!   `process_open_fds`, `process_start_time_seconds`: sampled at scrape
//!   time when `metrics.process_metrics` is on (Linux only)
//!
//! # Design Decisions
//! - One recorder per instance; nothing is installed globally
//! - Low-overhead metric updates (atomic operations per label set)
//! - Labels use the route template, never the raw path
//! - Histogram buckets tuned for typical web latencies

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{
    BuildError, Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder,
};
use thiserror::Error;

use crate::config::{MetricsConfig, StatusLabel};

pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
pub const HTTP_REQUEST_DURATION: &str = "http_request_duration_seconds";
pub const HTTP_SERVER_REQUEST_DURATION: &str = "http_server_request_duration_seconds";
pub const HTTP_REQUEST_LATENCY: &str = "http_request_latency_percentiles_seconds";

pub const PROCESS_CPU_SECONDS: &str = "process_cpu_seconds_total";
pub const PROCESS_RESIDENT_MEMORY: &str = "process_resident_memory_bytes";
pub const PROCESS_OPEN_FDS: &str = "process_open_fds";
pub const PROCESS_START_TIME: &str = "process_start_time_seconds";

/// Content type of the text exposition format.
pub const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Errors that can occur while building the registry.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("Invalid histogram buckets for {metric}: {source}")]
    Buckets {
        metric: &'static str,
        #[source]
        source: BuildError,
    },
}

/// Per-request metrics registry.
pub struct MetricsRecorder {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
    tracked_prefixes: Vec<String>,
    status_label: StatusLabel,
    /// Unix time of construction, when process metrics are on.
    process_start: Option<f64>,
}

impl MetricsRecorder {
    pub fn new(config: &MetricsConfig) -> Result<Self, MetricsError> {
        let recorder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Full(HTTP_SERVER_REQUEST_DURATION.to_string()),
                &config.sla_buckets,
            )
            .map_err(|source| MetricsError::Buckets {
                metric: HTTP_SERVER_REQUEST_DURATION,
                source,
            })?
            .set_buckets_for_metric(
                Matcher::Full(HTTP_REQUEST_LATENCY.to_string()),
                &config.latency_buckets,
            )
            .map_err(|source| MetricsError::Buckets {
                metric: HTTP_REQUEST_LATENCY,
                source,
            })?
            .build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            describe_counter!(HTTP_REQUESTS_TOTAL, Unit::Count, "Total number of HTTP requests");
            describe_gauge!(
                HTTP_REQUEST_DURATION,
                Unit::Seconds,
                "Duration of HTTP requests in seconds"
            );
            describe_histogram!(
                HTTP_SERVER_REQUEST_DURATION,
                Unit::Seconds,
                "HTTP request duration in seconds with buckets"
            );
            describe_histogram!(
                HTTP_REQUEST_LATENCY,
                Unit::Seconds,
                "Request latency percentiles (e.g., 95th, 99th)"
            );

            if config.process_metrics {
                describe_counter!(
                    PROCESS_CPU_SECONDS,
                    Unit::Seconds,
                    "Total user and system CPU time spent in seconds"
                );
                describe_gauge!(
                    PROCESS_RESIDENT_MEMORY,
                    Unit::Bytes,
                    "Resident memory size in bytes"
                );
                describe_gauge!(PROCESS_OPEN_FDS, Unit::Count, "Number of open file descriptors");
                describe_gauge!(
                    PROCESS_START_TIME,
                    Unit::Seconds,
                    "Start time of the process since unix epoch in seconds"
                );
            }
        });

        let process_start = config.process_metrics.then(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs_f64()
        });

        Ok(Self {
            recorder,
            handle,
            tracked_prefixes: config.tracked_prefixes.clone(),
            status_label: config.status_label,
            process_start,
        })
    }

    /// Returns true if requests matched to `path_template` produce samples.
    pub fn tracks(&self, path_template: &str) -> bool {
        self.tracked_prefixes
            .iter()
            .any(|prefix| path_template.starts_with(prefix.as_str()))
    }

    /// Record one completed request.
    pub fn record_request(&self, method: &str, path_template: &str, status: u16, duration: Duration) {
        let seconds = duration.as_secs_f64();
        let status = self.status_label(status);

        metrics::with_local_recorder(&self.recorder, || {
            metrics::counter!(
                HTTP_REQUESTS_TOTAL,
                "method" => method.to_string(),
                "path" => path_template.to_string(),
                "status" => status.clone()
            )
            .increment(1);

            metrics::gauge!(
                HTTP_REQUEST_DURATION,
                "method" => method.to_string(),
                "path" => path_template.to_string(),
                "status" => status.clone()
            )
            .set(seconds);

            metrics::histogram!(
                HTTP_SERVER_REQUEST_DURATION,
                "method" => method.to_string(),
                "route" => path_template.to_string(),
                "status_code" => status.clone()
            )
            .record(seconds);

            metrics::histogram!(
                HTTP_REQUEST_LATENCY,
                "method" => method.to_string(),
                "path" => path_template.to_string(),
                "status" => status.clone()
            )
            .record(seconds);
        });
    }

    /// Render the registry in the text exposition format.
    pub fn snapshot(&self) -> String {
        self.collect_process_metrics();
        self.handle.render()
    }

    fn collect_process_metrics(&self) {
        let Some(start) = self.process_start else {
            return;
        };
        let stats = ProcessStats::read();

        metrics::with_local_recorder(&self.recorder, || {
            metrics::gauge!(PROCESS_START_TIME).set(start);
            if let Some(cpu_seconds) = stats.cpu_seconds {
                metrics::counter!(PROCESS_CPU_SECONDS).absolute(cpu_seconds as u64);
            }
            if let Some(bytes) = stats.resident_memory_bytes {
                metrics::gauge!(PROCESS_RESIDENT_MEMORY).set(bytes as f64);
            }
            if let Some(count) = stats.open_fds {
                metrics::gauge!(PROCESS_OPEN_FDS).set(count as f64);
            }
        });
    }

    fn status_label(&self, status: u16) -> String {
        match self.status_label {
            StatusLabel::Code => status.to_string(),
            StatusLabel::Class => format!("{}xx", status / 100),
        }
    }
}

impl std::fmt::Debug for MetricsRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRecorder")
            .field("tracked_prefixes", &self.tracked_prefixes)
            .field("status_label", &self.status_label)
            .finish_non_exhaustive()
    }
}

/// Resource usage of this process, read from `/proc`.
#[derive(Debug, Default, Clone, Copy)]
struct ProcessStats {
    cpu_seconds: Option<f64>,
    resident_memory_bytes: Option<u64>,
    open_fds: Option<u64>,
}

impl ProcessStats {
    #[cfg(target_os = "linux")]
    fn read() -> Self {
        use std::fs;

        // utime and stime, in clock ticks (100 per second on Linux)
        let cpu_seconds = fs::read_to_string("/proc/self/stat").ok().and_then(|stat| {
            // The command name may contain spaces; fields follow its closing paren
            let (_, fields) = stat.rsplit_once(')')?;
            let fields: Vec<&str> = fields.split_whitespace().collect();
            let utime = fields.get(11)?.parse::<u64>().ok()?;
            let stime = fields.get(12)?.parse::<u64>().ok()?;
            Some((utime + stime) as f64 / 100.0)
        });

        let resident_memory_bytes = fs::read_to_string("/proc/self/status").ok().and_then(|status| {
            let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
            let kb = line.split_whitespace().nth(1)?.parse::<u64>().ok()?;
            Some(kb * 1024)
        });

        let open_fds = fs::read_dir("/proc/self/fd")
            .ok()
            .map(|entries| entries.count() as u64);

        Self {
            cpu_seconds,
            resident_memory_bytes,
            open_fds,
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn read() -> Self {
        Self::default()
    }
}

/// Value of the sample `name{labels}` in a rendered snapshot.
///
/// Test support for asserting on scrapes. Every given label must be
/// present; other labels are ignored.
pub fn sample_value(snapshot: &str, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
    snapshot.lines().find_map(|line| {
        let rest = line.strip_prefix(name)?;
        let (label_set, value) = match rest.strip_prefix('{') {
            Some(rest) => rest.rsplit_once("} ")?,
            None => ("", rest.strip_prefix(' ')?),
        };
        let matches = labels.iter().all(|(key, val)| {
            label_set
                .split(',')
                .any(|pair| pair == format!("{}=\"{}\"", key, val))
        });
        if matches {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}
