//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, capacities > 0)
//! - Check histogram buckets, header names, paths and URLs
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServiceConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use axum::http::HeaderName;
use thiserror::Error;

use crate::config::schema::{ServiceConfig, SinkKind};
use crate::observability::logging::LogLevel;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Validate a configuration, collecting every error found.
pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<std::net::SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }

    if HeaderName::from_bytes(config.correlation.header.as_bytes()).is_err() {
        errors.push(ValidationError::new(
            "correlation.header",
            format!("'{}' is not a valid header name", config.correlation.header),
        ));
    }

    if config.logging.level.parse::<LogLevel>().is_err() {
        errors.push(ValidationError::new(
            "logging.level",
            format!("unknown level '{}'", config.logging.level),
        ));
    }
    if config.logging.batch.capacity == 0 {
        errors.push(ValidationError::new("logging.batch.capacity", "must be greater than 0"));
    }
    if config.logging.batch.batch_size == 0 {
        errors.push(ValidationError::new("logging.batch.batch_size", "must be greater than 0"));
    }
    if config.logging.batch.interval_secs == 0 {
        errors.push(ValidationError::new("logging.batch.interval_secs", "must be greater than 0"));
    }
    if config.logging.sink == SinkKind::Loki && url::Url::parse(&config.logging.loki.host).is_err() {
        errors.push(ValidationError::new(
            "logging.loki.host",
            format!("'{}' is not a URL", config.logging.loki.host),
        ));
    }

    if config.redaction.marker.is_empty() {
        errors.push(ValidationError::new("redaction.marker", "must not be empty"));
    }

    if !config.metrics.path.starts_with('/') {
        errors.push(ValidationError::new("metrics.path", "must start with '/'"));
    }
    if let Err(message) = check_buckets(&config.metrics.sla_buckets) {
        errors.push(ValidationError::new("metrics.sla_buckets", message));
    }
    if let Err(message) = check_buckets(&config.metrics.latency_buckets) {
        errors.push(ValidationError::new("metrics.latency_buckets", message));
    }

    if let Some(endpoint) = &config.tracing.otlp_endpoint {
        if url::Url::parse(endpoint).is_err() {
            errors.push(ValidationError::new(
                "tracing.otlp_endpoint",
                format!("'{}' is not a URL", endpoint),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_buckets(buckets: &[f64]) -> Result<(), String> {
    if buckets.is_empty() {
        return Err("must not be empty".to_string());
    }
    if buckets.iter().any(|b| !b.is_finite() || *b <= 0.0) {
        return Err("bounds must be finite and positive".to_string());
    }
    if buckets.windows(2).any(|w| w[0] >= w[1]) {
        return Err("bounds must be strictly increasing".to_string());
    }
    Ok(())
}
