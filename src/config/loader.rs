//! Configuration loading from disk and the process environment.

use std::fs;
use std::net::SocketAddr;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::{ServiceConfig, SinkKind};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid value for {name}: {value}")]
    Env { name: &'static str, value: String },
    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load configuration: optional TOML file, then environment overrides, then validation.
pub fn load_config(path: Option<&Path>) -> Result<ServiceConfig, ConfigError> {
    let config = match path {
        Some(path) => parse_config(&fs::read_to_string(path)?)?,
        None => ServiceConfig::default(),
    };
    let config = apply_env(config, |name| std::env::var(name).ok())?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Parse a TOML document without touching the environment.
pub fn parse_config(content: &str) -> Result<ServiceConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Overlay the deployment environment variables onto a configuration.
///
/// Recognised: `APP_PORT`, `LOG_LEVEL`, `LOKI_HOST`, `APP_NAME`, `APP_ENV`
/// (falling back to `NODE_ENV`), `SERVICE_NAME` and
/// `OTEL_EXPORTER_OTLP_ENDPOINT`. Setting `LOKI_HOST` also selects the Loki
/// sink.
pub fn apply_env<F>(mut config: ServiceConfig, lookup: F) -> Result<ServiceConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(port) = lookup("APP_PORT") {
        let port: u16 = port.trim().parse().map_err(|_| ConfigError::Env {
            name: "APP_PORT",
            value: port.clone(),
        })?;
        config.listener.bind_address = match config.listener.bind_address.parse::<SocketAddr>() {
            Ok(mut addr) => {
                addr.set_port(port);
                addr.to_string()
            }
            Err(_) => format!("0.0.0.0:{}", port),
        };
    }

    if let Some(level) = lookup("LOG_LEVEL") {
        config.logging.level = level;
    }

    if let Some(host) = lookup("LOKI_HOST") {
        config.logging.loki.host = host;
        config.logging.sink = SinkKind::Loki;
    }

    if let Some(name) = lookup("APP_NAME") {
        config.logging.loki.labels.insert("application".to_string(), name);
    }

    if let Some(env) = lookup("APP_ENV").or_else(|| lookup("NODE_ENV")) {
        config.logging.loki.labels.insert("environment".to_string(), env.clone());
        config.logging.environment = env;
    }

    if let Some(service) = lookup("SERVICE_NAME") {
        config.logging.loki.labels.insert("service".to_string(), service.clone());
        config.logging.service_name = service;
    }

    if let Some(endpoint) = lookup("OTEL_EXPORTER_OTLP_ENDPOINT") {
        config.tracing.otlp_endpoint = Some(endpoint);
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_parse_partial_config() {
        let config = parse_config(
            r#"
            [metrics]
            tracked_prefixes = ["/api/v2/"]
            status_label = "class"

            [redaction]
            nested = true
            "#,
        )
        .unwrap();

        assert_eq!(config.metrics.tracked_prefixes, vec!["/api/v2/".to_string()]);
        assert!(config.redaction.nested);
        // Untouched sections keep their defaults
        assert_eq!(config.correlation.header, "x-request-id");
        assert_eq!(config.metrics.path, "/prometheus/metrics");
    }

    #[test]
    fn test_env_overlay() {
        let config = apply_env(
            ServiceConfig::default(),
            env(&[
                ("APP_PORT", "8088"),
                ("LOG_LEVEL", "debug"),
                ("LOKI_HOST", "http://logs:3100"),
                ("APP_NAME", "todo"),
                ("APP_ENV", "production"),
                ("SERVICE_NAME", "todo-api"),
            ]),
        )
        .unwrap();

        assert_eq!(config.listener.bind_address, "0.0.0.0:8088");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.sink, SinkKind::Loki);
        assert_eq!(config.logging.loki.host, "http://logs:3100");
        assert_eq!(config.logging.loki.labels["application"], "todo");
        assert_eq!(config.logging.loki.labels["environment"], "production");
        assert_eq!(config.logging.environment, "production");
        assert_eq!(config.logging.service_name, "todo-api");
    }

    #[test]
    fn test_node_env_is_a_fallback_for_app_env() {
        let config = apply_env(
            ServiceConfig::default(),
            env(&[("NODE_ENV", "staging"), ("OTEL_EXPORTER_OTLP_ENDPOINT", "http://otel:4317")]),
        )
        .unwrap();
        assert_eq!(config.logging.environment, "staging");
        assert_eq!(config.logging.loki.labels["environment"], "staging");
        assert_eq!(config.tracing.otlp_endpoint.as_deref(), Some("http://otel:4317"));

        let config = apply_env(
            ServiceConfig::default(),
            env(&[("NODE_ENV", "staging"), ("APP_ENV", "production")]),
        )
        .unwrap();
        assert_eq!(config.logging.environment, "production");
    }

    #[test]
    fn test_env_overlay_rejects_bad_port() {
        let err = apply_env(ServiceConfig::default(), env(&[("APP_PORT", "http")])).unwrap_err();
        assert!(matches!(err, ConfigError::Env { name: "APP_PORT", .. }));
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_config(Some(Path::new("definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
