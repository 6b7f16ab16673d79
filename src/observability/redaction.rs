//! Sensitive data redaction.
//!
//! # Responsibilities
//! - Mask sensitive headers before they reach a log sink
//! - Mask sensitive body fields before they reach a log sink
//!
//! # Design Decisions
//! - Key matching is case-insensitive, values are never inspected
//! - Inputs are borrowed; redaction always returns a copy
//! - One level deep by default: nested objects under non-sensitive keys are
//!   logged verbatim unless `nested` is enabled
//! - Anything that cannot be inspected key-by-key (non-object bodies,
//!   non-ASCII header values) is masked as a whole

use std::collections::HashSet;

use axum::http::HeaderMap;
use serde_json::{Map, Value};

use crate::config::RedactionConfig;

/// Default replacement value.
pub const REDACTED: &str = "[REDACTED]";

/// Header and body masking rules.
#[derive(Debug, Clone)]
pub struct RedactionPolicy {
    headers: HashSet<String>,
    body_fields: HashSet<String>,
    marker: String,
    nested: bool,
}

impl RedactionPolicy {
    /// Build a policy from explicit key sets. Keys are matched case-insensitively.
    pub fn new<H, B>(headers: H, body_fields: B) -> Self
    where
        H: IntoIterator,
        H::Item: AsRef<str>,
        B: IntoIterator,
        B::Item: AsRef<str>,
    {
        Self {
            headers: headers.into_iter().map(|h| h.as_ref().to_ascii_lowercase()).collect(),
            body_fields: body_fields.into_iter().map(|f| f.as_ref().to_ascii_lowercase()).collect(),
            marker: REDACTED.to_string(),
            nested: false,
        }
    }

    pub fn from_config(config: &RedactionConfig) -> Self {
        Self::new(&config.headers, &config.body_fields)
            .with_marker(config.marker.clone())
            .with_nested(config.nested)
    }

    /// Replace the redaction marker.
    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = marker.into();
        self
    }

    /// Recurse into nested objects and arrays.
    pub fn with_nested(mut self, nested: bool) -> Self {
        self.nested = nested;
        self
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Returns true if `name` is a sensitive header.
    pub fn is_sensitive_header(&self, name: &str) -> bool {
        self.headers.contains(&name.to_ascii_lowercase())
    }

    /// Returns true if `name` is a sensitive body field.
    pub fn is_sensitive_field(&self, name: &str) -> bool {
        self.body_fields.contains(&name.to_ascii_lowercase())
    }

    /// Copy a header map into a loggable object with sensitive values masked.
    ///
    /// Repeated headers are joined with `", "`.
    pub fn redact_headers(&self, headers: &HeaderMap) -> Map<String, Value> {
        let mut sanitized = Map::new();

        for name in headers.keys() {
            let value = if self.is_sensitive_header(name.as_str()) {
                self.marker.clone()
            } else {
                let values: Option<Vec<&str>> =
                    headers.get_all(name).iter().map(|v| v.to_str().ok()).collect();
                match values {
                    Some(values) => values.join(", "),
                    None => self.marker.clone(),
                }
            };
            sanitized.insert(name.as_str().to_string(), Value::String(value));
        }

        sanitized
    }

    /// Mask sensitive keys of a flat mapping.
    pub fn redact_fields(&self, fields: &Map<String, Value>) -> Map<String, Value> {
        fields
            .iter()
            .map(|(key, value)| {
                let value = if self.is_sensitive_field(key) {
                    Value::String(self.marker.clone())
                } else if self.nested {
                    self.redact_nested(value)
                } else {
                    value.clone()
                };
                (key.clone(), value)
            })
            .collect()
    }

    /// Mask a request body.
    ///
    /// `None` and `null` pass through. Objects are masked field by field;
    /// any other shape is replaced with the marker.
    pub fn redact_body(&self, body: Option<&Value>) -> Option<Value> {
        match body? {
            Value::Null => Some(Value::Null),
            Value::Object(fields) => Some(Value::Object(self.redact_fields(fields))),
            _ => Some(Value::String(self.marker.clone())),
        }
    }

    fn redact_nested(&self, value: &Value) -> Value {
        match value {
            Value::Object(fields) => Value::Object(self.redact_fields(fields)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.redact_nested(v)).collect()),
            other => other.clone(),
        }
    }
}

impl Default for RedactionPolicy {
    fn default() -> Self {
        Self::from_config(&RedactionConfig::default())
    }
}
