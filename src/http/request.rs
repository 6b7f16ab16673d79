//! Request correlation.
//!
//! # Responsibilities
//! - Reuse the caller's request ID or generate a unique one (UUID v4)
//! - Make the ID available to everything downstream of the pipeline
//!
//! # Design Decisions
//! - Request ID assigned as early as possible for tracing
//! - A malformed inbound ID is treated as absent, never as an error
//! - The ID travels in request extensions, not in global state

use std::fmt;

use axum::http::{HeaderValue, Request};
use uuid::Uuid;

/// Default correlation header.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Longest inbound ID accepted verbatim.
pub const MAX_REQUEST_ID_LEN: usize = 128;

/// Correlation identifier of one request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(String);

impl RequestId {
    /// A fresh random ID.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Reuse a well-formed inbound value, otherwise generate a new ID.
    pub fn resolve(inbound: Option<&HeaderValue>) -> Self {
        inbound.and_then(Self::from_header).unwrap_or_else(Self::generate)
    }

    /// Accepts visible ASCII, non-empty, at most [`MAX_REQUEST_ID_LEN`] bytes.
    pub fn from_header(value: &HeaderValue) -> Option<Self> {
        let value = value.to_str().ok()?.trim();
        if value.is_empty() || value.len() > MAX_REQUEST_ID_LEN {
            return None;
        }
        Some(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn header_value(&self) -> Option<HeaderValue> {
        HeaderValue::from_str(&self.0).ok()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Access to the request ID assigned by the pipeline.
pub trait RequestIdExt {
    fn request_id(&self) -> Option<&RequestId>;
}

impl<B> RequestIdExt for Request<B> {
    fn request_id(&self) -> Option<&RequestId> {
        self.extensions().get::<RequestId>()
    }
}
