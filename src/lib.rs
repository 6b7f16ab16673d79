//! Request observability for Axum services.
//!
//! Wraps an application router with a pipeline that correlates each request
//! with an ID and a trace context, emits structured entry/exit records with
//! sensitive values masked, and meters completed requests for Prometheus.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;

pub use config::ServiceConfig;
pub use http::HttpServer;
pub use lifecycle::{Pipeline, Shutdown};
