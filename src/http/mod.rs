//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, layer order)
//!     → middleware/observe.rs (request ID, trace context, entry record)
//!     → application handlers
//!     → response.rs (observe body until fully sent)
//!     → terminal record + metrics
//! ```

pub mod handlers;
pub mod metrics_endpoint;
pub mod middleware;
pub mod request;
pub mod response;
pub mod server;

pub use middleware::{observe_requests, ObservabilityState, PipelineOptions, RequestLogger};
pub use request::{RequestId, RequestIdExt, X_REQUEST_ID};
pub use server::HttpServer;
