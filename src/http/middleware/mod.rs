//! HTTP middleware.

pub mod observe;

pub use observe::{
    observe_requests, ObservabilityState, PipelineOptions, RequestLogger, RequestRecord,
};
