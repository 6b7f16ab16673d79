//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! .env file (optional, dotenv)
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → loader.rs (environment overrides)
//!     → validation.rs (semantic checks)
//!     → ServiceConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is loaded once at startup and never changes afterwards
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    BatchConfig, CorrelationConfig, ListenerConfig, LogFormat, LoggingConfig, LokiConfig,
    MetricsConfig, RedactionConfig, ServiceConfig, SinkKind, StatusLabel, TimeoutConfig,
    TracingConfig,
};
