//! Request observability demo service.
//!
//! ```text
//!     Client Request
//!     ──────────▶ observe_requests ──▶ timeout ──▶ body limit ──▶ handlers
//!                   │      ▲
//!                   │      └── response body observed until fully sent
//!                   ▼
//!    log sink (tracing / stdout / Loki)   OTLP spans   metrics registry
//!                                                     ▲
//!     GET /prometheus/metrics ────────────────────────┘
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use request_observability::config::load_config;
use request_observability::http::handlers::demo_routes;
use request_observability::lifecycle::signals::trigger_on_signal;
use request_observability::observability::logging::init_tracing;
use request_observability::observability::tracing::Telemetry;
use request_observability::{HttpServer, Pipeline, Shutdown};

#[derive(Parser)]
#[command(name = "request-observability")]
#[command(about = "HTTP service with request logging, tracing and Prometheus metrics", long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let config = load_config(args.config.as_deref())?;
    let telemetry = if config.tracing.enabled {
        Some(Telemetry::from_config(&config)?)
    } else {
        None
    };
    init_tracing(&config.logging, telemetry.as_ref())?;

    tracing::info!(
        bind_address = %config.listener.bind_address,
        sink = ?config.logging.sink,
        metrics_enabled = config.metrics.enabled,
        request_timeout_secs = config.timeouts.request_secs,
        otlp_endpoint = ?config.tracing.otlp_endpoint,
        "Configuration loaded"
    );

    let pipeline = Pipeline::from_config(&config)?;

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    tokio::spawn(trigger_on_signal(shutdown.clone()));

    let drain_timeout = Duration::from_secs(config.timeouts.shutdown_secs);
    let server = HttpServer::new(config, demo_routes(), pipeline.state());
    server.run(listener, shutdown.wait()).await?;

    pipeline.drain(drain_timeout).await;
    if let Some(telemetry) = telemetry {
        if let Err(e) = telemetry.shutdown().await {
            tracing::warn!(error = %e, "Span export did not shut down cleanly");
        }
    }
    tracing::info!("Shutdown complete");
    Ok(())
}
