//! DiamondChain RewardBot Library
//!
//! This is the main library crate for the DiamondChain RewardBot service.
//! It reconciles referral and staking rewards across multiple blockchains
//! from prioritized data sources (on-chain contract, reward API, fallback),
//! aggregates them into a single consistent claimable view, and drives the
//! claim lifecycle through confirmation.

pub mod aggregator;
pub mod cache;
pub mod chain_adapters;
pub mod claim;
pub mod config;
pub mod error;
pub mod metric;
pub mod realtime;
pub mod service;
pub mod sources;
pub mod types;

// Re-export the service surface most callers need
pub use aggregator::{aggregate, format_amount, RewardSummary};
pub use cache::RewardStore;
pub use claim::{BatchClaimReport, ClaimOrchestrator};
pub use config::{initialize_default_config, ConfigManager, RewardBotConfig};
pub use error::RewardError;
pub use service::{HealthReport, RewardService};
pub use sources::{parse_owner_address, SourceAdapterChain};
pub use types::{ClaimAttempt, ClaimableBundle, RewardRecord, RewardStatus};

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use warp::http::StatusCode;
use warp::Filter;

use crate::config::StatusApiConfig;

/// Initialize logging to stdout and a daily-rolling file
///
/// The returned guard flushes the file writer; keep it alive for the
/// lifetime of the process.
pub fn init_logging(log_level: &str) -> Result<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let file_appender = tracing_appender::rolling::daily("logs", "rewardbot.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .try_init()
        .context("Failed to set global default subscriber")?;

    info!("Logging initialized at {} level", log_level);
    Ok(guard)
}

/// Version information
pub mod version {
    /// Current version from Cargo.toml
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");

    /// Get full version string
    pub fn full_version() -> String {
        format!("{} ({})", VERSION, env!("CARGO_PKG_NAME"))
    }
}

/// Get a greeting message with version info
pub fn greeting() -> String {
    format!("DiamondChain RewardBot v{} starting up", version::VERSION)
}

/// Health endpoint handler
async fn health_handler(service: Arc<RewardService>) -> Result<impl warp::Reply, warp::Rejection> {
    Ok(warp::reply::json(&service.health_snapshot().await))
}

/// Initialize the status API server (`/health` and `/metrics`)
pub async fn init_api_server(service: Arc<RewardService>, config: &StatusApiConfig) -> Result<()> {
    if !config.enable_api {
        info!("Status API server is disabled in config");
        return Ok(());
    }

    info!("Initializing status API server on port {}", config.port);

    let service_filter = warp::any().map(move || service.clone());

    let health_route = warp::path("health")
        .and(warp::get())
        .and(service_filter)
        .and_then(health_handler);

    let metrics_route = warp::path("metrics").and(warp::get()).map(|| {
        match metric::render() {
            Some(body) => warp::reply::with_status(body, StatusCode::OK),
            None => warp::reply::with_status(
                "metrics recorder not installed".to_string(),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        }
    });

    let cors = warp::cors()
        .allow_any_origin()
        .allow_methods(vec!["GET", "OPTIONS"])
        .allow_headers(vec!["Content-Type"]);

    let routes = health_route.or(metrics_route).with(cors);
    let port = config.port;

    tokio::spawn(async move {
        warp::serve(routes).run(([0, 0, 0, 0], port)).await;
    });

    info!("Status API server initialized and running on port {}", port);
    Ok(())
}
