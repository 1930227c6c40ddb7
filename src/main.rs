mod api;
mod batch_scanner;
mod config;
mod detector;
mod error;
mod fetcher;
mod scheduler;
mod scorer;
mod state;
mod types;
mod universe;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::health::UpstreamHealth;
use crate::api::latency::UpstreamLatency;
use crate::api::routes::{router, ApiState};
use crate::batch_scanner::BatchScanner;
use crate::config::{Config, TOTAL_BATCHES};
use crate::detector::TrendDetector;
use crate::error::Result;
use crate::fetcher::{MarketDataClient, RateLimiter};
use crate::scheduler::BatchScheduler;
use crate::scorer::OpportunityConverter;
use crate::state::CacheStore;
use crate::universe::UniverseProvider;

#[tokio::main]
async fn main() {
    // A missing .env is normal in production.
    let _ = dotenvy::dotenv();

    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    if cfg.polygon_api_key.is_empty() {
        warn!("POLYGON_API_KEY not set: every scan will serve synthetic data");
    }
    info!(
        "Upstream {} | min delay {}ms | {} batches | scan every {}s",
        cfg.polygon_api_url,
        cfg.upstream_min_delay.as_millis(),
        TOTAL_BATCHES,
        cfg.scan_interval.as_secs(),
    );

    let cancel = CancellationToken::new();

    // --- Upstream ---
    // One client and one limiter for every segment: the upstream limit is per API key.
    let upstream_health = Arc::new(UpstreamHealth::new());
    let latency = Arc::new(UpstreamLatency::new());
    let limiter = Arc::new(RateLimiter::new(cfg.upstream_min_delay));
    let client = Arc::new(MarketDataClient::new(
        &cfg,
        limiter,
        Arc::clone(&upstream_health),
        Arc::clone(&latency),
    )?);
    let universe = Arc::new(UniverseProvider::new(&cfg, Arc::clone(&client)));

    // --- Pipeline ---
    let store = Arc::new(CacheStore::new());
    let scanner = Arc::new(BatchScanner::new(
        client.clone(),
        universe,
        OpportunityConverter::new(cfg.min_open_interest),
        Arc::new(TrendDetector::new()),
        Arc::clone(&store),
        cancel.clone(),
    ));

    let scheduler_handle = if cfg.scheduler_enabled {
        let scheduler = BatchScheduler::new(
            Arc::clone(&scanner),
            cfg.scan_segments.clone(),
            cfg.scan_interval,
            cancel.clone(),
        );
        Some(tokio::spawn(scheduler.run()))
    } else {
        info!("SCHEDULER_ENABLED=false: batches run only via POST /scan");
        None
    };

    // --- HTTP API ---
    let api_state = ApiState {
        scanner,
        upstream: upstream_health,
        latency,
        client: Some(client),
        stale_after: cfg.stale_after,
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {e}");
            return;
        }
        info!("Shutdown requested");
        shutdown.cancel();
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.clone().cancelled_owned())
        .await?;

    // In-flight batches stop between tickers and publish what they have.
    if let Some(handle) = scheduler_handle {
        if let Err(e) = handle.await {
            error!("Scheduler task failed: {e}");
        }
    }
    info!("Shutdown complete");
    Ok(())
}
