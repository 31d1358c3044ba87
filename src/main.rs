//! Uptrail - uptime check metrics and quota engine.

use uptrail::checks::CheckManager;
use uptrail::config::ServerConfig;
use uptrail::db::Store;
use uptrail::live::{LiveViewConfig, LiveViewCoordinator};
use uptrail::metrics::MetricsService;
use uptrail::quota::{HttpSubscriptionProvider, QuotaService, SubscriptionProvider};
use uptrail::scheduler::Scheduler;
use uptrail::web::{AppState, Server};

use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("uptrail=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting Uptrail on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Store::new(&cfg.db_path)?;
    let source = Arc::new(store.clone());
    tracing::info!("Database initialized successfully");

    // Start scheduler
    let scheduler = Arc::new(Scheduler::new(source.clone(), cfg.retention_sweep));
    scheduler.start();

    let quota = QuotaService::new(source.clone());
    let metrics = MetricsService::new(source.clone(), cfg.timeseries_points);
    let checks = CheckManager::new(store.clone(), quota.clone());
    let live = Arc::new(LiveViewCoordinator::new(
        source,
        LiveViewConfig {
            refresh_interval: cfg.refresh_interval,
            max_concurrent_refreshes: cfg.max_concurrent_refreshes,
            timeseries_points: cfg.timeseries_points,
            idle_timeout: cfg.view_idle_timeout,
            ..Default::default()
        },
    ));
    live.start();

    let billing: Option<Arc<dyn SubscriptionProvider>> = match &cfg.billing_url {
        Some(url) => {
            tracing::info!("Billing provider at {}", url);
            Some(Arc::new(HttpSubscriptionProvider::new(url, Duration::from_secs(10))?))
        }
        None => {
            tracing::info!("No billing provider configured, billing endpoints disabled");
            None
        }
    };

    // Start web server
    let server = Server::new(AppState {
        config: cfg,
        store,
        scheduler: scheduler.clone(),
        metrics,
        quota,
        checks,
        live: live.clone(),
        billing,
    });
    let result = server.start().await;

    live.shutdown().await;
    scheduler.stop().await;
    result
}
