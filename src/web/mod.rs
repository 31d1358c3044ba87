//! Web server module.

mod handlers;

pub use handlers::*;

use crate::checks::CheckManager;
use crate::config::ServerConfig;
use crate::db::Store;
use crate::live::LiveViewCoordinator;
use crate::metrics::MetricsService;
use crate::quota::{QuotaService, SubscriptionProvider};
use crate::scheduler::Scheduler;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub store: Store,
    pub scheduler: Arc<Scheduler>,
    pub metrics: MetricsService,
    pub quota: QuotaService,
    pub checks: CheckManager,
    pub live: Arc<LiveViewCoordinator>,
    /// `None` when no subscription provider is configured.
    pub billing: Option<Arc<dyn SubscriptionProvider>>,
}

/// Web server for Uptrail.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Build the router with all routes.
    pub fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

        let mut router = Router::new()
            // Checks
            .route(
                "/api/checks",
                get(handlers::handle_list_checks).post(handlers::handle_create_check),
            )
            .route(
                "/api/checks/{id}",
                get(handlers::handle_get_check)
                    .put(handlers::handle_update_check)
                    .delete(handlers::handle_delete_check),
            )
            // Metrics
            .route("/api/checks/{id}/metrics", get(handlers::handle_check_metrics))
            .route("/api/checks/{id}/regions", get(handlers::handle_regional_breakdown))
            .route("/api/checks/{id}/timeseries", get(handlers::handle_time_series))
            // Ingestion
            .route("/api/results", post(handlers::handle_ingest_results))
            // Quota
            .route("/api/quota", get(handlers::handle_usage))
            .route("/api/quota/can-create", get(handlers::handle_can_create))
            .route("/api/quota/interval", get(handlers::handle_interval_allowed))
            // Live views
            .route("/api/views", post(handlers::handle_open_view))
            .route(
                "/api/views/{id}",
                get(handlers::handle_view_snapshot).delete(handlers::handle_close_view),
            )
            .route("/api/views/{id}/refresh", post(handlers::handle_refresh_view));

        if self.state.billing.is_some() {
            router = router
                .route("/api/billing/upgrade", post(handlers::handle_upgrade))
                .route("/api/billing/cancel", post(handlers::handle_cancel));
        }

        router
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .layer(DefaultBodyLimit::max(1024 * 1024)) // 1MB
            .with_state(self.state.clone())
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}
