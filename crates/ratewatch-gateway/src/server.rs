//! HTTP server implementation using Axum.

use axum::{
    Router,
    routing::{get, post},
};
use ratewatch_core::config::GatewayConfig;
use ratewatch_orchestrator::Orchestrator;
use ratewatch_scheduler::PrecisionScheduler;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::bridge::UnitBridge;

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    pub gateway_config: GatewayConfig,
    pub orchestrator: Arc<Orchestrator>,
    pub scheduler: Arc<PrecisionScheduler>,
    /// Unit operations travel through whichever agent holds `/ws/units`.
    pub bridge: Arc<UnitBridge>,
    pub start_time: std::time::Instant,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    build_router_from_arc(Arc::new(state))
}

pub fn build_router_from_arc(shared: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/api/v1/batch", get(super::routes::batch_state))
        .route("/api/v1/batch/start", post(super::routes::batch_start))
        .route("/api/v1/batch/load", post(super::routes::batch_load))
        .route("/api/v1/batch/pause", post(super::routes::batch_pause))
        .route("/api/v1/batch/resume", post(super::routes::batch_resume))
        .route("/api/v1/batch/stop", post(super::routes::batch_stop))
        .route("/api/v1/scheduler", get(super::routes::scheduler_info));

    let sockets = Router::new()
        .route("/ws/progress", get(super::ws::progress_handler))
        .route("/ws/units", get(super::ws::units_handler));

    Router::new()
        .route("/health", get(super::routes::health_check))
        .merge(api)
        .merge(sockets)
        .layer({
            let cors = CorsLayer::new()
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers(Any)
                .max_age(std::time::Duration::from_secs(3600));

            // Example: RATEWATCH_CORS_ORIGINS=chrome-extension://abc,http://localhost:5173
            if let Ok(origins_str) = std::env::var("RATEWATCH_CORS_ORIGINS") {
                let origins: Vec<_> = origins_str
                    .split(',')
                    .filter_map(|s| s.trim().parse::<axum::http::HeaderValue>().ok())
                    .collect();
                cors.allow_origin(origins)
            } else {
                cors.allow_origin(Any)
            }
        })
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

/// Bind and serve until the listener fails.
pub async fn start(state: AppState) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.gateway_config.host, state.gateway_config.port);
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("🌐 Gateway listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
