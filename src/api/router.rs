//! Router assembly and server entry point

use crate::api::middleware::trace_middleware;
use crate::api::plugins;
use crate::core::services::ServiceRegistry;
use crate::pipeline::ProcessingOrchestrator;
use axum::routing::{get, post, put};
use axum::{middleware, Json, Router};
use std::sync::Arc;

/// Shared state for the control surface.
#[derive(Clone)]
pub struct ApiState {
    pub services: Arc<ServiceRegistry>,
    pub orchestrator: Arc<ProcessingOrchestrator>,
}

/// GET /health
async fn health(
    axum::extract::State(state): axum::extract::State<ApiState>,
) -> Json<crate::pipeline::OrchestratorHealth> {
    Json(state.orchestrator.health().await)
}

/// Build the admin router.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/plugins/register", post(plugins::register_plugin))
        .route("/api/v1/plugins", get(plugins::list_plugins))
        .route(
            "/api/v1/plugins/:id",
            get(plugins::get_plugin).delete(plugins::unregister_plugin),
        )
        .route("/api/v1/plugins/:id/enable", put(plugins::enable_plugin))
        .route("/api/v1/plugins/:id/disable", put(plugins::disable_plugin))
        .route("/api/v1/plugins/:id/reload", post(plugins::reload_plugin))
        .layer(middleware::from_fn(trace_middleware))
        .with_state(state)
}

/// Serve the control surface until the listener fails or the task is aborted.
pub async fn serve(state: ApiState, host: &str, port: u16) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    log::info!("Admin API listening on {}:{}", host, port);
    axum::serve(listener, build_router(state)).await
}
