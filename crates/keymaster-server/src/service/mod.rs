//! HTTP surface of the issuer service

pub mod assertions;
pub mod error;
pub mod handlers;
pub mod nonces;

use axum::{
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use handlers::AppState;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Health check endpoint
///
/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

/// Create the API router
///
/// `workflow_auth` reads the client address, so the router must be served
/// with `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/discovery", get(handlers::discovery))
        .route("/v1/config", get(handlers::get_config))
        .route("/v1/workflow/start", post(handlers::workflow_start))
        .route("/v1/workflow/auth", post(handlers::workflow_auth))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
