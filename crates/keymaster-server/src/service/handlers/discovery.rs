//! Discovery and public config handlers

use axum::{extract::State, Json};
use keymaster_core::api::{ConfigResponse, DiscoveryResponse, API_VERSION};
use std::sync::Arc;

use super::AppState;

/// Identify the issuer and the environment it serves
///
/// GET /v1/discovery
pub async fn discovery(State(state): State<Arc<AppState>>) -> Json<DiscoveryResponse> {
    Json(DiscoveryResponse {
        api_version: API_VERSION.into(),
        environment: state.config.name.clone(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

/// Serve the config snapshot with CA private keys and HMAC secrets removed
///
/// GET /v1/config
pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<ConfigResponse> {
    Json(ConfigResponse {
        version: state.config.version.clone(),
        config: state.config.redacted(),
    })
}
