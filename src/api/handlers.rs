use axum::Json;
use axum::extract::State;
use axum::http::Uri;

use super::errors::ApiError;
use super::models::*;
use super::state::SharedState;

// =========================================================================
// Status
// =========================================================================

/// GET /
pub async fn status(State(state): State<SharedState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "online".to_string(),
        service: "WebSocket Broadcast Server".to_string(),
        active_connections: state.registry.count().await,
    })
}

/// GET /health
pub async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let uptime = state.start_time.elapsed().as_secs();
    Json(HealthResponse {
        status: "healthy".to_string(),
        connections: state.registry.count().await,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime,
    })
}

/// Fallback for unknown routes.
pub async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(uri.path().to_string())
}

// =========================================================================
// Tests
// =========================================================================
