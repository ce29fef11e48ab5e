//! Liveness endpoint.

use axum::Json;
use axum::extract::State;

use crate::AppState;
use crate::models::HealthResponse;

/// `GET /health`: reports the build version and whether refresh
/// coordination is shared across replicas.
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        version: tollgate_core::version().to_string(),
        distributed_refresh: state.session.is_distributed(),
    })
}
