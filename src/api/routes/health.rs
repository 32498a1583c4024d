//! Health check endpoint

use axum::{Json, extract::State, http::StatusCode};

use crate::api::{state::ApiState, types::HealthResponse};

/// GET /api/v1/health
///
/// Reports 503 once the hub has been shut down.
pub async fn health_check(State(state): State<ApiState>) -> (StatusCode, Json<HealthResponse>) {
    let (status_code, status) = if state.hub.is_shut_down() {
        (StatusCode::SERVICE_UNAVAILABLE, "shutting_down")
    } else {
        (StatusCode::OK, "ok")
    };

    (
        status_code,
        Json(HealthResponse {
            status: status.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            clients: state.hub.count_clients().await,
        }),
    )
}
