//! Hub statistics endpoint

use axum::{Json, extract::State};
use serde_json::{Value, json};

use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
};

/// GET /api/v1/stats
///
/// Returns registry statistics and lifetime counters of the hub
pub async fn get_stats(State(state): State<ApiState>) -> ApiResult<Json<Value>> {
    let stats = state
        .hub
        .stats()
        .await
        .ok_or_else(|| ApiError::Unavailable("notification hub is shut down".to_string()))?;

    Ok(Json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "hub": stats,
    })))
}
