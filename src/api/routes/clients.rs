//! Connected client counts

use axum::{
    Json,
    extract::{Query, State},
};

use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::{ClientCountResponse, ClientsQuery},
};

/// GET /api/v1/clients?topic=alerts
///
/// Without `topic`, counts every connected client
pub async fn count_clients(
    State(state): State<ApiState>,
    Query(query): Query<ClientsQuery>,
) -> ApiResult<Json<ClientCountResponse>> {
    let count = match &query.topic {
        Some(topic) if topic.trim().is_empty() => {
            return Err(ApiError::InvalidRequest("topic must not be empty".to_string()));
        }
        Some(topic) => state.hub.count_clients_by_topic(topic.trim()).await,
        None => state.hub.count_clients().await,
    };

    Ok(Json(ClientCountResponse {
        topic: query.topic,
        count,
    }))
}
