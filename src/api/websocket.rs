//! WebSocket handshake for live dashboard connections

use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::WebSocket,
    },
    http::{HeaderMap, header::AUTHORIZATION},
    response::Response,
};
use futures::stream::StreamExt;
use tracing::{info, warn};

use crate::api::{identity::Identity, state::ApiState, types::StreamParams};

/// WebSocket upgrade handler
///
/// GET /api/v1/stream
///
/// The identity token is taken from `Authorization: Bearer <token>` or, for
/// browsers, from the `token` query parameter.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<StreamParams>,
    headers: HeaderMap,
    State(state): State<ApiState>,
) -> Response {
    let token = bearer_token(&headers).or(params.token.as_deref());
    let identity = state.identity.resolve(token);
    let max_message_size = state.hub.config().max_message_size;

    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state, identity))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
}

/// Hand an upgraded socket to the hub
async fn handle_websocket(socket: WebSocket, state: ApiState, identity: Identity) {
    let (sender, receiver) = socket.split();

    match state
        .hub
        .connect(sender, receiver, Some(identity.user_id.clone()))
        .await
    {
        Ok(client_id) => info!(
            "WebSocket client {client_id} connected (user: {}, anonymous: {})",
            identity.user_id, identity.anonymous
        ),
        Err(e) => warn!("rejecting WebSocket client: {e}"),
    }
}
