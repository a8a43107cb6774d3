use axum::{
    Router,
    extract::{Path, State, WebSocketUpgrade},
    response::Response,
    routing::get,
};

use crate::{
    error::AppError,
    services::{websocket_service, websocket_service::frame_limit},
    state::{SharedState, codes::SessionCode},
};

/// Chat socket endpoint; credentials travel in the first frame.
pub fn router() -> Router<SharedState> {
    Router::new().route("/sessions/{id}/ws", get(ws_handler))
}

/// Upgrade into a chat socket. Authentication happens in-band: the first
/// frame must be an `identification` carrying the bearer token and the
/// session access key.
#[utoipa::path(
    get,
    path = "/sessions/{id}/ws",
    tag = "chat",
    params(("id" = String, Path, description = "Session code")),
    responses(
        (status = 101, description = "Switching protocols to WebSocket"),
        (status = 400, description = "Malformed session code")
    )
)]
pub async fn ws_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let id = SessionCode::parse(&id).map_err(|err| AppError::BadRequest(err.to_string()))?;
    let limit = frame_limit(state.config().max_message_len);
    Ok(ws
        .max_message_size(limit)
        .on_upgrade(move |socket| websocket_service::handle_socket(state, id.into_string(), socket)))
}
