use axum::Router;

use crate::state::SharedState;

/// Registration, verification, login and password reset.
pub mod auth;
/// Swagger UI and the OpenAPI document.
pub mod docs;
/// Health check.
pub mod health;
/// Partner pairing codes.
pub mod pairing;
/// Profile, overview and online users.
pub mod profile;
/// Chat sessions and messages.
pub mod session;
/// Server-sent event streams.
pub mod sse;
/// Chat WebSocket.
pub mod websocket;

/// Compose all route trees, wiring in shared state and documentation routes.
pub fn router(state: SharedState) -> Router<()> {
    let api_router = health::router()
        .merge(auth::router(state.clone()))
        .merge(profile::router(state.clone()))
        .merge(pairing::router(state.clone()))
        .merge(session::router(state.clone()))
        .merge(sse::router(state.clone()))
        .merge(websocket::router());

    api_router.merge(docs::router()).with_state(state)
}
