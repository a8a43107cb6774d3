use std::convert::Infallible;

use axum::{
    Extension, Router,
    extract::{Path, Query, State},
    http::HeaderMap,
    middleware,
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;
use tracing::info;

use crate::{
    dto::sse::StreamQuery,
    error::AppError,
    routes::{
        auth::{CurrentUser, require_verified},
        session::access_key_header,
    },
    services::sse_service,
    state::SharedState,
};

#[utoipa::path(
    get,
    path = "/me/events",
    tag = "sse",
    security(("bearer" = [])),
    params(StreamQuery),
    responses((status = 200, description = "Per-user SSE stream", content_type = "text/event-stream", body = String))
)]
/// Stream the caller's own events (`partner.paired`, `partner.unpaired`).
pub async fn user_stream(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = sse_service::subscribe_user(&state, user.uid).await;
    info!(uid = %user.uid, "new user SSE connection");
    sse_service::to_sse_stream(subscription)
}

#[utoipa::path(
    get,
    path = "/sessions/{id}/events",
    tag = "sse",
    security(("bearer" = [])),
    params(
        ("id" = String, Path, description = "Session code"),
        ("X-Access-Key" = Option<String>, Header, description = "Session access key, or the `access_key` query parameter"),
        StreamQuery
    ),
    responses(
        (status = 200, description = "Session SSE stream", content_type = "text/event-stream", body = String),
        (status = 403, description = "Not a participant or wrong access key")
    )
)]
/// Stream a session: snapshot first, then updates, messages and the end.
pub async fn session_stream(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<StreamQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let access_key = match query.access_key {
        Some(key) => key,
        None => access_key_header(&headers)?,
    };
    let subscription = sse_service::subscribe_session(&state, user.uid, &id, &access_key).await?;
    info!(session = %id, uid = %user.uid, "new session SSE connection");
    Ok(sse_service::to_sse_stream(subscription))
}

/// Configure the SSE endpoints.
pub fn router(state: SharedState) -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/me/events", get(user_stream))
        .route("/sessions/{id}/events", get(session_stream))
        .route_layer(middleware::from_fn_with_state(state, require_verified))
}
