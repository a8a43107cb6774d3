use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    middleware,
    routing::{delete, get, post},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::{
        chat::{ACCESS_KEY_HEADER, MessageQuery, MessageView, SendMessageRequest},
        session::{CreatedSessionResponse, SessionView},
    },
    error::AppError,
    routes::auth::{CurrentUser, require_verified},
    services::{chat_service, session_service},
    state::SharedState,
};

/// Session lifecycle and chat endpoints, verified accounts only.
pub fn router(state: SharedState) -> Router<SharedState> {
    Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/{id}", get(get_session).delete(end_session))
        .route("/sessions/{id}/join", post(join_session))
        .route("/sessions/{id}/leave", post(leave_session))
        .route("/sessions/{id}/start", post(start_chat))
        .route(
            "/sessions/{id}/participants/{uid}/accept",
            post(accept_participant),
        )
        .route(
            "/sessions/{id}/participants/{uid}",
            delete(remove_participant),
        )
        .route(
            "/sessions/{id}/messages",
            get(list_messages).post(send_message),
        )
        .route_layer(middleware::from_fn_with_state(state, require_verified))
}

/// Open a session. The access key in the response is never shown again.
#[utoipa::path(
    post,
    path = "/sessions",
    tag = "sessions",
    security(("bearer" = [])),
    responses((status = 201, description = "Session created", body = CreatedSessionResponse))
)]
pub async fn create_session(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<(StatusCode, Json<CreatedSessionResponse>), AppError> {
    let created = session_service::create_session(&state, user.uid).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Current session snapshot, for participants.
#[utoipa::path(
    get,
    path = "/sessions/{id}",
    tag = "sessions",
    security(("bearer" = [])),
    params(("id" = String, Path, description = "Session code")),
    responses(
        (status = 200, description = "Session state", body = SessionView),
        (status = 403, description = "Caller is not a participant"),
        (status = 404, description = "Unknown session")
    )
)]
pub async fn get_session(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, AppError> {
    Ok(Json(session_service::get_session(&state, user.uid, &id).await?))
}

/// End the session for everyone (admin only).
#[utoipa::path(
    delete,
    path = "/sessions/{id}",
    tag = "sessions",
    security(("bearer" = [])),
    params(("id" = String, Path, description = "Session code")),
    responses(
        (status = 204, description = "Session and messages deleted"),
        (status = 403, description = "Caller is not the admin")
    )
)]
pub async fn end_session(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    session_service::end_session(&state, user.uid, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Join as a pending participant.
#[utoipa::path(
    post,
    path = "/sessions/{id}/join",
    tag = "sessions",
    security(("bearer" = [])),
    params(("id" = String, Path, description = "Session code")),
    responses(
        (status = 200, description = "Joined (or already in)", body = SessionView),
        (status = 404, description = "Unknown session"),
        (status = 409, description = "Session is full")
    )
)]
pub async fn join_session(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, AppError> {
    Ok(Json(session_service::join_session(&state, user.uid, &id).await?))
}

/// Leave the session. The admin role passes to the next participant.
#[utoipa::path(
    post,
    path = "/sessions/{id}/leave",
    tag = "sessions",
    security(("bearer" = [])),
    params(("id" = String, Path, description = "Session code")),
    responses((status = 204, description = "Left the session"))
)]
pub async fn leave_session(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    session_service::leave_session(&state, user.uid, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Open the chat (admin only, two accepted participants at least).
#[utoipa::path(
    post,
    path = "/sessions/{id}/start",
    tag = "sessions",
    security(("bearer" = [])),
    params(("id" = String, Path, description = "Session code")),
    responses(
        (status = 200, description = "Chat started", body = SessionView),
        (status = 409, description = "Not enough accepted participants or already chatting")
    )
)]
pub async fn start_chat(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, AppError> {
    Ok(Json(session_service::start_chat(&state, user.uid, &id).await?))
}

/// Admit a pending participant (admin only).
#[utoipa::path(
    post,
    path = "/sessions/{id}/participants/{uid}/accept",
    tag = "sessions",
    security(("bearer" = [])),
    params(
        ("id" = String, Path, description = "Session code"),
        ("uid" = Uuid, Path, description = "Participant to admit")
    ),
    responses((status = 200, description = "Participant accepted", body = SessionView))
)]
pub async fn accept_participant(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
    Path((id, uid)): Path<(String, Uuid)>,
) -> Result<Json<SessionView>, AppError> {
    Ok(Json(
        session_service::accept_participant(&state, user.uid, &id, uid).await?,
    ))
}

/// Remove another participant (admin only).
#[utoipa::path(
    delete,
    path = "/sessions/{id}/participants/{uid}",
    tag = "sessions",
    security(("bearer" = [])),
    params(
        ("id" = String, Path, description = "Session code"),
        ("uid" = Uuid, Path, description = "Participant to remove")
    ),
    responses((status = 200, description = "Participant removed", body = SessionView))
)]
pub async fn remove_participant(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
    Path((id, uid)): Path<(String, Uuid)>,
) -> Result<Json<SessionView>, AppError> {
    Ok(Json(
        session_service::remove_participant(&state, user.uid, &id, uid).await?,
    ))
}

/// Post a message to a chatting session.
#[utoipa::path(
    post,
    path = "/sessions/{id}/messages",
    tag = "chat",
    security(("bearer" = [])),
    params(
        ("id" = String, Path, description = "Session code"),
        ("X-Access-Key" = String, Header, description = "Session access key")
    ),
    request_body = SendMessageRequest,
    responses(
        (status = 201, description = "Message stored", body = MessageView),
        (status = 403, description = "Not accepted or wrong access key"),
        (status = 409, description = "Chat not started")
    )
)]
pub async fn send_message(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Valid(Json(payload)): Valid<Json<SendMessageRequest>>,
) -> Result<(StatusCode, Json<MessageView>), AppError> {
    let access_key = access_key_header(&headers)?;
    let message =
        chat_service::send_message(&state, user.uid, &id, &access_key, &payload.text).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// Message history, oldest first.
#[utoipa::path(
    get,
    path = "/sessions/{id}/messages",
    tag = "chat",
    security(("bearer" = [])),
    params(
        ("id" = String, Path, description = "Session code"),
        ("X-Access-Key" = String, Header, description = "Session access key"),
        MessageQuery
    ),
    responses((status = 200, description = "Messages", body = [MessageView]))
)]
pub async fn list_messages(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<MessageQuery>,
) -> Result<Json<Vec<MessageView>>, AppError> {
    let access_key = access_key_header(&headers)?;
    Ok(Json(
        chat_service::list_messages(&state, user.uid, &id, &access_key, query).await?,
    ))
}

/// Session access key from the `x-access-key` header.
pub(crate) fn access_key_header(headers: &HeaderMap) -> Result<String, AppError> {
    headers
        .get(ACCESS_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
        .ok_or_else(|| {
            AppError::Forbidden(format!("missing session access key header `{ACCESS_KEY_HEADER}`"))
        })
}
