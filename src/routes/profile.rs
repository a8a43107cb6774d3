use axum::{
    Extension, Json, Router,
    extract::State,
    middleware,
    routing::get,
};
use axum_valid::Valid;

use crate::{
    dto::profile::{OverviewResponse, ProfileResponse, UpdateProfileRequest, UserSummary},
    error::AppError,
    routes::auth::{CurrentUser, require_user, require_verified},
    services::profile_service,
    state::SharedState,
};

/// Profile and home screen endpoints.
pub fn router(state: SharedState) -> Router<SharedState> {
    let own_profile = Router::new()
        .route("/me", get(get_profile).patch(update_profile))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_user));

    let verified = Router::new()
        .route("/me/overview", get(overview))
        .route("/users/online", get(online_users))
        .route_layer(middleware::from_fn_with_state(state, require_verified));

    own_profile.merge(verified)
}

/// The caller's profile.
#[utoipa::path(
    get,
    path = "/me",
    tag = "profile",
    security(("bearer" = [])),
    responses((status = 200, description = "Caller's profile", body = ProfileResponse))
)]
pub async fn get_profile(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<ProfileResponse>, AppError> {
    Ok(Json(profile_service::get_profile(&state, user.uid).await?))
}

/// Update some profile fields; omitted fields are kept.
#[utoipa::path(
    patch,
    path = "/me",
    tag = "profile",
    security(("bearer" = [])),
    request_body = UpdateProfileRequest,
    responses((status = 200, description = "Updated profile", body = ProfileResponse))
)]
pub async fn update_profile(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
    Valid(Json(payload)): Valid<Json<UpdateProfileRequest>>,
) -> Result<Json<ProfileResponse>, AppError> {
    Ok(Json(
        profile_service::update_profile(&state, user.uid, payload).await?,
    ))
}

/// Home screen: relationship status, partner and pairing code.
#[utoipa::path(
    get,
    path = "/me/overview",
    tag = "profile",
    security(("bearer" = [])),
    responses((status = 200, description = "Home screen projection", body = OverviewResponse))
)]
pub async fn overview(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<OverviewResponse>, AppError> {
    Ok(Json(profile_service::overview(&state, user.uid).await?))
}

/// Users with a live connection, the caller excluded.
#[utoipa::path(
    get,
    path = "/users/online",
    tag = "profile",
    security(("bearer" = [])),
    responses((status = 200, description = "Online users", body = [UserSummary]))
)]
pub async fn online_users(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<Vec<UserSummary>>, AppError> {
    Ok(Json(profile_service::online_users(&state, user.uid).await?))
}
