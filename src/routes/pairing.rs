use axum::{
    Extension, Json, Router,
    extract::State,
    middleware,
    routing::{delete, post},
};
use axum_valid::Valid;

use crate::{
    dto::{
        pairing::{PartnerCodeResponse, RedeemCodeRequest},
        profile::OverviewResponse,
    },
    error::AppError,
    routes::auth::{CurrentUser, require_verified},
    services::pairing_service,
    state::SharedState,
};

/// Partner pairing endpoints, verified accounts only.
pub fn router(state: SharedState) -> Router<SharedState> {
    Router::new()
        .route("/pairing/code", post(generate_code))
        .route("/pairing/single", post(stay_single))
        .route("/pairing/redeem", post(redeem_code))
        .route("/pairing", delete(unpair))
        .route_layer(middleware::from_fn_with_state(state, require_verified))
}

/// Replace the caller's pairing code.
#[utoipa::path(
    post,
    path = "/pairing/code",
    tag = "pairing",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "New pairing code", body = PartnerCodeResponse),
        (status = 409, description = "Caller is already paired")
    )
)]
pub async fn generate_code(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<PartnerCodeResponse>, AppError> {
    Ok(Json(pairing_service::generate_code(&state, user.uid).await?))
}

/// Stay single for now, keeping a code to share later.
#[utoipa::path(
    post,
    path = "/pairing/single",
    tag = "pairing",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Caller marked single", body = OverviewResponse),
        (status = 409, description = "Caller is already paired")
    )
)]
pub async fn stay_single(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<OverviewResponse>, AppError> {
    Ok(Json(pairing_service::stay_single(&state, user.uid).await?))
}

/// Pair with the owner of a code.
#[utoipa::path(
    post,
    path = "/pairing/redeem",
    tag = "pairing",
    security(("bearer" = [])),
    request_body = RedeemCodeRequest,
    responses(
        (status = 200, description = "Relationship established", body = OverviewResponse),
        (status = 400, description = "Malformed code or own code"),
        (status = 404, description = "Unknown code"),
        (status = 409, description = "One side is already paired")
    )
)]
pub async fn redeem_code(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
    Valid(Json(payload)): Valid<Json<RedeemCodeRequest>>,
) -> Result<Json<OverviewResponse>, AppError> {
    Ok(Json(
        pairing_service::redeem_code(&state, user.uid, &payload.code).await?,
    ))
}

/// Dissolve the caller's relationship.
#[utoipa::path(
    delete,
    path = "/pairing",
    tag = "pairing",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Relationship dissolved", body = OverviewResponse),
        (status = 409, description = "Caller is not paired")
    )
)]
pub async fn unpair(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<OverviewResponse>, AppError> {
    Ok(Json(pairing_service::unpair(&state, user.uid).await?))
}
