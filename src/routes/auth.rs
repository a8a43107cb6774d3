use axum::{
    Extension, Json, Router,
    body::Body,
    extract::{Query, State},
    http::{Request, StatusCode, header::AUTHORIZATION},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::{
        auth::{
            ForgotPasswordRequest, LoginRequest, LoginResponse, RegisterRequest,
            ResetPasswordRequest, VerifyEmailRequest,
        },
        profile::ProfileResponse,
        sse::StreamQuery,
    },
    error::AppError,
    services::auth_service,
    state::SharedState,
};

/// Identity resolved from the bearer token, available to handlers behind
/// [`require_user`] or [`require_verified`].
#[derive(Debug, Clone)]
pub struct CurrentUser {
    /// Authenticated account.
    pub uid: Uuid,
    /// Whether the account may use verified-only routes.
    pub email_verified: bool,
    /// Raw bearer token, kept for logout.
    pub token: String,
}

/// Account management endpoints.
pub fn router(state: SharedState) -> Router<SharedState> {
    let public = Router::new()
        .route("/auth/register", post(register))
        .route("/auth/verify", get(verify_email_link).post(verify_email))
        .route("/auth/login", post(login))
        .route("/auth/password/forgot", post(forgot_password))
        .route("/auth/password/reset", post(reset_password));

    let authenticated = Router::new()
        .route("/auth/logout", post(logout))
        .route("/auth/verification/resend", post(resend_verification))
        .route_layer(middleware::from_fn_with_state(state, require_user));

    public.merge(authenticated)
}

/// Create an account and send the verification email.
#[utoipa::path(
    post,
    path = "/auth/register",
    tag = "auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = ProfileResponse),
        (status = 409, description = "Email already registered")
    )
)]
pub async fn register(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<RegisterRequest>>,
) -> Result<(StatusCode, Json<ProfileResponse>), AppError> {
    let profile = auth_service::register(&state, payload).await?;
    Ok((StatusCode::CREATED, Json(profile)))
}

/// Landing point of the emailed verification link.
#[utoipa::path(
    get,
    path = "/auth/verify",
    tag = "auth",
    params(VerifyEmailRequest),
    responses(
        (status = 200, description = "Email verified", body = ProfileResponse),
        (status = 400, description = "Invalid or expired token")
    )
)]
pub async fn verify_email_link(
    State(state): State<SharedState>,
    Valid(Query(query)): Valid<Query<VerifyEmailRequest>>,
) -> Result<Json<ProfileResponse>, AppError> {
    Ok(Json(auth_service::verify_email(&state, &query.token).await?))
}

/// Verify an email address with the token typed or pasted by the user.
#[utoipa::path(
    post,
    path = "/auth/verify",
    tag = "auth",
    request_body = VerifyEmailRequest,
    responses(
        (status = 200, description = "Email verified", body = ProfileResponse),
        (status = 400, description = "Invalid or expired token")
    )
)]
pub async fn verify_email(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<VerifyEmailRequest>>,
) -> Result<Json<ProfileResponse>, AppError> {
    Ok(Json(auth_service::verify_email(&state, &payload.token).await?))
}

/// Send a new verification email, at most once per cooldown.
#[utoipa::path(
    post,
    path = "/auth/verification/resend",
    tag = "auth",
    security(("bearer" = [])),
    responses(
        (status = 202, description = "Verification email sent"),
        (status = 409, description = "Already verified or sent too recently")
    )
)]
pub async fn resend_verification(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<StatusCode, AppError> {
    auth_service::resend_verification(&state, user.uid).await?;
    Ok(StatusCode::ACCEPTED)
}

/// Exchange email and password for a bearer token.
#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Bearer token issued", body = LoginResponse),
        (status = 401, description = "Invalid email or password")
    )
)]
pub async fn login(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<LoginRequest>>,
) -> Result<Json<LoginResponse>, AppError> {
    Ok(Json(auth_service::login(&state, payload).await?))
}

/// Revoke the bearer token used for this request.
#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "auth",
    security(("bearer" = [])),
    responses((status = 204, description = "Token revoked"))
)]
pub async fn logout(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
) -> StatusCode {
    auth_service::logout(&state, &user.token);
    StatusCode::NO_CONTENT
}

/// Request a password reset email. Always accepted.
#[utoipa::path(
    post,
    path = "/auth/password/forgot",
    tag = "auth",
    request_body = ForgotPasswordRequest,
    responses((status = 202, description = "Reset email sent when the account exists"))
)]
pub async fn forgot_password(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<ForgotPasswordRequest>>,
) -> Result<StatusCode, AppError> {
    auth_service::request_password_reset(&state, &payload.email).await?;
    Ok(StatusCode::ACCEPTED)
}

/// Set a new password with the emailed reset token.
#[utoipa::path(
    post,
    path = "/auth/password/reset",
    tag = "auth",
    request_body = ResetPasswordRequest,
    responses(
        (status = 204, description = "Password replaced, every session signed out"),
        (status = 400, description = "Invalid or expired token")
    )
)]
pub async fn reset_password(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<ResetPasswordRequest>>,
) -> Result<StatusCode, AppError> {
    auth_service::reset_password(&state, payload).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Resolve the bearer token (header, or `access_token` query parameter for
/// event streams) and expose it as a [`CurrentUser`] extension.
pub async fn require_user(
    State(state): State<SharedState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let user = current_user(&state, &req)?;
    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

/// Like [`require_user`], and additionally refuse accounts whose email is not
/// verified yet.
pub async fn require_verified(
    State(state): State<SharedState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let user = current_user(&state, &req)?;
    if !user.email_verified {
        return Err(AppError::Forbidden(
            "email address must be verified first".into(),
        ));
    }
    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

fn current_user(state: &SharedState, req: &Request<Body>) -> Result<CurrentUser, AppError> {
    let token = bearer_token(req).ok_or_else(|| {
        AppError::Unauthorized("missing bearer token in `Authorization` header".into())
    })?;
    let session = auth_service::authenticate(state, &token)?;
    Ok(CurrentUser {
        uid: session.uid,
        email_verified: session.email_verified,
        token,
    })
}

fn bearer_token(req: &Request<Body>) -> Option<String> {
    let from_header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_owned());
    from_header.or_else(|| {
        Query::<StreamQuery>::try_from_uri(req.uri())
            .ok()
            .and_then(|Query(query)| query.access_token)
    })
}
