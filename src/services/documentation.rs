use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Tandem Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::auth::register,
        crate::routes::auth::verify_email_link,
        crate::routes::auth::verify_email,
        crate::routes::auth::resend_verification,
        crate::routes::auth::login,
        crate::routes::auth::logout,
        crate::routes::auth::forgot_password,
        crate::routes::auth::reset_password,
        crate::routes::profile::get_profile,
        crate::routes::profile::update_profile,
        crate::routes::profile::overview,
        crate::routes::profile::online_users,
        crate::routes::pairing::generate_code,
        crate::routes::pairing::stay_single,
        crate::routes::pairing::redeem_code,
        crate::routes::pairing::unpair,
        crate::routes::session::create_session,
        crate::routes::session::get_session,
        crate::routes::session::end_session,
        crate::routes::session::join_session,
        crate::routes::session::leave_session,
        crate::routes::session::start_chat,
        crate::routes::session::accept_participant,
        crate::routes::session::remove_participant,
        crate::routes::session::send_message,
        crate::routes::session::list_messages,
        crate::routes::sse::user_stream,
        crate::routes::sse::session_stream,
        crate::routes::websocket::ws_handler,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::health::HealthStatus,
            crate::dto::auth::RegisterRequest,
            crate::dto::auth::LoginRequest,
            crate::dto::auth::LoginResponse,
            crate::dto::auth::VerifyEmailRequest,
            crate::dto::auth::ForgotPasswordRequest,
            crate::dto::auth::ResetPasswordRequest,
            crate::dto::profile::RelationshipStatusDto,
            crate::dto::profile::ProfileResponse,
            crate::dto::profile::UpdateProfileRequest,
            crate::dto::profile::OverviewResponse,
            crate::dto::profile::UserSummary,
            crate::dto::pairing::PartnerCodeResponse,
            crate::dto::pairing::RedeemCodeRequest,
            crate::dto::session::SessionPhaseDto,
            crate::dto::session::ParticipantStatusDto,
            crate::dto::session::ParticipantView,
            crate::dto::session::SessionView,
            crate::dto::session::CreatedSessionResponse,
            crate::dto::chat::SendMessageRequest,
            crate::dto::chat::MessageView,
            crate::dto::sse::Handshake,
            crate::dto::sse::PartnerPairedEvent,
            crate::dto::sse::PartnerUnpairedEvent,
            crate::dto::sse::SessionEndReason,
            crate::dto::sse::SessionEndedEvent,
            crate::dto::sse::ParticipantRemovedEvent,
            crate::dto::ws::ChatInboundMessage,
            crate::dto::ws::ChatOutboundMessage,
        )
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "auth", description = "Registration, email verification and login"),
        (name = "profile", description = "Profile and home screen"),
        (name = "pairing", description = "Partner pairing codes and relationships"),
        (name = "sessions", description = "Ephemeral chat sessions and admission"),
        (name = "chat", description = "Messages over HTTP and WebSocket"),
        (name = "sse", description = "Server-sent events streams"),
    )
)]
pub struct ApiDoc;

/// Declares the `bearer` scheme referenced by authenticated routes.
struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
        }
    }
}
