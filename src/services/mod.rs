/// Registration, email verification, login and password reset.
pub mod auth_service;
/// Session chat messages.
pub mod chat_service;
/// Password hashing and random secrets.
pub mod credentials;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Outgoing account emails.
pub mod mailer;
/// Partner pairing codes and relationships.
pub mod pairing_service;
/// Profiles, home screen overview and presence listing.
pub mod profile_service;
/// Chat session lifecycle and admission.
pub mod session_service;
/// Server-Sent Events message generation.
pub mod sse_events;
/// Server-Sent Events streaming service.
pub mod sse_service;
/// Storage connection supervisor driving degraded mode.
pub mod storage_supervisor;
/// Chat WebSocket connection handling.
pub mod websocket_service;
