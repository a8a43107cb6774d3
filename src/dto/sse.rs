use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    pub event: Option<String>,
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

/// Credentials accepted in the query string, for clients that cannot set headers.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct StreamQuery {
    /// Bearer token, alternative to the `Authorization` header.
    pub access_token: Option<String>,
    /// Session access key, alternative to the `x-access-key` header.
    pub access_key: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
/// Initial metadata sent to an SSE client when it connects.
pub struct Handshake {
    /// Identifier of the SSE stream (`user` or `session`).
    pub stream: String,
    /// Whether the backend is running without a storage backend connection.
    pub degraded: bool,
}

#[derive(Debug, Serialize, ToSchema)]
/// Sent to both partners once a relationship is established.
pub struct PartnerPairedEvent {
    pub partner_uid: Uuid,
    pub partner_name: String,
}

#[derive(Debug, Serialize, ToSchema)]
/// Sent to both former partners once a relationship is dissolved.
pub struct PartnerUnpairedEvent {
    pub partner_uid: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionEndReason {
    /// The admin ended the session.
    Ended,
    /// The last participant left.
    Emptied,
}

#[derive(Debug, Serialize, ToSchema)]
/// Last event of a session stream; the stream closes right after.
pub struct SessionEndedEvent {
    pub session_id: String,
    pub reason: SessionEndReason,
}

#[derive(Debug, Serialize, ToSchema)]
/// Sent on a session stream to a participant who was removed or left.
pub struct ParticipantRemovedEvent {
    pub session_id: String,
    pub uid: Uuid,
}
