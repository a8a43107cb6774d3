use serde::Serialize;
use serde_with::skip_serializing_none;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dto::format_system_time,
    state::session::{Participant, ParticipantStatus, Session, SessionPhase},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhaseDto {
    Lobby,
    Chatting,
}

impl From<SessionPhase> for SessionPhaseDto {
    fn from(value: SessionPhase) -> Self {
        match value {
            SessionPhase::Lobby => SessionPhaseDto::Lobby,
            SessionPhase::Chatting => SessionPhaseDto::Chatting,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatusDto {
    Pending,
    Accepted,
}

impl From<ParticipantStatus> for ParticipantStatusDto {
    fn from(value: ParticipantStatus) -> Self {
        match value {
            ParticipantStatus::Pending => ParticipantStatusDto::Pending,
            ParticipantStatus::Accepted => ParticipantStatusDto::Accepted,
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ParticipantView {
    pub uid: Uuid,
    pub display_name: String,
    pub photo_url: Option<String>,
    pub status: ParticipantStatusDto,
    pub joined_at: String,
}

impl From<&Participant> for ParticipantView {
    fn from(value: &Participant) -> Self {
        Self {
            uid: value.uid,
            display_name: value.display_name.clone(),
            photo_url: value.photo_url.clone(),
            status: value.status.into(),
            joined_at: format_system_time(value.joined_at),
        }
    }
}

/// Session state as seen by its participants. Never carries the access key.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SessionView {
    pub id: String,
    pub created_by: Uuid,
    pub admin_uid: Uuid,
    pub phase: SessionPhaseDto,
    /// Participants in join order.
    pub participants: Vec<ParticipantView>,
    pub created_at: String,
    pub updated_at: String,
    /// Increments on every change.
    pub revision: u64,
}

impl From<&Session> for SessionView {
    fn from(value: &Session) -> Self {
        Self {
            id: value.id.clone(),
            created_by: value.created_by,
            admin_uid: value.admin,
            phase: value.phase.into(),
            participants: value.participants.values().map(Into::into).collect(),
            created_at: format_system_time(value.created_at),
            updated_at: format_system_time(value.updated_at),
            revision: value.revision,
        }
    }
}

/// Returned once to the creator: the access key is not retrievable later.
#[derive(Debug, Serialize, ToSchema)]
pub struct CreatedSessionResponse {
    pub session: SessionView,
    /// 32 hex characters gating message access.
    pub access_key: String,
}
