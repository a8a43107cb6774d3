use std::time::SystemTime;

use indexmap::IndexMap;
use uuid::Uuid;

use crate::dao::models::{
    ParticipantEntity, ParticipantStatusEntity, SessionEntity, SessionPhaseEntity,
};

/// Lifecycle phase of a chat session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Participants gather and get admitted, no messages yet.
    Lobby,
    /// Messages flow between accepted participants.
    Chatting,
}

/// Admission status of a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantStatus {
    Pending,
    Accepted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub uid: Uuid,
    pub display_name: String,
    pub photo_url: Option<String>,
    pub status: ParticipantStatus,
    pub joined_at: SystemTime,
}

impl Participant {
    pub fn is_accepted(&self) -> bool {
        self.status == ParticipantStatus::Accepted
    }
}

/// In-memory view of a session document, participants kept in join order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub created_by: Uuid,
    pub admin: Uuid,
    pub participants: IndexMap<Uuid, Participant>,
    pub phase: SessionPhase,
    pub access_key_digest: String,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
    pub revision: u64,
}

impl Session {
    pub fn participant(&self, uid: Uuid) -> Option<&Participant> {
        self.participants.get(&uid)
    }

    pub fn is_accepted(&self, uid: Uuid) -> bool {
        self.participant(uid).is_some_and(Participant::is_accepted)
    }

    pub fn accepted_count(&self) -> usize {
        self.participants
            .values()
            .filter(|participant| participant.is_accepted())
            .count()
    }
}

impl From<SessionPhaseEntity> for SessionPhase {
    fn from(value: SessionPhaseEntity) -> Self {
        match value {
            SessionPhaseEntity::Lobby => SessionPhase::Lobby,
            SessionPhaseEntity::Chatting => SessionPhase::Chatting,
        }
    }
}

impl From<SessionPhase> for SessionPhaseEntity {
    fn from(value: SessionPhase) -> Self {
        match value {
            SessionPhase::Lobby => SessionPhaseEntity::Lobby,
            SessionPhase::Chatting => SessionPhaseEntity::Chatting,
        }
    }
}

impl From<ParticipantStatusEntity> for ParticipantStatus {
    fn from(value: ParticipantStatusEntity) -> Self {
        match value {
            ParticipantStatusEntity::Pending => ParticipantStatus::Pending,
            ParticipantStatusEntity::Accepted => ParticipantStatus::Accepted,
        }
    }
}

impl From<ParticipantStatus> for ParticipantStatusEntity {
    fn from(value: ParticipantStatus) -> Self {
        match value {
            ParticipantStatus::Pending => ParticipantStatusEntity::Pending,
            ParticipantStatus::Accepted => ParticipantStatusEntity::Accepted,
        }
    }
}

impl From<ParticipantEntity> for Participant {
    fn from(value: ParticipantEntity) -> Self {
        Self {
            uid: value.uid,
            display_name: value.display_name,
            photo_url: value.photo_url,
            status: value.status.into(),
            joined_at: value.joined_at,
        }
    }
}

impl From<Participant> for ParticipantEntity {
    fn from(value: Participant) -> Self {
        Self {
            uid: value.uid,
            display_name: value.display_name,
            photo_url: value.photo_url,
            status: value.status.into(),
            joined_at: value.joined_at,
        }
    }
}

impl From<SessionEntity> for Session {
    fn from(value: SessionEntity) -> Self {
        let participants = value
            .participants
            .into_iter()
            .map(|participant| (participant.uid, participant.into()))
            .collect();
        Self {
            id: value.id,
            created_by: value.created_by,
            admin: value.admin_uid,
            participants,
            phase: value.phase.into(),
            access_key_digest: value.access_key_digest,
            created_at: value.created_at,
            updated_at: value.updated_at,
            revision: value.revision,
        }
    }
}

impl From<Session> for SessionEntity {
    fn from(value: Session) -> Self {
        Self {
            id: value.id,
            created_by: value.created_by,
            admin_uid: value.admin,
            participants: value.participants.into_values().map(Into::into).collect(),
            phase: value.phase.into(),
            access_key_digest: value.access_key_digest,
            created_at: value.created_at,
            updated_at: value.updated_at,
            revision: value.revision,
        }
    }
}
