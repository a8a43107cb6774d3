use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

/// Account document holding credentials, profile and relationship data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserEntity {
    /// Stable identifier for the account.
    pub id: Uuid,
    /// Normalised (trimmed, lowercase) email address, unique across accounts.
    pub email: String,
    /// Encoded password digest (see `services::credentials`).
    pub password_hash: String,
    /// Display name.
    pub name: String,
    /// Optional phone number as typed at registration.
    pub phone: Option<String>,
    /// Free-form sex field collected at registration.
    pub sex: String,
    /// Optional URL of the profile picture.
    pub profile_image: Option<String>,
    /// Whether the email address has been confirmed.
    pub email_verified: bool,
    /// Relationship state, mirrored on the partner's document.
    pub relationship: RelationshipEntity,
    /// Pairing code currently advertised by this user (single users only).
    pub partner_code: Option<String>,
    /// Outstanding email verification token.
    pub verification: Option<PendingTokenEntity>,
    /// Outstanding password reset token.
    pub password_reset: Option<PendingTokenEntity>,
    /// When the account was registered.
    pub created_at: SystemTime,
    /// Last write to the document.
    pub updated_at: SystemTime,
    /// Monotonic write counter used for compare-and-swap updates.
    pub revision: u64,
}

impl UserEntity {
    /// Identifier of the partner when the user is paired.
    pub fn partner_uid(&self) -> Option<Uuid> {
        match &self.relationship {
            RelationshipEntity::Single => None,
            RelationshipEntity::InRelationship { partner_uid, .. } => Some(*partner_uid),
        }
    }

    /// Prepare the entity for a compare-and-swap write, returning the revision the
    /// store must still hold for the write to apply.
    pub fn bump(&mut self) -> u64 {
        let expected = self.revision;
        self.revision += 1;
        self.updated_at = SystemTime::now();
        expected
    }
}

/// Relationship status of an account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RelationshipEntity {
    /// No partner; may advertise a pairing code.
    Single,
    /// Paired with another account.
    InRelationship { partner_uid: Uuid, partner_name: String },
}

/// Digest of a single-use token mailed to the user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingTokenEntity {
    /// Hex SHA-256 digest of the secret half of the token.
    pub digest: String,
    /// When the mail was sent, for the resend cooldown.
    pub issued_at: SystemTime,
    /// After this instant the token is refused.
    pub expires_at: SystemTime,
}

/// Chat session document. The identifier is the 6-character session code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionEntity {
    /// Session code.
    pub id: String,
    /// Account that created the session.
    pub created_by: Uuid,
    /// Account currently holding admin rights.
    pub admin_uid: Uuid,
    /// Participants in join order.
    pub participants: Vec<ParticipantEntity>,
    /// Lobby or chatting.
    pub phase: SessionPhaseEntity,
    /// Hex SHA-256 digest of the access key handed to the creator.
    pub access_key_digest: String,
    /// When the session was opened.
    pub created_at: SystemTime,
    /// Last membership or phase change.
    pub updated_at: SystemTime,
    /// Monotonic write counter used for compare-and-swap updates.
    pub revision: u64,
}

/// Persisted session lifecycle phase.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhaseEntity {
    /// Admission phase, no messages yet.
    Lobby,
    /// Messages flow between accepted participants.
    Chatting,
}

/// Membership entry inside a session document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParticipantEntity {
    /// Participant account.
    pub uid: Uuid,
    /// Name at join time, shown to other participants.
    pub display_name: String,
    /// Profile picture at join time.
    pub photo_url: Option<String>,
    /// Pending until the admin accepts.
    pub status: ParticipantStatusEntity,
    /// When the join request arrived.
    pub joined_at: SystemTime,
}

/// Persisted admission status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatusEntity {
    /// Waiting for the admin.
    Pending,
    /// Admitted to the chat.
    Accepted,
}

/// Append-only chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageEntity {
    /// Message identifier, the ordering tie-breaker.
    pub id: Uuid,
    /// Session the message belongs to.
    pub session_id: String,
    /// Author account.
    pub sender_uid: Uuid,
    /// Author display name at send time.
    pub sender_name: String,
    /// Trimmed message body.
    pub text: String,
    /// Server-assigned timestamp, the ordering key.
    pub created_at: SystemTime,
}
