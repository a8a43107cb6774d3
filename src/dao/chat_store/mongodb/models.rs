use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::MongoDaoError;
use crate::dao::models::{
    MessageEntity, ParticipantEntity, ParticipantStatusEntity, PendingTokenEntity,
    RelationshipEntity, SessionEntity, SessionPhaseEntity, UserEntity,
};

const STATUS_SINGLE: &str = "single";
const STATUS_IN_RELATIONSHIP: &str = "in_relationship";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoUserDocument {
    #[serde(rename = "_id")]
    id: String,
    email: String,
    password_hash: String,
    name: String,
    phone: Option<String>,
    sex: String,
    profile_image: Option<String>,
    email_verified: bool,
    relationship_status: String,
    partner_uid: Option<String>,
    partner_name: Option<String>,
    partner_code: Option<String>,
    verification: Option<MongoPendingToken>,
    password_reset: Option<MongoPendingToken>,
    created_at: DateTime,
    updated_at: DateTime,
    revision: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MongoPendingToken {
    digest: String,
    issued_at: DateTime,
    expires_at: DateTime,
}

impl From<PendingTokenEntity> for MongoPendingToken {
    fn from(value: PendingTokenEntity) -> Self {
        Self {
            digest: value.digest,
            issued_at: DateTime::from_system_time(value.issued_at),
            expires_at: DateTime::from_system_time(value.expires_at),
        }
    }
}

impl From<MongoPendingToken> for PendingTokenEntity {
    fn from(value: MongoPendingToken) -> Self {
        Self {
            digest: value.digest,
            issued_at: value.issued_at.to_system_time(),
            expires_at: value.expires_at.to_system_time(),
        }
    }
}

impl From<UserEntity> for MongoUserDocument {
    fn from(value: UserEntity) -> Self {
        let (relationship_status, partner_uid, partner_name) = match value.relationship {
            RelationshipEntity::Single => (STATUS_SINGLE, None, None),
            RelationshipEntity::InRelationship {
                partner_uid,
                partner_name,
            } => (
                STATUS_IN_RELATIONSHIP,
                Some(partner_uid.to_string()),
                Some(partner_name),
            ),
        };
        Self {
            id: value.id.to_string(),
            email: value.email,
            password_hash: value.password_hash,
            name: value.name,
            phone: value.phone,
            sex: value.sex,
            profile_image: value.profile_image,
            email_verified: value.email_verified,
            relationship_status: relationship_status.to_owned(),
            partner_uid,
            partner_name,
            partner_code: value.partner_code,
            verification: value.verification.map(Into::into),
            password_reset: value.password_reset.map(Into::into),
            created_at: DateTime::from_system_time(value.created_at),
            updated_at: DateTime::from_system_time(value.updated_at),
            revision: revision_to_bson(value.revision),
        }
    }
}

impl TryFrom<MongoUserDocument> for UserEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoUserDocument) -> Result<Self, Self::Error> {
        let id = parse_uuid(&value.id, &value.id)?;
        let relationship = match value.relationship_status.as_str() {
            STATUS_SINGLE => RelationshipEntity::Single,
            STATUS_IN_RELATIONSHIP => {
                let partner_uid = value
                    .partner_uid
                    .as_deref()
                    .ok_or_else(|| decode_error(&value.id, "partner_uid missing"))?;
                RelationshipEntity::InRelationship {
                    partner_uid: parse_uuid(&value.id, partner_uid)?,
                    partner_name: value.partner_name.unwrap_or_default(),
                }
            }
            other => {
                return Err(decode_error(
                    &value.id,
                    &format!("unknown relationship status `{other}`"),
                ));
            }
        };
        Ok(Self {
            id,
            email: value.email,
            password_hash: value.password_hash,
            name: value.name,
            phone: value.phone,
            sex: value.sex,
            profile_image: value.profile_image,
            email_verified: value.email_verified,
            relationship,
            partner_code: value.partner_code,
            verification: value.verification.map(Into::into),
            password_reset: value.password_reset.map(Into::into),
            created_at: value.created_at.to_system_time(),
            updated_at: value.updated_at.to_system_time(),
            revision: revision_from_bson(value.revision),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoSessionDocument {
    #[serde(rename = "_id")]
    id: String,
    created_by: String,
    admin_uid: String,
    participants: Vec<MongoParticipant>,
    phase: SessionPhaseEntity,
    access_key_digest: String,
    created_at: DateTime,
    updated_at: DateTime,
    revision: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MongoParticipant {
    uid: String,
    display_name: String,
    photo_url: Option<String>,
    status: ParticipantStatusEntity,
    joined_at: DateTime,
}

impl From<SessionEntity> for MongoSessionDocument {
    fn from(value: SessionEntity) -> Self {
        Self {
            id: value.id,
            created_by: value.created_by.to_string(),
            admin_uid: value.admin_uid.to_string(),
            participants: value
                .participants
                .into_iter()
                .map(|participant| MongoParticipant {
                    uid: participant.uid.to_string(),
                    display_name: participant.display_name,
                    photo_url: participant.photo_url,
                    status: participant.status,
                    joined_at: DateTime::from_system_time(participant.joined_at),
                })
                .collect(),
            phase: value.phase,
            access_key_digest: value.access_key_digest,
            created_at: DateTime::from_system_time(value.created_at),
            updated_at: DateTime::from_system_time(value.updated_at),
            revision: revision_to_bson(value.revision),
        }
    }
}

impl TryFrom<MongoSessionDocument> for SessionEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoSessionDocument) -> Result<Self, Self::Error> {
        let participants = value
            .participants
            .into_iter()
            .map(|participant| {
                Ok(ParticipantEntity {
                    uid: parse_uuid(&value.id, &participant.uid)?,
                    display_name: participant.display_name,
                    photo_url: participant.photo_url,
                    status: participant.status,
                    joined_at: participant.joined_at.to_system_time(),
                })
            })
            .collect::<Result<Vec<_>, MongoDaoError>>()?;
        Ok(Self {
            created_by: parse_uuid(&value.id, &value.created_by)?,
            admin_uid: parse_uuid(&value.id, &value.admin_uid)?,
            id: value.id,
            participants,
            phase: value.phase,
            access_key_digest: value.access_key_digest,
            created_at: value.created_at.to_system_time(),
            updated_at: value.updated_at.to_system_time(),
            revision: revision_from_bson(value.revision),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoMessageDocument {
    #[serde(rename = "_id")]
    id: String,
    session_id: String,
    sender_uid: String,
    sender_name: String,
    text: String,
    created_at: DateTime,
}

impl From<MessageEntity> for MongoMessageDocument {
    fn from(value: MessageEntity) -> Self {
        Self {
            id: value.id.to_string(),
            session_id: value.session_id,
            sender_uid: value.sender_uid.to_string(),
            sender_name: value.sender_name,
            text: value.text,
            created_at: DateTime::from_system_time(value.created_at),
        }
    }
}

impl TryFrom<MongoMessageDocument> for MessageEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoMessageDocument) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_uuid(&value.id, &value.id)?,
            sender_uid: parse_uuid(&value.id, &value.sender_uid)?,
            session_id: value.session_id,
            sender_name: value.sender_name,
            text: value.text,
            created_at: value.created_at.to_system_time(),
        })
    }
}

pub fn doc_id(id: &str) -> Document {
    doc! {"_id": id}
}

/// Filter matching a document only while it still holds `revision`.
pub fn revision_filter(id: &str, revision: u64) -> Document {
    doc! {"_id": id, "revision": revision_to_bson(revision)}
}

fn revision_to_bson(revision: u64) -> i64 {
    i64::try_from(revision).unwrap_or(i64::MAX)
}

fn revision_from_bson(revision: i64) -> u64 {
    u64::try_from(revision).unwrap_or_default()
}

fn parse_uuid(doc_id: &str, raw: &str) -> Result<Uuid, MongoDaoError> {
    Uuid::parse_str(raw).map_err(|_| decode_error(doc_id, &format!("invalid UUID `{raw}`")))
}

fn decode_error(doc_id: &str, reason: &str) -> MongoDaoError {
    MongoDaoError::Decode {
        id: doc_id.to_owned(),
        reason: reason.to_owned(),
    }
}
