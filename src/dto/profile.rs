use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::{RelationshipEntity, UserEntity},
    dto::{
        format_system_time,
        validation::{validate_not_blank, validate_phone},
    },
};

/// Relationship status as shown to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipStatusDto {
    Single,
    InRelationship,
}

/// Full account view returned to its owner.
#[skip_serializing_none]
#[derive(Debug, Serialize, ToSchema)]
pub struct ProfileResponse {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    pub sex: String,
    pub profile_image: Option<String>,
    pub email_verified: bool,
    pub relationship_status: RelationshipStatusDto,
    pub partner_uid: Option<Uuid>,
    pub partner_name: Option<String>,
    pub partner_code: Option<String>,
    /// RFC 3339 timestamp.
    pub created_at: String,
}

impl From<UserEntity> for ProfileResponse {
    fn from(user: UserEntity) -> Self {
        let (relationship_status, partner_uid, partner_name) = relationship_fields(&user);
        Self {
            id: user.id,
            email: user.email,
            name: user.name,
            phone: user.phone,
            sex: user.sex,
            profile_image: user.profile_image,
            email_verified: user.email_verified,
            relationship_status,
            partner_uid,
            partner_name,
            partner_code: user.partner_code,
            created_at: format_system_time(user.created_at),
        }
    }
}

/// Partial profile update; omitted fields stay untouched.
#[derive(Debug, Default, Deserialize, ToSchema, Validate)]
pub struct UpdateProfileRequest {
    #[validate(length(max = 80), custom(function = "validate_not_blank"))]
    pub name: Option<String>,
    #[validate(url)]
    pub profile_image: Option<String>,
    #[validate(custom(function = "validate_phone"))]
    pub phone: Option<String>,
    #[validate(length(max = 32), custom(function = "validate_not_blank"))]
    pub sex: Option<String>,
}

/// Home screen projection: who I am and where my relationship stands.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct OverviewResponse {
    pub name: String,
    pub relationship_status: RelationshipStatusDto,
    pub partner_uid: Option<Uuid>,
    pub partner_name: Option<String>,
    /// Code to hand to a partner, present while single.
    pub partner_code: Option<String>,
}

impl From<&UserEntity> for OverviewResponse {
    fn from(user: &UserEntity) -> Self {
        let (relationship_status, partner_uid, partner_name) = relationship_fields(user);
        Self {
            name: user.name.clone(),
            relationship_status,
            partner_uid,
            partner_name,
            partner_code: user.partner_code.clone(),
        }
    }
}

/// Public card of another user.
#[skip_serializing_none]
#[derive(Debug, Serialize, ToSchema)]
pub struct UserSummary {
    pub id: Uuid,
    pub name: String,
    pub profile_image: Option<String>,
}

impl From<UserEntity> for UserSummary {
    fn from(user: UserEntity) -> Self {
        Self {
            id: user.id,
            name: user.name,
            profile_image: user.profile_image,
        }
    }
}

fn relationship_fields(user: &UserEntity) -> (RelationshipStatusDto, Option<Uuid>, Option<String>) {
    match &user.relationship {
        RelationshipEntity::Single => (RelationshipStatusDto::Single, None, None),
        RelationshipEntity::InRelationship {
            partner_uid,
            partner_name,
        } => (
            RelationshipStatusDto::InRelationship,
            Some(*partner_uid),
            Some(partner_name.clone()),
        ),
    }
}
