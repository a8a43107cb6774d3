use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::{dao::models::MessageEntity, dto::format_system_time};

/// Header carrying the session access key on chat routes.
pub const ACCESS_KEY_HEADER: &str = "x-access-key";

#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct SendMessageRequest {
    /// Trimmed server-side; the maximum length is configured.
    #[validate(length(min = 1))]
    pub text: String,
}

/// History window: messages strictly newer than `since`, oldest first.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct MessageQuery {
    /// RFC 3339 timestamp, typically the `created_at` of the last message seen.
    pub since: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageView {
    pub id: Uuid,
    pub session_id: String,
    pub sender_uid: Uuid,
    pub sender_name: String,
    pub text: String,
    /// Server-assigned RFC 3339 timestamp.
    pub created_at: String,
}

impl From<MessageEntity> for MessageView {
    fn from(value: MessageEntity) -> Self {
        Self {
            id: value.id,
            session_id: value.session_id,
            sender_uid: value.sender_uid,
            sender_name: value.sender_name,
            text: value.text,
            created_at: format_system_time(value.created_at),
        }
    }
}
