use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::dto::chat::MessageView;

#[derive(Debug, Deserialize, Serialize, ToSchema)]
/// Frames accepted from chat WebSocket clients.
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatInboundMessage {
    /// Must be the first frame: bearer token and session access key.
    Identification { token: String, access_key: String },
    Message { text: String },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Serialize, ToSchema)]
/// Frames pushed to chat WebSocket clients.
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatOutboundMessage {
    /// Positive acknowledgement after identification.
    Ready { session_id: String },
    Message { message: MessageView },
    Error { message: String },
    /// The session is gone; the server closes the socket next.
    Ended { session_id: String },
}
