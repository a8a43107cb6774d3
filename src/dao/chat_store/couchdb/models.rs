use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const USER_PREFIX: &str = "user::";
pub const EMAIL_PREFIX: &str = "email::";
pub const CODE_PREFIX: &str = "pair_code::";
pub const SESSION_PREFIX: &str = "session::";
pub const MESSAGE_PREFIX: &str = "message::";
pub const END_SUFFIX: &str = "\u{ffff}";

pub const USER_TYPE: &str = "user";
pub const EMAIL_CLAIM_TYPE: &str = "email_claim";
pub const CODE_CLAIM_TYPE: &str = "code_claim";
pub const SESSION_TYPE: &str = "session";
pub const MESSAGE_TYPE: &str = "message";

/// Width of the zero-padded millisecond timestamp embedded in message ids.
const MESSAGE_MILLIS_WIDTH: usize = 15;

/// Envelope shared by every stored document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchDocument<T> {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    pub doc_type: String,
    #[serde(flatten)]
    pub body: T,
}

impl<T> CouchDocument<T> {
    pub fn new(id: String, doc_type: &str, body: T) -> Self {
        Self {
            id,
            rev: None,
            doc_type: doc_type.to_owned(),
            body,
        }
    }
}

/// Reserves an email address or a pairing code for a single account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct AllDocsResponse {
    pub rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
pub struct AllDocsRow {
    pub id: String,
    #[serde(default)]
    pub value: Option<RowValue>,
    #[serde(default)]
    pub doc: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct RowValue {
    pub rev: String,
}

#[derive(Debug, Deserialize)]
pub struct FindResponse {
    pub docs: Vec<Value>,
}

/// Tombstone entry for `_bulk_docs`.
#[derive(Debug, Serialize)]
pub struct DeletedDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev")]
    pub rev: String,
    #[serde(rename = "_deleted")]
    pub deleted: bool,
}

#[derive(Debug, Serialize)]
pub struct BulkDocsRequest {
    pub docs: Vec<DeletedDocument>,
}

pub fn user_doc_id(id: Uuid) -> String {
    format!("{USER_PREFIX}{id}")
}

pub fn email_doc_id(email: &str) -> String {
    format!("{EMAIL_PREFIX}{email}")
}

pub fn code_doc_id(code: &str) -> String {
    format!("{CODE_PREFIX}{code}")
}

pub fn session_doc_id(id: &str) -> String {
    format!("{SESSION_PREFIX}{id}")
}

pub fn message_prefix(session_id: &str) -> String {
    format!("{MESSAGE_PREFIX}{session_id}::")
}

/// Message ids sort by creation time, then by message uuid.
pub fn message_doc_id(session_id: &str, created_at: SystemTime, id: Uuid) -> String {
    format!("{}{}::{id}", message_prefix(session_id), padded_millis(created_at))
}

/// First key at or after `since` within a session's message range.
pub fn message_start_key(session_id: &str, since: SystemTime) -> String {
    format!("{}{}", message_prefix(session_id), padded_millis(since))
}

fn padded_millis(at: SystemTime) -> String {
    let millis = at
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    format!("{millis:0width$}", width = MESSAGE_MILLIS_WIDTH)
}
