use std::time::SystemTime;

use tracing::debug;
use uuid::Uuid;

use crate::{
    dao::models::MessageEntity,
    dto::{
        chat::{MessageQuery, MessageView},
        parse_timestamp,
    },
    error::ServiceError,
    services::{
        credentials::matches_digest,
        session_service::{ensure_participant, load_session},
        sse_events,
    },
    state::{
        SharedState,
        session::{Session, SessionPhase},
    },
};

/// Load a session for a participant presenting its access key.
pub(crate) async fn authorize(
    state: &SharedState,
    uid: Uuid,
    id: &str,
    access_key: &str,
) -> Result<Session, ServiceError> {
    let session = load_session(state, id).await?;
    ensure_participant(&session, uid)?;
    if !matches_digest(access_key.trim(), &session.access_key_digest) {
        return Err(ServiceError::Forbidden("invalid session access key".into()));
    }
    Ok(session)
}

/// Store a message from an accepted participant of a chatting session and
/// fan it out to the session stream.
pub async fn send_message(
    state: &SharedState,
    uid: Uuid,
    id: &str,
    access_key: &str,
    text: &str,
) -> Result<MessageView, ServiceError> {
    let session = authorize(state, uid, id, access_key).await?;
    let Some(sender) = session.participant(uid).filter(|sender| sender.is_accepted()) else {
        return Err(ServiceError::Forbidden(
            "only accepted participants can send messages".into(),
        ));
    };
    if session.phase != SessionPhase::Chatting {
        return Err(ServiceError::InvalidState(
            "the chat has not been started yet".into(),
        ));
    }

    let text = text.trim();
    if text.is_empty() {
        return Err(ServiceError::InvalidInput("message must not be empty".into()));
    }
    let max = state.config().max_message_len;
    if text.chars().count() > max {
        return Err(ServiceError::InvalidInput(format!(
            "message exceeds {max} characters"
        )));
    }

    let message = MessageEntity {
        id: Uuid::new_v4(),
        session_id: session.id.clone(),
        sender_uid: uid,
        sender_name: sender.display_name.clone(),
        text: text.to_string(),
        created_at: SystemTime::now(),
    };
    let store = state.require_store().await?;
    store.append_message(message.clone()).await?;
    // The session may have ended between the check above and the append.
    // Deletion removes the session before its messages, so a miss here means
    // the purge may already be done.
    let current = store.find_session(session.id.clone()).await?;
    if current.is_none_or(|current| current.access_key_digest != session.access_key_digest) {
        store.delete_message(message).await?;
        return Err(ServiceError::NotFound(format!(
            "session `{}` has ended",
            session.id
        )));
    }
    debug!(session = %session.id, message = %message.id, "message stored");

    let view = MessageView::from(message);
    sse_events::broadcast_message_created(state, &view);
    Ok(view)
}

/// History of a session, oldest first, strictly after `since` when given.
pub async fn list_messages(
    state: &SharedState,
    uid: Uuid,
    id: &str,
    access_key: &str,
    query: MessageQuery,
) -> Result<Vec<MessageView>, ServiceError> {
    let session = authorize(state, uid, id, access_key).await?;
    if !session.is_accepted(uid) {
        return Err(ServiceError::Forbidden(
            "only accepted participants can read messages".into(),
        ));
    }

    let since = query
        .since
        .as_deref()
        .map(|raw| {
            parse_timestamp(raw).ok_or_else(|| {
                ServiceError::InvalidInput(format!("`{raw}` is not an RFC 3339 timestamp"))
            })
        })
        .transpose()?;
    let page = state.config().message_page_size;
    let limit = query.limit.unwrap_or(page).clamp(1, page);

    let store = state.require_store().await?;
    let messages = store.list_messages(session.id, since, limit).await?;
    Ok(messages.into_iter().map(MessageView::from).collect())
}
