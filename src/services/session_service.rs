use std::time::SystemTime;

use indexmap::IndexMap;
use tracing::info;
use uuid::Uuid;

use crate::{
    dao::models::{SessionEntity, UserEntity},
    dto::session::{CreatedSessionResponse, SessionView},
    error::ServiceError,
    services::{
        credentials::{digest_hex, random_access_key},
        profile_service::load_user,
    },
    state::{
        SharedState,
        codes::SessionCode,
        session::{Participant, ParticipantStatus, Session, SessionPhase},
        session_machine::SessionEvent,
        transitions::{Applied, run_session_event_with_broadcast},
    },
};

/// Random draws before giving up on finding a free session code.
const CODE_ATTEMPTS: usize = 16;

/// Open a new session with the caller as admin and first accepted participant.
///
/// The access key is only returned here; the store keeps its digest.
pub async fn create_session(
    state: &SharedState,
    uid: Uuid,
) -> Result<CreatedSessionResponse, ServiceError> {
    let creator = load_user(state, uid).await?;
    let store = state.require_store().await?;

    let access_key = random_access_key();
    let now = SystemTime::now();
    let mut participant = participant_from(&creator);
    participant.status = ParticipantStatus::Accepted;
    let mut participants = IndexMap::new();
    participants.insert(uid, participant);

    for _ in 0..CODE_ATTEMPTS {
        let session = Session {
            id: SessionCode::generate().into_string(),
            created_by: uid,
            admin: uid,
            participants: participants.clone(),
            phase: SessionPhase::Lobby,
            access_key_digest: digest_hex(&access_key),
            created_at: now,
            updated_at: now,
            revision: 0,
        };
        if store
            .insert_session(SessionEntity::from(session.clone()))
            .await?
        {
            info!(session = %session.id, %uid, "session created");
            return Ok(CreatedSessionResponse {
                session: SessionView::from(&session),
                access_key,
            });
        }
    }
    Err(ServiceError::InvalidState(
        "could not allocate a free session code, retry".into(),
    ))
}

/// Session state, visible to its participants only.
pub async fn get_session(
    state: &SharedState,
    uid: Uuid,
    id: &str,
) -> Result<SessionView, ServiceError> {
    let session = load_session(state, id).await?;
    ensure_participant(&session, uid)?;
    Ok(SessionView::from(&session))
}

/// Ask to join a session; the caller waits as pending until the admin accepts.
pub async fn join_session(
    state: &SharedState,
    uid: Uuid,
    id: &str,
) -> Result<SessionView, ServiceError> {
    let id = SessionCode::parse(id)?;
    let user = load_user(state, uid).await?;
    let applied =
        run_session_event_with_broadcast(state, &id, SessionEvent::Join(participant_from(&user)))
            .await?;
    if matches!(applied, Applied::Updated { .. }) {
        info!(session = %id, %uid, "participant joined as pending");
    }
    into_view(applied)
}

/// Admit a pending participant (admin only).
pub async fn accept_participant(
    state: &SharedState,
    actor: Uuid,
    id: &str,
    uid: Uuid,
) -> Result<SessionView, ServiceError> {
    let id = SessionCode::parse(id)?;
    let applied =
        run_session_event_with_broadcast(state, &id, SessionEvent::Accept { actor, uid }).await?;
    into_view(applied)
}

/// Remove another participant (admin only). Removing the last one deletes the session.
pub async fn remove_participant(
    state: &SharedState,
    actor: Uuid,
    id: &str,
    uid: Uuid,
) -> Result<SessionView, ServiceError> {
    let id = SessionCode::parse(id)?;
    let applied =
        run_session_event_with_broadcast(state, &id, SessionEvent::Remove { actor, uid }).await?;
    info!(session = %id, %actor, %uid, "participant removed");
    into_view(applied)
}

/// Leave a session. The last one out deletes it.
pub async fn leave_session(state: &SharedState, uid: Uuid, id: &str) -> Result<(), ServiceError> {
    let id = SessionCode::parse(id)?;
    let applied = run_session_event_with_broadcast(state, &id, SessionEvent::Leave { uid }).await?;
    if let Applied::Updated { before, after } = &applied {
        if before.admin != after.admin {
            info!(session = %id, from = %before.admin, to = %after.admin, "admin rights handed over");
        }
    }
    Ok(())
}

/// Open the chat once at least two participants are accepted.
pub async fn start_chat(
    state: &SharedState,
    actor: Uuid,
    id: &str,
) -> Result<SessionView, ServiceError> {
    let id = SessionCode::parse(id)?;
    let applied =
        run_session_event_with_broadcast(state, &id, SessionEvent::StartChat { actor }).await?;
    info!(session = %id, "chat started");
    into_view(applied)
}

/// End the session for everyone, deleting its messages.
pub async fn end_session(state: &SharedState, actor: Uuid, id: &str) -> Result<(), ServiceError> {
    let id = SessionCode::parse(id)?;
    run_session_event_with_broadcast(state, &id, SessionEvent::End { actor }).await?;
    Ok(())
}

/// Load a session by its (user supplied) code.
pub(crate) async fn load_session(state: &SharedState, id: &str) -> Result<Session, ServiceError> {
    let id = SessionCode::parse(id)?;
    let store = state.require_store().await?;
    store
        .find_session(id.to_string())
        .await?
        .map(Session::from)
        .ok_or_else(|| ServiceError::NotFound(format!("session `{id}` not found")))
}

pub(crate) fn ensure_participant(session: &Session, uid: Uuid) -> Result<(), ServiceError> {
    if session.participant(uid).is_none() {
        return Err(ServiceError::Forbidden(format!(
            "you are not a participant of session `{}`",
            session.id
        )));
    }
    Ok(())
}

fn participant_from(user: &UserEntity) -> Participant {
    Participant {
        uid: user.id,
        display_name: user.name.clone(),
        photo_url: user.profile_image.clone(),
        status: ParticipantStatus::Pending,
        joined_at: SystemTime::now(),
    }
}

fn into_view(applied: Applied) -> Result<SessionView, ServiceError> {
    applied
        .current()
        .map(SessionView::from)
        .ok_or_else(|| ServiceError::NotFound("session no longer exists".into()))
}
