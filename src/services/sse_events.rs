use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::{
    dto::{
        chat::MessageView,
        session::SessionView,
        sse::{
            Handshake, ParticipantRemovedEvent, PartnerPairedEvent, PartnerUnpairedEvent,
            ServerEvent, SessionEndReason, SessionEndedEvent,
        },
    },
    state::{SharedState, session::Session},
};

pub(crate) const EVENT_HANDSHAKE: &str = "handshake";
pub(crate) const EVENT_PARTNER_PAIRED: &str = "partner.paired";
pub(crate) const EVENT_PARTNER_UNPAIRED: &str = "partner.unpaired";
pub(crate) const EVENT_SESSION_SNAPSHOT: &str = "session.snapshot";
pub(crate) const EVENT_SESSION_UPDATED: &str = "session.updated";
pub(crate) const EVENT_SESSION_ENDED: &str = "session.ended";
pub(crate) const EVENT_PARTICIPANT_REMOVED: &str = "participant.removed";
pub(crate) const EVENT_MESSAGE_CREATED: &str = "message.created";

/// Tell `uid` they are now paired with `partner_uid`.
pub fn notify_partner_paired(state: &SharedState, uid: Uuid, partner_uid: Uuid, partner_name: &str) {
    let payload = PartnerPairedEvent {
        partner_uid,
        partner_name: partner_name.to_string(),
    };
    send_user_event(state, uid, EVENT_PARTNER_PAIRED, &payload);
}

/// Tell `uid` the relationship with `partner_uid` is over.
pub fn notify_partner_unpaired(state: &SharedState, uid: Uuid, partner_uid: Uuid) {
    let payload = PartnerUnpairedEvent { partner_uid };
    send_user_event(state, uid, EVENT_PARTNER_UNPAIRED, &payload);
}

/// Broadcast the new state of a session to its stream.
pub fn broadcast_session_updated(state: &SharedState, session: &Session) {
    let payload = SessionView::from(session);
    send_session_event(state, &session.id, EVENT_SESSION_UPDATED, &payload);
}

/// Broadcast that `uid` no longer belongs to the session.
pub fn broadcast_participant_removed(state: &SharedState, session_id: &str, uid: Uuid) {
    let payload = ParticipantRemovedEvent {
        session_id: session_id.to_string(),
        uid,
    };
    send_session_event(state, session_id, EVENT_PARTICIPANT_REMOVED, &payload);
}

/// Broadcast the end of a session, then close its stream.
pub fn broadcast_session_ended(state: &SharedState, session_id: &str, reason: SessionEndReason) {
    let payload = SessionEndedEvent {
        session_id: session_id.to_string(),
        reason,
    };
    send_session_event(state, session_id, EVENT_SESSION_ENDED, &payload);
    state.session_events().close(&session_id.to_string());
}

/// Broadcast a freshly stored chat message.
pub fn broadcast_message_created(state: &SharedState, message: &MessageView) {
    send_session_event(state, &message.session_id, EVENT_MESSAGE_CREATED, message);
}

/// First event of every stream.
pub fn handshake_event(stream: &str, degraded: bool) -> Option<ServerEvent> {
    let payload = Handshake {
        stream: stream.to_string(),
        degraded,
    };
    to_event(EVENT_HANDSHAKE, &payload)
}

/// Full session state sent when a client subscribes to a session stream.
pub fn session_snapshot_event(session: &Session) -> Option<ServerEvent> {
    to_event(EVENT_SESSION_SNAPSHOT, &SessionView::from(session))
}

fn send_user_event(state: &SharedState, uid: Uuid, event: &str, payload: &impl Serialize) {
    if let Some(event) = to_event(event, payload) {
        state.user_events().broadcast(&uid, event);
    }
}

fn send_session_event(state: &SharedState, session_id: &str, event: &str, payload: &impl Serialize) {
    if let Some(event) = to_event(event, payload) {
        state
            .session_events()
            .broadcast(&session_id.to_string(), event);
    }
}

fn to_event(event: &str, payload: &impl Serialize) -> Option<ServerEvent> {
    match ServerEvent::json(Some(event.to_string()), payload) {
        Ok(event) => Some(event),
        Err(err) => {
            warn!(event, error = %err, "failed to serialize SSE payload");
            None
        }
    }
}
