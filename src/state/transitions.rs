use tracing::{debug, info, warn};

use crate::{
    dto::sse::SessionEndReason,
    error::ServiceError,
    services::sse_events,
    state::{
        SharedState,
        codes::SessionCode,
        session::Session,
        session_machine::{Outcome, SessionEvent, SessionMachine},
    },
};

/// Persisted result of a session event.
#[derive(Debug, Clone)]
pub enum Applied {
    /// The event was already reflected; carries the current snapshot.
    Unchanged(Session),
    /// The session was rewritten.
    Updated { before: Session, after: Session },
    /// The session and its messages are gone; carries the last snapshot.
    Deleted(Session),
}

impl Applied {
    /// Session state after the event, when it still exists.
    pub fn current(&self) -> Option<&Session> {
        match self {
            Applied::Unchanged(session) | Applied::Updated { after: session, .. } => Some(session),
            Applied::Deleted(_) => None,
        }
    }
}

/// Read the session, plan `event` against it and persist the plan with a
/// compare-and-swap, re-reading and re-planning when another writer got there
/// first. Bounded by the configured attempts and transition timeout.
pub async fn apply_session_event(
    state: &SharedState,
    id: &SessionCode,
    event: SessionEvent,
) -> Result<Applied, ServiceError> {
    state
        .with_timeout(async {
            let store = state.require_store().await?;
            let max_participants = state.config().max_session_participants;
            for attempt in 1..=state.config().max_write_attempts {
                let Some(entity) = store.find_session(id.to_string()).await? else {
                    return Err(ServiceError::NotFound(format!("session `{id}` not found")));
                };
                let snapshot = Session::from(entity);
                let plan = SessionMachine::new(snapshot.clone(), max_participants)
                    .plan(event.clone())?;
                debug!(plan_id = %plan.id, session = %id, event = ?plan.event, "planned session transition");

                let applied = match plan.outcome {
                    Outcome::Unchanged => return Ok(Applied::Unchanged(snapshot)),
                    Outcome::Updated(next) => store
                        .update_session(next.clone().into(), plan.expected_revision)
                        .await?
                        .then(|| Applied::Updated {
                            before: snapshot,
                            after: next,
                        }),
                    Outcome::Deleted => store
                        .delete_session(id.to_string())
                        .await?
                        .then_some(Applied::Deleted(snapshot)),
                };
                if let Some(applied) = applied {
                    debug!(plan_id = %plan.id, session = %id, "session transition persisted");
                    return Ok(applied);
                }
                warn!(plan_id = %plan.id, session = %id, attempt, "session changed concurrently, re-planning");
            }
            Err(ServiceError::InvalidState(format!(
                "session `{id}` is being modified concurrently, retry later"
            )))
        })
        .await
}

/// Apply a session event, then broadcast what changed on the session stream.
pub async fn run_session_event_with_broadcast(
    state: &SharedState,
    id: &SessionCode,
    event: SessionEvent,
) -> Result<Applied, ServiceError> {
    let reason = match event {
        SessionEvent::End { .. } => SessionEndReason::Ended,
        _ => SessionEndReason::Emptied,
    };
    let applied = apply_session_event(state, id, event).await?;
    match &applied {
        Applied::Unchanged(_) => {}
        Applied::Updated { before, after } => {
            for uid in before.participants.keys() {
                if !after.participants.contains_key(uid) {
                    sse_events::broadcast_participant_removed(state, &after.id, *uid);
                }
            }
            sse_events::broadcast_session_updated(state, after);
        }
        Applied::Deleted(last) => {
            info!(session = %last.id, ?reason, "session deleted");
            sse_events::broadcast_session_ended(state, &last.id, reason);
        }
    }
    Ok(applied)
}
