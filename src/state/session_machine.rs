//! Pure planning of session membership and phase changes.
//!
//! A [`SessionMachine`] wraps a revision-stamped snapshot of a session. Planning an
//! event never touches storage: it yields the document to write back (or the
//! instruction to delete it) together with the revision the store must still
//! hold. Callers persist the plan with a compare-and-swap and re-plan from a
//! fresh read when the write loses a race.

use std::time::SystemTime;

use thiserror::Error;
use uuid::Uuid;

use crate::state::session::{Participant, ParticipantStatus, Session, SessionPhase};

/// Events that can be applied to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A user asks to join; admitted as pending.
    Join(Participant),
    /// The admin admits a pending participant.
    Accept { actor: Uuid, uid: Uuid },
    /// The admin removes another participant.
    Remove { actor: Uuid, uid: Uuid },
    /// A participant leaves on their own.
    Leave { uid: Uuid },
    /// The admin opens the chat.
    StartChat { actor: Uuid },
    /// The admin ends the session for everyone.
    End { actor: Uuid },
}

impl SessionEvent {
    fn name(&self) -> &'static str {
        match self {
            SessionEvent::Join(_) => "join",
            SessionEvent::Accept { .. } => "accept",
            SessionEvent::Remove { .. } => "remove",
            SessionEvent::Leave { .. } => "leave",
            SessionEvent::StartChat { .. } => "start_chat",
            SessionEvent::End { .. } => "end",
        }
    }
}

/// Reasons an event cannot be applied to the current snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidTransition {
    #[error("user `{0}` is not a participant of this session")]
    NotParticipant(Uuid),
    #[error("only the session admin can do this")]
    NotAdmin(Uuid),
    #[error("participant `{0}` not found in this session")]
    UnknownParticipant(Uuid),
    #[error("the admin cannot remove themself, leave the session instead")]
    RemoveSelf,
    #[error("session is full ({max} participants)")]
    Full { max: usize },
    #[error("at least 2 accepted participants are required, found {accepted}")]
    NotEnoughAccepted { accepted: usize },
    #[error("{event} cannot be applied while the session is {phase:?}")]
    WrongPhase {
        phase: SessionPhase,
        event: &'static str,
    },
}

/// Unique identifier for a planned transition, used to correlate logs.
pub type PlanId = Uuid;

/// What persisting a plan means for the session document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing to write, the event was already reflected.
    Unchanged,
    /// Write back the session carrying its next revision.
    Updated(Session),
    /// Delete the session and its messages.
    Deleted,
}

/// A validated transition that has not been persisted yet.
#[derive(Debug, Clone)]
pub struct Plan {
    pub id: PlanId,
    pub event: SessionEvent,
    /// Revision the stored document must still hold for the plan to apply.
    pub expected_revision: u64,
    pub outcome: Outcome,
}

/// State machine evaluating events against a single session snapshot.
#[derive(Debug, Clone)]
pub struct SessionMachine {
    session: Session,
    max_participants: usize,
}

impl SessionMachine {
    pub fn new(session: Session, max_participants: usize) -> Self {
        Self {
            session,
            max_participants,
        }
    }

    /// Validate `event` and compute the resulting document.
    pub fn plan(&self, event: SessionEvent) -> Result<Plan, InvalidTransition> {
        let outcome = self.compute_transition(&event)?;
        Ok(Plan {
            id: Uuid::new_v4(),
            event,
            expected_revision: self.session.revision,
            outcome,
        })
    }

    fn compute_transition(&self, event: &SessionEvent) -> Result<Outcome, InvalidTransition> {
        let current = &self.session;
        match event {
            SessionEvent::Join(candidate) => {
                if current.participants.contains_key(&candidate.uid) {
                    return Ok(Outcome::Unchanged);
                }
                if current.participants.len() >= self.max_participants {
                    return Err(InvalidTransition::Full {
                        max: self.max_participants,
                    });
                }
                let mut next = self.next();
                let mut participant = candidate.clone();
                participant.status = ParticipantStatus::Pending;
                next.participants.insert(participant.uid, participant);
                Ok(Outcome::Updated(next))
            }
            SessionEvent::Accept { actor, uid } => {
                self.ensure_admin(*actor)?;
                let participant = current
                    .participant(*uid)
                    .ok_or(InvalidTransition::UnknownParticipant(*uid))?;
                if participant.is_accepted() {
                    return Ok(Outcome::Unchanged);
                }
                let mut next = self.next();
                if let Some(participant) = next.participants.get_mut(uid) {
                    participant.status = ParticipantStatus::Accepted;
                }
                Ok(Outcome::Updated(next))
            }
            SessionEvent::Remove { actor, uid } => {
                self.ensure_admin(*actor)?;
                if actor == uid {
                    return Err(InvalidTransition::RemoveSelf);
                }
                if !current.participants.contains_key(uid) {
                    return Err(InvalidTransition::UnknownParticipant(*uid));
                }
                let mut next = self.next();
                next.participants.shift_remove(uid);
                Ok(Outcome::Updated(next))
            }
            SessionEvent::Leave { uid } => {
                if !current.participants.contains_key(uid) {
                    return Err(InvalidTransition::NotParticipant(*uid));
                }
                let mut next = self.next();
                next.participants.shift_remove(uid);
                if next.participants.is_empty() {
                    return Ok(Outcome::Deleted);
                }
                if next.admin == *uid {
                    hand_over_admin(&mut next);
                }
                Ok(Outcome::Updated(next))
            }
            SessionEvent::StartChat { actor } => {
                self.ensure_admin(*actor)?;
                if current.phase != SessionPhase::Lobby {
                    return Err(InvalidTransition::WrongPhase {
                        phase: current.phase,
                        event: event.name(),
                    });
                }
                let accepted = current.accepted_count();
                if accepted < 2 {
                    return Err(InvalidTransition::NotEnoughAccepted { accepted });
                }
                let mut next = self.next();
                next.phase = SessionPhase::Chatting;
                Ok(Outcome::Updated(next))
            }
            SessionEvent::End { actor } => {
                self.ensure_admin(*actor)?;
                Ok(Outcome::Deleted)
            }
        }
    }

    fn ensure_admin(&self, actor: Uuid) -> Result<(), InvalidTransition> {
        if !self.session.participants.contains_key(&actor) {
            return Err(InvalidTransition::NotParticipant(actor));
        }
        if self.session.admin != actor {
            return Err(InvalidTransition::NotAdmin(actor));
        }
        Ok(())
    }

    /// Copy of the snapshot stamped with the next revision.
    fn next(&self) -> Session {
        let mut next = self.session.clone();
        next.revision += 1;
        next.updated_at = SystemTime::now();
        next
    }
}

/// Pass admin rights to the longest-standing accepted participant, or failing
/// that the longest-standing one, who is then admitted.
fn hand_over_admin(session: &mut Session) {
    let heir = session
        .participants
        .values()
        .find(|participant| participant.is_accepted())
        .or_else(|| session.participants.values().next())
        .map(|participant| participant.uid);
    if let Some(heir) = heir {
        session.admin = heir;
        if let Some(participant) = session.participants.get_mut(&heir) {
            participant.status = ParticipantStatus::Accepted;
        }
    }
}
