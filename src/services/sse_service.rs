use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;
use uuid::Uuid;

use crate::{
    dto::sse::ServerEvent,
    error::ServiceError,
    services::{chat_service, sse_events},
    state::{SharedState, presence::PresenceGuard},
};

/// Identifies the SSE stream being served, for teardown logging.
#[derive(Clone, Debug)]
pub enum StreamKind {
    /// Personal stream of one user.
    User(Uuid),
    /// Session stream watched by a participant.
    Session { id: String, uid: Uuid },
}

impl StreamKind {
    fn label(&self) -> &'static str {
        match self {
            StreamKind::User(_) => "user",
            StreamKind::Session { .. } => "session",
        }
    }
}

/// A subscribed stream waiting to be turned into a response.
pub struct Subscription {
    receiver: broadcast::Receiver<ServerEvent>,
    initial: Vec<ServerEvent>,
    kind: StreamKind,
    presence: PresenceGuard,
}

/// Subscribe to the caller's own event stream (`partner.*` events).
pub async fn subscribe_user(state: &SharedState, uid: Uuid) -> Subscription {
    let receiver = state.user_events().subscribe(uid);
    let kind = StreamKind::User(uid);
    let initial = sse_events::handshake_event(kind.label(), state.is_degraded().await)
        .into_iter()
        .collect();
    Subscription {
        receiver,
        initial,
        kind,
        presence: state.presence().connect(uid),
    }
}

/// Subscribe to a session stream. The first events are the handshake and a
/// full snapshot of the session.
pub async fn subscribe_session(
    state: &SharedState,
    uid: Uuid,
    id: &str,
    access_key: &str,
) -> Result<Subscription, ServiceError> {
    let session = chat_service::authorize(state, uid, id, access_key).await?;
    // Subscribe before snapshotting so no update falls in between.
    let receiver = state.session_events().subscribe(session.id.clone());
    let session = chat_service::authorize(state, uid, &session.id, access_key).await?;

    let kind = StreamKind::Session {
        id: session.id.clone(),
        uid,
    };
    let initial = sse_events::handshake_event(kind.label(), state.is_degraded().await)
        .into_iter()
        .chain(sse_events::session_snapshot_event(&session))
        .collect();
    Ok(Subscription {
        receiver,
        initial,
        kind,
        presence: state.presence().connect(uid),
    })
}

/// Convert a subscription into an SSE response, forwarding events and
/// cleaning up once the client disconnects or the hub closes.
pub fn to_sse_stream(
    subscription: Subscription,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let Subscription {
        mut receiver,
        initial,
        kind,
        presence,
    } = subscription;

    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        let _presence = presence;
        for payload in initial {
            if tx.send(Ok(to_event(payload))).await.is_err() {
                return;
            }
        }
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(payload) => {
                            if tx.send(Ok(to_event(payload))).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => break,
                        // Skip lagged messages but keep the stream alive.
                        Err(RecvError::Lagged(_)) => continue,
                    }
                }
            }
        }

        match kind {
            StreamKind::User(uid) => info!(%uid, "user SSE stream disconnected"),
            StreamKind::Session { id, uid } => {
                info!(session = %id, %uid, "session SSE stream disconnected")
            }
        }
    });

    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

fn to_event(payload: ServerEvent) -> Event {
    let mut event = Event::default().data(payload.data);
    if let Some(name) = payload.event {
        event = event.event(name);
    }
    event
}
