use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::{
    sync::{
        broadcast::{self, error::RecvError},
        mpsc,
    },
    task::JoinHandle,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dto::{
        chat::MessageView,
        sse::ServerEvent,
        ws::{ChatInboundMessage, ChatOutboundMessage},
    },
    error::ServiceError,
    services::{
        auth_service, chat_service,
        sse_events::{EVENT_MESSAGE_CREATED, EVENT_PARTICIPANT_REMOVED, EVENT_SESSION_ENDED},
    },
    state::SharedState,
};

const IDENT_TIMEOUT: Duration = Duration::from_secs(10);
/// Room for the JSON envelope and the identification frame's credentials.
const FRAME_OVERHEAD: usize = 1024;

/// Largest inbound frame accepted for messages of `max_message_len` characters.
pub fn frame_limit(max_message_len: usize) -> usize {
    // UTF-8 needs up to four bytes per character.
    max_message_len.saturating_mul(4).saturating_add(FRAME_OVERHEAD)
}

/// Reasons the identification frame is refused.
#[derive(Debug, Error)]
enum IdentError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("first frame must be an identification")]
    NotIdentification,
    #[error("email address must be verified")]
    Unverified,
    #[error("{0}")]
    Service(#[from] ServiceError),
}

/// Identity of a socket once the identification frame was accepted.
struct ChatPeer {
    uid: Uuid,
    session_id: String,
    access_key: String,
}

/// Handle the full lifecycle of a chat WebSocket bound to `session_id`.
pub async fn handle_socket(state: SharedState, session_id: String, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound messages flowing even while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let initial_message = match tokio::time::timeout(IDENT_TIMEOUT, receiver.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => text,
        Ok(Some(Ok(Message::Close(_)))) => {
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(Some(Ok(_))) => {
            let _ = outbound_tx.send(Message::Close(None));
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(Some(Err(err))) => {
            warn!(error = %err, "websocket receive error");
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(None) | Err(_) => {
            warn!(session = %session_id, "websocket identification timed out");
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    let peer = match identify(&state, &session_id, initial_message.as_str()).await {
        Ok(peer) => peer,
        Err(err) => {
            warn!(session = %session_id, error = %err, "chat socket identification refused");
            send_frame(
                &outbound_tx,
                &ChatOutboundMessage::Error {
                    message: err.to_string(),
                },
            );
            let _ = outbound_tx.send(close(close_code::POLICY, "identification refused"));
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    let events = state.session_events().subscribe(peer.session_id.clone());
    let _presence = state.presence().connect(peer.uid);
    info!(session = %peer.session_id, uid = %peer.uid, "chat socket connected");
    send_frame(
        &outbound_tx,
        &ChatOutboundMessage::Ready {
            session_id: peer.session_id.clone(),
        },
    );

    let forward_task = tokio::spawn(forward_session_events(
        events,
        peer.session_id.clone(),
        peer.uid,
        outbound_tx.clone(),
    ));

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                handle_text(&state, &peer, text.as_str(), &outbound_tx).await;
            }
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) | Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(uid = %peer.uid, error = %err, "websocket error");
                break;
            }
        }
        if forward_task.is_finished() {
            break;
        }
    }

    forward_task.abort();
    info!(session = %peer.session_id, uid = %peer.uid, "chat socket disconnected");
    finalize(writer_task, outbound_tx).await;
}

/// Act on one text frame from an identified peer. Failures are reported back
/// as `error` frames; the socket stays open.
async fn handle_text(
    state: &SharedState,
    peer: &ChatPeer,
    text: &str,
    outbound_tx: &mpsc::UnboundedSender<Message>,
) {
    let error = match serde_json::from_str::<ChatInboundMessage>(text) {
        Ok(ChatInboundMessage::Message { text }) => {
            // The stored message comes back through the session hub.
            chat_service::send_message(state, peer.uid, &peer.session_id, &peer.access_key, &text)
                .await
                .err()
                .map(|err| err.to_string())
        }
        Ok(ChatInboundMessage::Identification { .. }) => {
            warn!(uid = %peer.uid, "ignoring duplicate identification message");
            None
        }
        Ok(ChatInboundMessage::Unknown) => Some("unsupported frame type".to_owned()),
        Err(err) => {
            warn!(uid = %peer.uid, error = %err, "failed to parse chat frame");
            Some(format!("malformed frame: {err}"))
        }
    };
    if let Some(message) = error {
        send_frame(outbound_tx, &ChatOutboundMessage::Error { message });
    }
}

async fn identify(state: &SharedState, session_id: &str, frame: &str) -> Result<ChatPeer, IdentError> {
    let ChatInboundMessage::Identification { token, access_key } = serde_json::from_str(frame)?
    else {
        return Err(IdentError::NotIdentification);
    };
    let auth = auth_service::authenticate(state, &token)?;
    if !auth.email_verified {
        return Err(IdentError::Unverified);
    }
    let session = chat_service::authorize(state, auth.uid, session_id, &access_key).await?;
    Ok(ChatPeer {
        uid: auth.uid,
        session_id: session.id,
        access_key,
    })
}

/// Relay session events relevant to chat clients until the session ends, the
/// peer is removed or the socket goes away.
async fn forward_session_events(
    mut events: broadcast::Receiver<ServerEvent>,
    session_id: String,
    uid: Uuid,
    outbound_tx: mpsc::UnboundedSender<Message>,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!(%uid, skipped, "chat socket lagging behind, messages skipped");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        match event.event.as_deref() {
            Some(EVENT_MESSAGE_CREATED) => match serde_json::from_str::<MessageView>(&event.data) {
                Ok(message) => {
                    if !send_frame(&outbound_tx, &ChatOutboundMessage::Message { message }) {
                        break;
                    }
                }
                Err(err) => warn!(error = %err, "dropping undecodable message event"),
            },
            Some(EVENT_SESSION_ENDED) => break,
            Some(EVENT_PARTICIPANT_REMOVED) if removes(&event.data, uid) => break,
            _ => {}
        }
    }

    // Whatever stopped the relay, the chat is over for this peer.
    send_frame(&outbound_tx, &ChatOutboundMessage::Ended { session_id });
    let _ = outbound_tx.send(close(close_code::NORMAL, "session over"));
}

fn removes(data: &str, uid: Uuid) -> bool {
    serde_json::from_str::<serde_json::Value>(data)
        .ok()
        .and_then(|value| value.get("uid")?.as_str()?.parse::<Uuid>().ok())
        == Some(uid)
}

fn close(code: u16, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }))
}

/// Serialize a frame and queue it on the writer. Returns `false` once the
/// writer is gone.
fn send_frame(tx: &mpsc::UnboundedSender<Message>, frame: &ChatOutboundMessage) -> bool {
    let payload = match serde_json::to_string(frame) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, "failed to serialize chat frame");
            return true;
        }
    };
    tx.send(Message::Text(payload.into())).is_ok()
}

async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{config::AppConfig, services::mailer::OutboxMailer, state::AppState};

    #[test]
    fn removal_events_target_one_peer() {
        let uid = Uuid::new_v4();
        let data = serde_json::json!({ "session_id": "ABC123", "uid": uid }).to_string();
        assert!(removes(&data, uid));
        assert!(!removes(&data, Uuid::new_v4()));
        assert!(!removes("not json", uid));
    }

    fn next_error(rx: &mut mpsc::UnboundedReceiver<Message>) -> Option<String> {
        let Ok(Message::Text(text)) = rx.try_recv() else {
            return None;
        };
        let frame: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(frame["type"], "error");
        Some(frame["message"].as_str().unwrap().to_owned())
    }

    #[tokio::test]
    async fn bad_frames_are_answered_without_closing() {
        let state = AppState::new(AppConfig::default(), Arc::new(OutboxMailer::new()));
        let peer = ChatPeer {
            uid: Uuid::new_v4(),
            session_id: "ABC123".into(),
            access_key: "0".repeat(32),
        };
        let (tx, mut rx) = mpsc::unbounded_channel();

        handle_text(&state, &peer, r#"{"type":"typing"}"#, &tx).await;
        assert_eq!(next_error(&mut rx).as_deref(), Some("unsupported frame type"));

        handle_text(&state, &peer, "{not json", &tx).await;
        assert!(next_error(&mut rx).unwrap().starts_with("malformed frame"));

        let again = r#"{"type":"identification","token":"t","access_key":"k"}"#;
        handle_text(&state, &peer, again, &tx).await;
        assert!(next_error(&mut rx).is_none());

        // No store is installed, so sending reports degraded mode.
        handle_text(&state, &peer, r#"{"type":"message","text":"hi"}"#, &tx).await;
        assert!(next_error(&mut rx).is_some());
    }

    #[test]
    fn frame_limit_covers_multibyte_text() {
        assert_eq!(frame_limit(10), 10 * 4 + FRAME_OVERHEAD);
        assert_eq!(frame_limit(usize::MAX), usize::MAX);
    }
}
