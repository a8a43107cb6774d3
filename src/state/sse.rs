use std::hash::Hash;

use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::dto::sse::ServerEvent;

/// Per-user and per-session SSE fan-out carved out from [`AppState`](super::AppState).
pub struct SseState {
    users: HubMap<Uuid>,
    sessions: HubMap<String>,
}

impl SseState {
    /// Build the SSE sub-tree with the channel capacity used by every hub.
    pub fn new(capacity: usize) -> Self {
        Self {
            users: HubMap::new(capacity),
            sessions: HubMap::new(capacity),
        }
    }

    /// Hubs feeding `/me/events`, one per user.
    pub fn users(&self) -> &HubMap<Uuid> {
        &self.users
    }

    /// Hubs feeding `/sessions/{id}/events`, one per session.
    pub fn sessions(&self) -> &HubMap<String> {
        &self.sessions
    }
}

/// Lazily created hubs keyed by stream owner.
pub struct HubMap<K> {
    hubs: DashMap<K, SseHub>,
    capacity: usize,
}

impl<K> HubMap<K>
where
    K: Eq + Hash + Clone,
{
    fn new(capacity: usize) -> Self {
        Self {
            hubs: DashMap::new(),
            capacity,
        }
    }

    /// Subscribe to the hub for `key`, creating it on first use.
    pub fn subscribe(&self, key: K) -> broadcast::Receiver<ServerEvent> {
        self.hubs
            .entry(key)
            .or_insert_with(|| SseHub::new(self.capacity))
            .subscribe()
    }

    /// Deliver an event to the current subscribers of `key`, dropping the hub
    /// once nobody listens anymore.
    pub fn broadcast(&self, key: &K, event: ServerEvent) {
        let Some(hub) = self.hubs.get(key).map(|hub| hub.clone()) else {
            return;
        };
        hub.broadcast(event);
        self.hubs.remove_if(key, |_, hub| hub.receiver_count() == 0);
    }

    /// Drop the hub for `key`; subscribers see the stream close.
    pub fn close(&self, key: &K) {
        self.hubs.remove(key);
    }
}

/// Simple broadcast hub wrapper used by the SSE services.
#[derive(Clone)]
pub struct SseHub {
    sender: broadcast::Sender<ServerEvent>,
}

impl SseHub {
    /// Construct a new hub backed by a Tokio broadcast channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Register a new subscriber that will receive subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }

    /// Send an event to all current subscribers, ignoring delivery errors.
    pub fn broadcast(&self, event: ServerEvent) {
        let _ = self.sender.send(event);
    }

    fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(name: &str) -> ServerEvent {
        ServerEvent {
            event: Some(name.to_owned()),
            data: "{}".to_owned(),
        }
    }

    #[tokio::test]
    async fn events_reach_only_their_key() {
        let state = SseState::new(8);
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let mut alice_rx = state.users().subscribe(alice);
        let mut bob_rx = state.users().subscribe(bob);

        state.users().broadcast(&alice, event("partner.paired"));

        assert_eq!(
            alice_rx.recv().await.unwrap().event.as_deref(),
            Some("partner.paired")
        );
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closing_a_hub_ends_the_stream() {
        let state = SseState::new(8);
        let mut rx = state.sessions().subscribe("ABC123".to_owned());
        state.sessions().close(&"ABC123".to_owned());
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }

    #[test]
    fn idle_hubs_are_dropped_after_broadcast() {
        let state = SseState::new(8);
        let uid = Uuid::new_v4();
        drop(state.users().subscribe(uid));
        state.users().broadcast(&uid, event("partner.unpaired"));
        assert!(state.users().hubs.get(&uid).is_none());
    }
}
