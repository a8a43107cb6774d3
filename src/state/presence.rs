use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

/// Live real-time connection counts per user.
#[derive(Clone, Default)]
pub struct Presence {
    counts: Arc<DashMap<Uuid, usize>>,
}

impl Presence {
    /// Nobody online.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection; the user stays online while the guard lives.
    pub fn connect(&self, uid: Uuid) -> PresenceGuard {
        *self.counts.entry(uid).or_default() += 1;
        PresenceGuard {
            counts: self.counts.clone(),
            uid,
        }
    }

    /// Whether `uid` has at least one live connection.
    pub fn is_online(&self, uid: Uuid) -> bool {
        self.counts.contains_key(&uid)
    }

    /// Every user with a live connection, in no particular order.
    pub fn online(&self) -> Vec<Uuid> {
        self.counts.iter().map(|entry| *entry.key()).collect()
    }
}

/// Decrements the connection count of a user on drop.
pub struct PresenceGuard {
    counts: Arc<DashMap<Uuid, usize>>,
    uid: Uuid,
}

impl Drop for PresenceGuard {
    fn drop(&mut self) {
        if let Some(mut count) = self.counts.get_mut(&self.uid) {
            *count = count.saturating_sub(1);
        }
        self.counts.remove_if(&self.uid, |_, count| *count == 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_is_online_while_any_connection_lives() {
        let presence = Presence::new();
        let uid = Uuid::new_v4();
        let first = presence.connect(uid);
        let second = presence.connect(uid);
        assert!(presence.is_online(uid));

        drop(first);
        assert!(presence.is_online(uid));
        assert_eq!(presence.online(), vec![uid]);

        drop(second);
        assert!(!presence.is_online(uid));
        assert!(presence.online().is_empty());
    }
}
