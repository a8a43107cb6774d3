use std::time::{Duration, Instant};

use dashmap::DashMap;
use uuid::Uuid;

use crate::services::credentials::{digest_hex, random_token};

/// Identity attached to a live bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthSession {
    /// Account the token was issued to.
    pub uid: Uuid,
    /// Verification state, kept current by [`TokenRegistry::mark_verified`].
    pub email_verified: bool,
}

struct TokenRecord {
    session: AuthSession,
    expires_at: Instant,
}

/// In-memory registry of issued bearer tokens, keyed by their SHA-256 digest.
pub struct TokenRegistry {
    tokens: DashMap<String, TokenRecord>,
    ttl: Duration,
}

impl TokenRegistry {
    /// Registry issuing tokens valid for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            tokens: DashMap::new(),
            ttl,
        }
    }

    /// Issue a fresh token for `uid`. The raw value is only ever returned here.
    pub fn issue(&self, uid: Uuid, email_verified: bool) -> String {
        self.sweep_expired();
        let token = random_token();
        self.tokens.insert(
            digest_hex(&token),
            TokenRecord {
                session: AuthSession {
                    uid,
                    email_verified,
                },
                expires_at: Instant::now() + self.ttl,
            },
        );
        token
    }

    /// Look up a token, evicting it when expired.
    pub fn resolve(&self, token: &str) -> Option<AuthSession> {
        let key = digest_hex(token);
        let session = {
            let record = self.tokens.get(&key)?;
            (record.expires_at > Instant::now()).then_some(record.session)
        };
        if session.is_none() {
            self.tokens.remove(&key);
        }
        session
    }

    /// Drop every expired record, including tokens nobody presents again.
    pub fn sweep_expired(&self) {
        let now = Instant::now();
        self.tokens.retain(|_, record| record.expires_at > now);
    }

    /// Number of records currently held.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether no record is held.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Forget one token. Resolves to `false` when it was unknown.
    pub fn revoke(&self, token: &str) -> bool {
        self.tokens.remove(&digest_hex(token)).is_some()
    }

    /// Revoke every token belonging to `uid`.
    pub fn revoke_all(&self, uid: Uuid) {
        self.tokens.retain(|_, record| record.session.uid != uid);
    }

    /// Reflect a confirmed email on tokens issued before verification.
    pub fn mark_verified(&self, uid: Uuid) {
        for mut record in self.tokens.iter_mut() {
            if record.session.uid == uid {
                record.session.email_verified = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_tokens_resolve_until_revoked() {
        let registry = TokenRegistry::new(Duration::from_secs(60));
        let uid = Uuid::new_v4();
        let token = registry.issue(uid, false);
        assert_eq!(
            registry.resolve(&token),
            Some(AuthSession {
                uid,
                email_verified: false
            })
        );

        registry.mark_verified(uid);
        assert!(registry.resolve(&token).unwrap().email_verified);

        assert!(registry.revoke(&token));
        assert!(registry.resolve(&token).is_none());
    }

    #[test]
    fn expired_tokens_are_evicted() {
        let registry = TokenRegistry::new(Duration::ZERO);
        let token = registry.issue(Uuid::new_v4(), true);
        assert!(registry.resolve(&token).is_none());
        assert!(!registry.revoke(&token));
    }

    #[test]
    fn abandoned_tokens_are_swept_on_issue() {
        let registry = TokenRegistry::new(Duration::ZERO);
        for _ in 0..100 {
            registry.issue(Uuid::new_v4(), true);
        }
        registry.issue(Uuid::new_v4(), true);
        assert_eq!(registry.len(), 1);

        registry.sweep_expired();
        assert!(registry.is_empty());
    }

    #[test]
    fn revoke_all_only_touches_one_user() {
        let registry = TokenRegistry::new(Duration::from_secs(60));
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let first = registry.issue(alice, true);
        let second = registry.issue(alice, true);
        let other = registry.issue(bob, true);

        registry.revoke_all(alice);
        assert!(registry.resolve(&first).is_none());
        assert!(registry.resolve(&second).is_none());
        assert!(registry.resolve(&other).is_some());
    }
}
