//! Process-local [`ChatStore`] backed by concurrent maps. Used for local runs and tests.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::SystemTime,
};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::BoxFuture;
use thiserror::Error;
use uuid::Uuid;

use super::{ChatStore, sort_messages};
use crate::dao::{
    models::{MessageEntity, SessionEntity, UserEntity},
    storage::{StorageError, StorageResult},
};

#[derive(Debug, Error)]
enum MemoryStoreError {
    #[error("in-memory store switched offline")]
    Offline,
}

/// In-memory [`ChatStore`] implementation.
#[derive(Clone, Default)]
pub struct MemoryChatStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    users: DashMap<Uuid, UserEntity>,
    emails: DashMap<String, Uuid>,
    codes: DashMap<String, Uuid>,
    sessions: DashMap<String, SessionEntity>,
    messages: DashMap<String, Vec<MessageEntity>>,
    offline: AtomicBool,
}

impl MemoryChatStore {
    /// Empty, online store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every operation fails until switched back online.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> StorageResult<()> {
        if self.inner.offline.load(Ordering::SeqCst) {
            Err(StorageError::unavailable(
                "memory store offline".into(),
                MemoryStoreError::Offline,
            ))
        } else {
            Ok(())
        }
    }

    fn find_user_where(&self, predicate: impl Fn(&UserEntity) -> bool) -> Option<UserEntity> {
        self.inner
            .users
            .iter()
            .find(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
    }

    fn insert_user_sync(&self, user: UserEntity) -> StorageResult<bool> {
        self.ensure_online()?;
        match self.inner.emails.entry(user.email.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(user.id);
                if let Some(code) = &user.partner_code {
                    self.inner.codes.entry(code.clone()).or_insert(user.id);
                }
                self.inner.users.insert(user.id, user);
                Ok(true)
            }
        }
    }

    fn update_user_sync(&self, user: UserEntity, expected_revision: u64) -> StorageResult<bool> {
        self.ensure_online()?;
        let Some(mut stored) = self.inner.users.get_mut(&user.id) else {
            return Ok(false);
        };
        if stored.revision != expected_revision {
            return Ok(false);
        }
        if stored.partner_code != user.partner_code {
            if let Some(code) = &user.partner_code {
                match self.inner.codes.entry(code.clone()) {
                    Entry::Occupied(holder) if *holder.get() != user.id => return Ok(false),
                    Entry::Occupied(_) => {}
                    Entry::Vacant(slot) => {
                        slot.insert(user.id);
                    }
                }
            }
            if let Some(old) = &stored.partner_code {
                self.inner.codes.remove_if(old, |_, holder| *holder == user.id);
            }
        }
        *stored = user;
        Ok(true)
    }

    fn insert_session_sync(&self, session: SessionEntity) -> StorageResult<bool> {
        self.ensure_online()?;
        match self.inner.sessions.entry(session.id.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(session);
                Ok(true)
            }
        }
    }

    fn update_session_sync(
        &self,
        session: SessionEntity,
        expected_revision: u64,
    ) -> StorageResult<bool> {
        self.ensure_online()?;
        let Some(mut stored) = self.inner.sessions.get_mut(&session.id) else {
            return Ok(false);
        };
        if stored.revision != expected_revision {
            return Ok(false);
        }
        *stored = session;
        Ok(true)
    }

    fn delete_session_sync(&self, id: &str) -> StorageResult<bool> {
        self.ensure_online()?;
        let deleted = self.inner.sessions.remove(id).is_some();
        self.inner.messages.remove(id);
        Ok(deleted)
    }

    fn list_messages_sync(
        &self,
        session_id: &str,
        since: Option<SystemTime>,
        limit: usize,
    ) -> StorageResult<Vec<MessageEntity>> {
        self.ensure_online()?;
        let mut messages = self
            .inner
            .messages
            .get(session_id)
            .map(|entry| {
                entry
                    .iter()
                    .filter(|message| since.is_none_or(|since| message.created_at > since))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        sort_messages(&mut messages);
        messages.truncate(limit);
        Ok(messages)
    }
}

impl ChatStore for MemoryChatStore {
    fn insert_user(&self, user: UserEntity) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.insert_user_sync(user) })
    }

    fn find_user(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<UserEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.ensure_online()?;
            Ok(store.inner.users.get(&id).map(|entry| entry.value().clone()))
        })
    }

    fn find_user_by_email(
        &self,
        email: String,
    ) -> BoxFuture<'static, StorageResult<Option<UserEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.ensure_online()?;
            let Some(id) = store.inner.emails.get(&email).map(|entry| *entry.value()) else {
                return Ok(None);
            };
            Ok(store.inner.users.get(&id).map(|entry| entry.value().clone()))
        })
    }

    fn find_user_by_partner_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<UserEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.ensure_online()?;
            let holder = store.inner.codes.get(&code).map(|entry| *entry.value());
            Ok(holder.and_then(|uid| store.inner.users.get(&uid).map(|entry| entry.value().clone())))
        })
    }

    fn find_user_by_partner(
        &self,
        partner_uid: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<UserEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.ensure_online()?;
            Ok(store.find_user_where(|user| user.partner_uid() == Some(partner_uid)))
        })
    }

    fn find_users(&self, ids: Vec<Uuid>) -> BoxFuture<'static, StorageResult<Vec<UserEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.ensure_online()?;
            Ok(ids
                .iter()
                .filter_map(|id| store.inner.users.get(id).map(|entry| entry.value().clone()))
                .collect())
        })
    }

    fn update_user(
        &self,
        user: UserEntity,
        expected_revision: u64,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.update_user_sync(user, expected_revision) })
    }

    fn insert_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.insert_session_sync(session) })
    }

    fn find_session(&self, id: String) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.ensure_online()?;
            Ok(store.inner.sessions.get(&id).map(|entry| entry.value().clone()))
        })
    }

    fn update_session(
        &self,
        session: SessionEntity,
        expected_revision: u64,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.update_session_sync(session, expected_revision) })
    }

    fn delete_session(&self, id: String) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.delete_session_sync(&id) })
    }

    fn append_message(&self, message: MessageEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.ensure_online()?;
            store
                .inner
                .messages
                .entry(message.session_id.clone())
                .or_default()
                .push(message);
            Ok(())
        })
    }

    fn delete_message(&self, message: MessageEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.ensure_online()?;
            if let Some(mut messages) = store.inner.messages.get_mut(&message.session_id) {
                messages.retain(|stored| stored.id != message.id);
            }
            Ok(())
        })
    }

    fn list_messages(
        &self,
        session_id: String,
        since: Option<SystemTime>,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<MessageEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_messages_sync(&session_id, since, limit) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_online() })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_online() })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::dao::models::{RelationshipEntity, SessionPhaseEntity};

    fn user(email: &str) -> UserEntity {
        let now = SystemTime::now();
        UserEntity {
            id: Uuid::new_v4(),
            email: email.into(),
            password_hash: "hash".into(),
            name: "Ada".into(),
            phone: None,
            sex: "f".into(),
            profile_image: None,
            email_verified: true,
            relationship: RelationshipEntity::Single,
            partner_code: None,
            verification: None,
            password_reset: None,
            created_at: now,
            updated_at: now,
            revision: 0,
        }
    }

    fn session(id: &str) -> SessionEntity {
        let now = SystemTime::now();
        let owner = Uuid::new_v4();
        SessionEntity {
            id: id.into(),
            created_by: owner,
            admin_uid: owner,
            participants: Vec::new(),
            phase: SessionPhaseEntity::Lobby,
            access_key_digest: "digest".into(),
            created_at: now,
            updated_at: now,
            revision: 0,
        }
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let store = MemoryChatStore::new();
        assert!(store.insert_user(user("a@example.com")).await.unwrap());
        assert!(!store.insert_user(user("a@example.com")).await.unwrap());
    }

    #[tokio::test]
    async fn stale_user_update_is_refused() {
        let store = MemoryChatStore::new();
        let mut account = user("b@example.com");
        store.insert_user(account.clone()).await.unwrap();

        let expected = account.bump();
        account.name = "Grace".into();
        assert!(store.update_user(account.clone(), expected).await.unwrap());

        let mut stale = account.clone();
        stale.revision = 1;
        stale.name = "Lost".into();
        assert!(!store.update_user(stale, 0).await.unwrap());

        let stored = store.find_user(account.id).await.unwrap().unwrap();
        assert_eq!(stored.name, "Grace");
        assert_eq!(stored.revision, 1);
    }

    #[tokio::test]
    async fn partner_lookups_follow_documents() {
        let store = MemoryChatStore::new();
        let mut holder = user("c@example.com");
        holder.partner_code = Some("AB12".into());
        let partner = Uuid::new_v4();
        let mut paired = user("d@example.com");
        paired.relationship = RelationshipEntity::InRelationship {
            partner_uid: partner,
            partner_name: "Eve".into(),
        };
        store.insert_user(holder.clone()).await.unwrap();
        store.insert_user(paired.clone()).await.unwrap();

        let found = store.find_user_by_partner_code("AB12".into()).await.unwrap();
        assert_eq!(found.map(|u| u.id), Some(holder.id));
        let found = store.find_user_by_partner(partner).await.unwrap();
        assert_eq!(found.map(|u| u.id), Some(paired.id));
        assert!(
            store
                .find_user_by_partner_code("ZZZZ".into())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn partner_codes_are_held_by_one_account() {
        let store = MemoryChatStore::new();
        let mut first = user("f@example.com");
        let mut second = user("g@example.com");
        store.insert_user(first.clone()).await.unwrap();
        store.insert_user(second.clone()).await.unwrap();

        first.partner_code = Some("QX7K".into());
        let expected = first.bump();
        assert!(store.update_user(first.clone(), expected).await.unwrap());

        second.partner_code = Some("QX7K".into());
        let expected = second.bump();
        assert!(!store.update_user(second.clone(), expected).await.unwrap());

        // Once released the code can be taken.
        first.partner_code = None;
        let expected = first.bump();
        assert!(store.update_user(first, expected).await.unwrap());
        // The refused write left the stored revision untouched.
        assert!(store.update_user(second.clone(), 0).await.unwrap());
        let holder = store.find_user_by_partner_code("QX7K".into()).await.unwrap();
        assert_eq!(holder.map(|u| u.id), Some(second.id));
    }

    #[tokio::test]
    async fn messages_are_ordered_filtered_and_cascade_deleted() {
        let store = MemoryChatStore::new();
        store.insert_session(session("ABC123")).await.unwrap();
        let base = SystemTime::now();
        for offset in [3u64, 1, 2] {
            store
                .append_message(MessageEntity {
                    id: Uuid::new_v4(),
                    session_id: "ABC123".into(),
                    sender_uid: Uuid::new_v4(),
                    sender_name: "Ada".into(),
                    text: format!("m{offset}"),
                    created_at: base + Duration::from_millis(offset),
                })
                .await
                .unwrap();
        }

        let all = store
            .list_messages("ABC123".into(), None, 10)
            .await
            .unwrap();
        let texts: Vec<_> = all.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["m1", "m2", "m3"]);

        let newer = store
            .list_messages("ABC123".into(), Some(base + Duration::from_millis(1)), 10)
            .await
            .unwrap();
        assert_eq!(newer.len(), 2);

        assert!(store.delete_session("ABC123".into()).await.unwrap());
        assert!(
            store
                .list_messages("ABC123".into(), None, 10)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn offline_store_fails_operations() {
        let store = MemoryChatStore::new();
        store.set_offline(true);
        assert!(store.health_check().await.is_err());
        assert!(store.find_session("ABC123".into()).await.is_err());
        store.set_offline(false);
        assert!(store.health_check().await.is_ok());
    }
}
