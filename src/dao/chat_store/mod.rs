/// CouchDB backend over its HTTP API.
#[cfg(feature = "couch-store")]
pub mod couchdb;
/// Process-local backend.
pub mod memory;
/// MongoDB backend.
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use std::time::SystemTime;

use crate::dao::models::{MessageEntity, SessionEntity, UserEntity};
use crate::dao::storage::StorageResult;
use futures::future::BoxFuture;
use uuid::Uuid;

/// Abstraction over the persistence layer for accounts, sessions and messages.
///
/// Update methods are compare-and-swap: the entity passed in already carries its
/// next revision and the write only applies while the stored document still has
/// `expected_revision`. They resolve to `false` when the document moved on (or
/// disappeared) in the meantime.
pub trait ChatStore: Send + Sync {
    /// Insert a new account. Resolves to `false` when the email is already taken.
    fn insert_user(&self, user: UserEntity) -> BoxFuture<'static, StorageResult<bool>>;
    /// Load an account by id.
    fn find_user(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<UserEntity>>>;
    /// Load an account by normalised email.
    fn find_user_by_email(
        &self,
        email: String,
    ) -> BoxFuture<'static, StorageResult<Option<UserEntity>>>;
    /// Find the account advertising `code`.
    fn find_user_by_partner_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<UserEntity>>>;
    /// Find an account whose relationship points at `partner_uid`.
    fn find_user_by_partner(
        &self,
        partner_uid: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<UserEntity>>>;
    /// Load every existing account among `ids`.
    fn find_users(&self, ids: Vec<Uuid>) -> BoxFuture<'static, StorageResult<Vec<UserEntity>>>;
    /// Also resolves to `false` when the new `partner_code` is held by another account.
    fn update_user(
        &self,
        user: UserEntity,
        expected_revision: u64,
    ) -> BoxFuture<'static, StorageResult<bool>>;

    /// Insert a new session. Resolves to `false` when the session code is taken.
    fn insert_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<bool>>;
    /// Load a session by code.
    fn find_session(&self, id: String) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;
    /// Compare-and-swap a session document.
    fn update_session(
        &self,
        session: SessionEntity,
        expected_revision: u64,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    /// Delete a session, then its messages.
    fn delete_session(&self, id: String) -> BoxFuture<'static, StorageResult<bool>>;

    /// Store a new message.
    fn append_message(&self, message: MessageEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Remove a single message. Missing messages are not an error.
    fn delete_message(&self, message: MessageEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Messages of a session strictly newer than `since`, oldest first.
    fn list_messages(
        &self,
        session_id: String,
        since: Option<SystemTime>,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<MessageEntity>>>;

    /// Cheap round trip proving the backend answers.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Re-establish the connection after a failed health check.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}

/// Order messages by server timestamp, breaking ties on the identifier.
pub(crate) fn sort_messages(messages: &mut [MessageEntity]) {
    messages.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}
