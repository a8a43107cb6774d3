use std::{sync::Arc, time::SystemTime};

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, Collection, Database, IndexModel,
    bson::{DateTime, Document, doc},
    options::IndexOptions,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    config::MongoConfig,
    connection::open_database,
    error::{MongoDaoError, MongoResult, is_duplicate_key},
    models::{
        MongoMessageDocument, MongoSessionDocument, MongoUserDocument, doc_id, revision_filter,
    },
};
use crate::dao::{
    chat_store::ChatStore,
    models::{MessageEntity, SessionEntity, UserEntity},
    storage::StorageResult,
};

const USER_COLLECTION_NAME: &str = "users";
const SESSION_COLLECTION_NAME: &str = "sessions";
const MESSAGE_COLLECTION_NAME: &str = "messages";

/// MongoDB-backed [`ChatStore`].
#[derive(Clone)]
pub struct MongoChatStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            open_database(&self.config).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoChatStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            open_database(&config).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let database = self.database().await;

        let users = database.collection::<Document>(USER_COLLECTION_NAME);
        // Only accounts advertising a code take part in its uniqueness.
        let user_indexes = [
            ("email", doc! {"email": 1}, true, None),
            (
                "partner_code",
                doc! {"partner_code": 1},
                true,
                Some(doc! {"partner_code": {"$type": "string"}}),
            ),
            ("partner_uid", doc! {"partner_uid": 1}, false, None),
        ];
        for (index, keys, unique, partial) in user_indexes {
            let model = IndexModel::builder()
                .keys(keys)
                .options(
                    IndexOptions::builder()
                        .name(Some(format!("user_{index}_idx")))
                        .unique(Some(unique))
                        .partial_filter_expression(partial)
                        .build(),
                )
                .build();
            users
                .create_index(model)
                .await
                .map_err(|source| MongoDaoError::EnsureIndex {
                    collection: USER_COLLECTION_NAME,
                    index,
                    source,
                })?;
        }

        let messages = database.collection::<Document>(MESSAGE_COLLECTION_NAME);
        let model = IndexModel::builder()
            .keys(doc! {"session_id": 1, "created_at": 1, "_id": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("message_session_idx".to_owned()))
                    .build(),
            )
            .build();
        messages
            .create_index(model)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: MESSAGE_COLLECTION_NAME,
                index: "session_id,created_at",
                source,
            })?;

        Ok(())
    }

    async fn database(&self) -> Database {
        let guard = self.inner.state.read().await;
        guard.database.clone()
    }

    async fn users(&self) -> Collection<MongoUserDocument> {
        self.database()
            .await
            .collection::<MongoUserDocument>(USER_COLLECTION_NAME)
    }

    async fn sessions(&self) -> Collection<MongoSessionDocument> {
        self.database()
            .await
            .collection::<MongoSessionDocument>(SESSION_COLLECTION_NAME)
    }

    async fn messages(&self) -> Collection<MongoMessageDocument> {
        self.database()
            .await
            .collection::<MongoMessageDocument>(MESSAGE_COLLECTION_NAME)
    }

    async fn insert_user(&self, user: UserEntity) -> MongoResult<bool> {
        let id = user.id.to_string();
        let document: MongoUserDocument = user.into();
        match self.users().await.insert_one(&document).await {
            Ok(_) => Ok(true),
            Err(err) if is_duplicate_key(&err) => Ok(false),
            Err(source) => Err(MongoDaoError::Write {
                collection: USER_COLLECTION_NAME,
                id,
                source,
            }),
        }
    }

    async fn find_user_where(&self, filter: Document) -> MongoResult<Option<UserEntity>> {
        let document = self
            .users()
            .await
            .find_one(filter)
            .await
            .map_err(|source| MongoDaoError::Load {
                collection: USER_COLLECTION_NAME,
                source,
            })?;
        document.map(TryInto::try_into).transpose()
    }

    async fn find_users(&self, ids: Vec<Uuid>) -> MongoResult<Vec<UserEntity>> {
        let ids: Vec<String> = ids.iter().map(Uuid::to_string).collect();
        let documents: Vec<MongoUserDocument> = self
            .users()
            .await
            .find(doc! {"_id": {"$in": ids}})
            .await
            .map_err(|source| MongoDaoError::Load {
                collection: USER_COLLECTION_NAME,
                source,
            })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::Load {
                collection: USER_COLLECTION_NAME,
                source,
            })?;
        documents.into_iter().map(TryInto::try_into).collect()
    }

    async fn update_user(&self, user: UserEntity, expected_revision: u64) -> MongoResult<bool> {
        let id = user.id.to_string();
        let document: MongoUserDocument = user.into();
        match self
            .users()
            .await
            .replace_one(revision_filter(&id, expected_revision), &document)
            .await
        {
            Ok(result) => Ok(result.matched_count == 1),
            // Another account already advertises the new pairing code.
            Err(err) if is_duplicate_key(&err) => Ok(false),
            Err(source) => Err(MongoDaoError::Write {
                collection: USER_COLLECTION_NAME,
                id,
                source,
            }),
        }
    }

    async fn insert_session(&self, session: SessionEntity) -> MongoResult<bool> {
        let id = session.id.clone();
        let document: MongoSessionDocument = session.into();
        match self.sessions().await.insert_one(&document).await {
            Ok(_) => Ok(true),
            Err(err) if is_duplicate_key(&err) => Ok(false),
            Err(source) => Err(MongoDaoError::Write {
                collection: SESSION_COLLECTION_NAME,
                id,
                source,
            }),
        }
    }

    async fn find_session(&self, id: String) -> MongoResult<Option<SessionEntity>> {
        let document = self
            .sessions()
            .await
            .find_one(doc_id(&id))
            .await
            .map_err(|source| MongoDaoError::Load {
                collection: SESSION_COLLECTION_NAME,
                source,
            })?;
        document.map(TryInto::try_into).transpose()
    }

    async fn update_session(
        &self,
        session: SessionEntity,
        expected_revision: u64,
    ) -> MongoResult<bool> {
        let id = session.id.clone();
        let document: MongoSessionDocument = session.into();
        let result = self
            .sessions()
            .await
            .replace_one(revision_filter(&id, expected_revision), &document)
            .await
            .map_err(|source| MongoDaoError::Write {
                collection: SESSION_COLLECTION_NAME,
                id,
                source,
            })?;
        Ok(result.matched_count == 1)
    }

    async fn delete_session(&self, id: String) -> MongoResult<bool> {
        // Session first: a message appended after this point sees no session.
        let result = self
            .sessions()
            .await
            .delete_one(doc_id(&id))
            .await
            .map_err(|source| MongoDaoError::Delete {
                collection: SESSION_COLLECTION_NAME,
                id: id.clone(),
                source,
            })?;
        self.messages()
            .await
            .delete_many(doc! {"session_id": &id})
            .await
            .map_err(|source| MongoDaoError::Delete {
                collection: MESSAGE_COLLECTION_NAME,
                id,
                source,
            })?;
        Ok(result.deleted_count > 0)
    }

    async fn delete_message(&self, message: MessageEntity) -> MongoResult<()> {
        let id = message.id.to_string();
        self.messages()
            .await
            .delete_one(doc_id(&id))
            .await
            .map_err(|source| MongoDaoError::Delete {
                collection: MESSAGE_COLLECTION_NAME,
                id,
                source,
            })?;
        Ok(())
    }

    async fn append_message(&self, message: MessageEntity) -> MongoResult<()> {
        let id = message.id.to_string();
        let document: MongoMessageDocument = message.into();
        self.messages()
            .await
            .insert_one(&document)
            .await
            .map_err(|source| MongoDaoError::Write {
                collection: MESSAGE_COLLECTION_NAME,
                id,
                source,
            })?;
        Ok(())
    }

    async fn list_messages(
        &self,
        session_id: String,
        since: Option<SystemTime>,
        limit: usize,
    ) -> MongoResult<Vec<MessageEntity>> {
        let mut filter = doc! {"session_id": &session_id};
        if let Some(since) = since {
            filter.insert("created_at", doc! {"$gt": DateTime::from_system_time(since)});
        }
        let documents: Vec<MongoMessageDocument> = self
            .messages()
            .await
            .find(filter)
            .sort(doc! {"created_at": 1, "_id": 1})
            .limit(i64::try_from(limit).unwrap_or(i64::MAX))
            .await
            .map_err(|source| MongoDaoError::Load {
                collection: MESSAGE_COLLECTION_NAME,
                source,
            })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::Load {
                collection: MESSAGE_COLLECTION_NAME,
                source,
            })?;
        documents.into_iter().map(TryInto::try_into).collect()
    }
}

impl ChatStore for MongoChatStore {
    fn insert_user(&self, user: UserEntity) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.insert_user(user).await.map_err(Into::into) })
    }

    fn find_user(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<UserEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_user_where(doc_id(&id.to_string()))
                .await
                .map_err(Into::into)
        })
    }

    fn find_user_by_email(
        &self,
        email: String,
    ) -> BoxFuture<'static, StorageResult<Option<UserEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_user_where(doc! {"email": email})
                .await
                .map_err(Into::into)
        })
    }

    fn find_user_by_partner_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<UserEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_user_where(doc! {"partner_code": code})
                .await
                .map_err(Into::into)
        })
    }

    fn find_user_by_partner(
        &self,
        partner_uid: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<UserEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_user_where(doc! {"partner_uid": partner_uid.to_string()})
                .await
                .map_err(Into::into)
        })
    }

    fn find_users(&self, ids: Vec<Uuid>) -> BoxFuture<'static, StorageResult<Vec<UserEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_users(ids).await.map_err(Into::into) })
    }

    fn update_user(
        &self,
        user: UserEntity,
        expected_revision: u64,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .update_user(user, expected_revision)
                .await
                .map_err(Into::into)
        })
    }

    fn insert_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.insert_session(session).await.map_err(Into::into) })
    }

    fn find_session(&self, id: String) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_session(id).await.map_err(Into::into) })
    }

    fn update_session(
        &self,
        session: SessionEntity,
        expected_revision: u64,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .update_session(session, expected_revision)
                .await
                .map_err(Into::into)
        })
    }

    fn delete_session(&self, id: String) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.delete_session(id).await.map_err(Into::into) })
    }

    fn append_message(&self, message: MessageEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.append_message(message).await.map_err(Into::into) })
    }

    fn delete_message(&self, message: MessageEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.delete_message(message).await.map_err(Into::into) })
    }

    fn list_messages(
        &self,
        session_id: String,
        since: Option<SystemTime>,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<MessageEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .list_messages(session_id, since, limit)
                .await
                .map_err(Into::into)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
