use std::{sync::Arc, time::SystemTime};

use futures::future::BoxFuture;
use reqwest::{Client, Method, StatusCode, Url};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, from_value, json};
use tracing::warn;
use uuid::Uuid;

use crate::dao::{
    chat_store::ChatStore,
    models::{MessageEntity, SessionEntity, UserEntity},
    storage::StorageResult,
};

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{
        AllDocsResponse, BulkDocsRequest, CODE_CLAIM_TYPE, Claim, CouchDocument,
        DeletedDocument, EMAIL_CLAIM_TYPE, END_SUFFIX, FindResponse, MESSAGE_TYPE, SESSION_TYPE,
        USER_TYPE, code_doc_id, email_doc_id, message_doc_id, message_prefix, message_start_key, session_doc_id,
        user_doc_id,
    },
};

const ALL_DOCS: &str = "_all_docs";
const FIND: &str = "_find";
const BULK_DOCS: &str = "_bulk_docs";
const INDEX: &str = "_index";

type UserDocument = CouchDocument<UserEntity>;
type SessionDocument = CouchDocument<SessionEntity>;
type MessageDocument = CouchDocument<MessageEntity>;

/// CouchDB-backed [`ChatStore`] speaking the HTTP API through `reqwest`.
#[derive(Clone)]
pub struct CouchChatStore {
    client: Client,
    base_url: Arc<Url>,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
}

impl CouchChatStore {
    /// Establish a connection to CouchDB and ensure the database and its indexes exist.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;

        let invalid = || CouchDaoError::InvalidBaseUrl {
            url: config.base_url.clone(),
        };
        let base_url = Url::parse(&config.base_url).map_err(|_| invalid())?;
        if base_url.cannot_be_a_base() {
            return Err(invalid());
        }

        let auth = config
            .credentials
            .map(|(u, p)| (Arc::<str>::from(u), Arc::<str>::from(p)));

        let store = Self {
            client,
            base_url: Arc::new(base_url),
            database: Arc::<str>::from(config.database),
            auth,
        };

        store.ensure_database().await?;
        store.ensure_indexes().await?;
        Ok(store)
    }

    /// Database URL followed by the given path segments, each percent-encoded.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = (*self.base_url).clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push(&self.database);
            for segment in segments {
                path.push(segment);
            }
        }
        url
    }

    fn request(&self, method: Method, segments: &[&str]) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, self.url(segments));
        if let Some((ref user, ref pass)) = self.auth {
            builder.basic_auth(user.as_ref(), Some(pass.as_ref()))
        } else {
            builder
        }
    }

    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
        path: &str,
    ) -> CouchResult<reqwest::Response> {
        builder
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: path.to_owned(),
                source,
            })
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let response = self
            .request(Method::GET, &[])
            .send()
            .await
            .map_err(|source| CouchDaoError::Database {
                database: database.clone(),
                action: "query",
                source,
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let create = self
                    .request(Method::PUT, &[])
                    .send()
                    .await
                    .map_err(|source| CouchDaoError::Database {
                        database: database.clone(),
                        action: "create",
                        source,
                    })?;
                // 412 means another instance created it first.
                let status = create.status();
                if status.is_success() || status == StatusCode::PRECONDITION_FAILED {
                    Ok(())
                } else {
                    Err(CouchDaoError::DatabaseStatus { database, status })
                }
            }
            other => Err(CouchDaoError::DatabaseStatus {
                database,
                status: other,
            }),
        }
    }

    /// Mango indexes backing the partner lookups.
    async fn ensure_indexes(&self) -> CouchResult<()> {
        let indexes = [
            ("user-partner-code", json!(["doc_type", "partner_code"])),
            ("user-partner-uid", json!(["doc_type", "relationship.partner_uid"])),
        ];
        for (name, fields) in indexes {
            let body = json!({ "index": { "fields": fields }, "name": name, "type": "json" });
            let response = self
                .send(self.request(Method::POST, &[INDEX]).json(&body), INDEX)
                .await?;
            if !response.status().is_success() {
                return Err(CouchDaoError::IndexCreate {
                    index: name,
                    status: response.status(),
                });
            }
        }
        Ok(())
    }

    async fn get_document<T>(&self, doc_id: &str) -> CouchResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let response = self
            .send(self.request(Method::GET, &[doc_id]), doc_id)
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let value = response.json::<Value>().await.map_err(|source| {
                    CouchDaoError::DecodeResponse {
                        path: doc_id.to_owned(),
                        source,
                    }
                })?;
                from_value(value)
                    .map(Some)
                    .map_err(|source| CouchDaoError::DeserializeValue {
                        path: doc_id.to_owned(),
                        source,
                    })
            }
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_owned(),
                status: other,
            }),
        }
    }

    /// Write a document. Resolves to `false` when CouchDB reports a revision conflict.
    async fn put_document<T>(&self, doc_id: &str, document: &T) -> CouchResult<bool>
    where
        T: ?Sized + Serialize,
    {
        let response = self
            .send(self.request(Method::PUT, &[doc_id]).json(document), doc_id)
            .await?;

        match response.status() {
            StatusCode::CONFLICT => Ok(false),
            status if status.is_success() => Ok(true),
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_owned(),
                status: other,
            }),
        }
    }

    async fn delete_document(&self, doc_id: &str, rev: &str) -> CouchResult<bool> {
        let response = self
            .send(
                self.request(Method::DELETE, &[doc_id]).query(&[("rev", rev)]),
                doc_id,
            )
            .await?;

        match response.status() {
            StatusCode::CONFLICT | StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_owned(),
                status: other,
            }),
        }
    }

    async fn all_docs(
        &self,
        start_key: &str,
        end_key: &str,
        include_docs: bool,
        limit: Option<usize>,
    ) -> CouchResult<AllDocsResponse> {
        let mut query = vec![
            ("include_docs", include_docs.to_string()),
            ("startkey", Value::from(start_key).to_string()),
            ("endkey", Value::from(end_key).to_string()),
        ];
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }

        let response = self
            .send(self.request(Method::GET, &[ALL_DOCS]).query(&query), ALL_DOCS)
            .await?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: ALL_DOCS.to_owned(),
                status: response.status(),
            });
        }

        response
            .json::<AllDocsResponse>()
            .await
            .map_err(|source| CouchDaoError::DecodeResponse {
                path: ALL_DOCS.to_owned(),
                source,
            })
    }

    fn decode_rows<T>(rows: Vec<Value>, path: &str) -> CouchResult<Vec<T>>
    where
        T: DeserializeOwned,
    {
        rows.into_iter()
            .map(|doc| {
                from_value(doc).map_err(|source| CouchDaoError::DeserializeValue {
                    path: path.to_owned(),
                    source,
                })
            })
            .collect()
    }

    async fn find_documents<T>(&self, selector: Value, limit: usize) -> CouchResult<Vec<T>>
    where
        T: DeserializeOwned,
    {
        let body = json!({ "selector": selector, "limit": limit });
        let response = self
            .send(self.request(Method::POST, &[FIND]).json(&body), FIND)
            .await?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: FIND.to_owned(),
                status: response.status(),
            });
        }

        let payload = response
            .json::<FindResponse>()
            .await
            .map_err(|source| CouchDaoError::DecodeResponse {
                path: FIND.to_owned(),
                source,
            })?;
        Self::decode_rows(payload.docs, FIND)
    }

    async fn find_user_where(&self, selector: Value) -> CouchResult<Option<UserEntity>> {
        let mut selector = selector;
        selector["doc_type"] = Value::from(USER_TYPE);
        let docs = self.find_documents::<UserDocument>(selector, 1).await?;
        Ok(docs.into_iter().next().map(|doc| doc.body))
    }

    async fn insert_user(&self, user: UserEntity) -> CouchResult<bool> {
        let claim_id = email_doc_id(&user.email);
        let claim = CouchDocument::new(
            claim_id.clone(),
            EMAIL_CLAIM_TYPE,
            Claim { user_id: user.id },
        );
        if !self.put_document(&claim_id, &claim).await? {
            return Ok(false);
        }

        let doc_id = user_doc_id(user.id);
        let document = CouchDocument::new(doc_id.clone(), USER_TYPE, user);
        match self.put_document(&doc_id, &document).await {
            Ok(true) => Ok(true),
            outcome => {
                self.release_claim_logged(&claim_id).await;
                outcome
            }
        }
    }

    /// Reserve `code` for `uid`. Resolves to `false` when another account holds it.
    async fn claim_code(&self, code: &str, uid: Uuid) -> CouchResult<bool> {
        let claim_id = code_doc_id(code);
        let claim = CouchDocument::new(claim_id.clone(), CODE_CLAIM_TYPE, Claim { user_id: uid });
        if self.put_document(&claim_id, &claim).await? {
            return Ok(true);
        }
        let holder = self
            .get_document::<CouchDocument<Claim>>(&claim_id)
            .await?
            .map(|existing| existing.body.user_id);
        Ok(holder == Some(uid))
    }

    async fn release_claim_logged(&self, claim_id: &str) {
        if let Err(err) = self.release_claim(claim_id).await {
            warn!(claim = %claim_id, error = %err, "failed to release claim");
        }
    }

    async fn release_claim(&self, claim_id: &str) -> CouchResult<()> {
        let claim = self
            .get_document::<CouchDocument<Claim>>(claim_id)
            .await?;
        if let Some(rev) = claim.and_then(|claim| claim.rev) {
            self.delete_document(claim_id, &rev).await?;
        }
        Ok(())
    }

    async fn find_user_by_email(&self, email: String) -> CouchResult<Option<UserEntity>> {
        let Some(claim) = self
            .get_document::<CouchDocument<Claim>>(&email_doc_id(&email))
            .await?
        else {
            return Ok(None);
        };
        let user = self
            .get_document::<UserDocument>(&user_doc_id(claim.body.user_id))
            .await?;
        Ok(user.map(|doc| doc.body))
    }

    async fn find_users(&self, ids: Vec<Uuid>) -> CouchResult<Vec<UserEntity>> {
        let keys: Vec<String> = ids.into_iter().map(user_doc_id).collect();
        let body = json!({ "keys": keys });
        let response = self
            .send(
                self.request(Method::POST, &[ALL_DOCS])
                    .query(&[("include_docs", "true")])
                    .json(&body),
                ALL_DOCS,
            )
            .await?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: ALL_DOCS.to_owned(),
                status: response.status(),
            });
        }

        let payload = response
            .json::<AllDocsResponse>()
            .await
            .map_err(|source| CouchDaoError::DecodeResponse {
                path: ALL_DOCS.to_owned(),
                source,
            })?;
        let docs = payload.rows.into_iter().filter_map(|row| row.doc).collect();
        let users = Self::decode_rows::<UserDocument>(docs, ALL_DOCS)?;
        Ok(users.into_iter().map(|doc| doc.body).collect())
    }

    /// Compare-and-swap a user document. A new pairing code is claimed first so
    /// two accounts never advertise the same one.
    async fn update_user(&self, user: UserEntity, expected_revision: u64) -> CouchResult<bool> {
        let doc_id = user_doc_id(user.id);
        let Some(existing) = self.get_document::<UserDocument>(&doc_id).await? else {
            return Ok(false);
        };
        if existing.body.revision != expected_revision {
            return Ok(false);
        }

        let old_code = existing.body.partner_code.clone();
        let new_code = user.partner_code.clone().filter(|code| old_code.as_ref() != Some(code));
        if let Some(code) = &new_code {
            if !self.claim_code(code, user.id).await? {
                return Ok(false);
            }
        }

        let mut document = CouchDocument::new(doc_id.clone(), USER_TYPE, user);
        document.rev = existing.rev;
        let written = self.put_document(&doc_id, &document).await;
        let released = match &written {
            Ok(true) if document.body.partner_code != old_code => old_code,
            Ok(true) => None,
            _ => new_code,
        };
        if let Some(code) = released {
            self.release_claim_logged(&code_doc_id(&code)).await;
        }
        written
    }

    async fn insert_session(&self, session: SessionEntity) -> CouchResult<bool> {
        let doc_id = session_doc_id(&session.id);
        let document = CouchDocument::new(doc_id.clone(), SESSION_TYPE, session);
        self.put_document(&doc_id, &document).await
    }

    async fn find_session(&self, id: String) -> CouchResult<Option<SessionEntity>> {
        let document = self
            .get_document::<SessionDocument>(&session_doc_id(&id))
            .await?;
        Ok(document.map(|doc| doc.body))
    }

    async fn update_session(
        &self,
        session: SessionEntity,
        expected_revision: u64,
    ) -> CouchResult<bool> {
        let doc_id = session_doc_id(&session.id);
        let Some(existing) = self.get_document::<SessionDocument>(&doc_id).await? else {
            return Ok(false);
        };
        if existing.body.revision != expected_revision {
            return Ok(false);
        }
        let mut document = CouchDocument::new(doc_id.clone(), SESSION_TYPE, session);
        document.rev = existing.rev;
        self.put_document(&doc_id, &document).await
    }

    async fn delete_session(&self, id: String) -> CouchResult<bool> {
        // Session first: a message appended after this point sees no session.
        let doc_id = session_doc_id(&id);
        let rev = self
            .get_document::<SessionDocument>(&doc_id)
            .await?
            .and_then(|existing| existing.rev);
        let deleted = match rev {
            Some(rev) => self.delete_document(&doc_id, &rev).await?,
            None => false,
        };

        let prefix = message_prefix(&id);
        let end_key = format!("{prefix}{END_SUFFIX}");
        let rows = self.all_docs(&prefix, &end_key, false, None).await?.rows;
        let docs: Vec<DeletedDocument> = rows
            .into_iter()
            .filter_map(|row| {
                row.value.map(|value| DeletedDocument {
                    id: row.id,
                    rev: value.rev,
                    deleted: true,
                })
            })
            .collect();

        if !docs.is_empty() {
            let response = self
                .send(
                    self.request(Method::POST, &[BULK_DOCS])
                        .json(&BulkDocsRequest { docs }),
                    BULK_DOCS,
                )
                .await?;
            if !response.status().is_success() {
                return Err(CouchDaoError::PurgeMessages {
                    session: id,
                    status: response.status(),
                });
            }
        }
        Ok(deleted)
    }

    async fn delete_message(&self, message: MessageEntity) -> CouchResult<()> {
        let doc_id = message_doc_id(&message.session_id, message.created_at, message.id);
        let rev = self
            .get_document::<MessageDocument>(&doc_id)
            .await?
            .and_then(|existing| existing.rev);
        if let Some(rev) = rev {
            self.delete_document(&doc_id, &rev).await?;
        }
        Ok(())
    }

    async fn append_message(&self, message: MessageEntity) -> CouchResult<()> {
        let doc_id = message_doc_id(&message.session_id, message.created_at, message.id);
        let document = CouchDocument::new(doc_id.clone(), MESSAGE_TYPE, message);
        if self.put_document(&doc_id, &document).await? {
            Ok(())
        } else {
            Err(CouchDaoError::DuplicateMessage { id: doc_id })
        }
    }

    async fn list_messages(
        &self,
        session_id: String,
        since: Option<SystemTime>,
        limit: usize,
    ) -> CouchResult<Vec<MessageEntity>> {
        let prefix = message_prefix(&session_id);
        let end_key = format!("{prefix}{END_SUFFIX}");
        let mut start_key = since
            .map(|since| message_start_key(&session_id, since))
            .unwrap_or_else(|| prefix.clone());

        let mut messages: Vec<MessageEntity> = Vec::new();
        // Keys only carry millisecond precision, so the boundary millisecond is
        // re-checked against the full timestamp and may need another page.
        loop {
            let rows = self
                .all_docs(&start_key, &end_key, true, Some(limit + 1))
                .await?
                .rows;
            let exhausted = rows.len() <= limit;
            let last_key = rows.last().map(|row| row.id.clone());
            let docs = rows.into_iter().filter_map(|row| row.doc).collect();
            for doc in Self::decode_rows::<MessageDocument>(docs, ALL_DOCS)? {
                let message = doc.body;
                if since.is_none_or(|since| message.created_at > since)
                    && messages.len() < limit
                    && !messages.iter().any(|seen| seen.id == message.id)
                {
                    messages.push(message);
                }
            }
            match last_key {
                Some(key) if !exhausted && messages.len() < limit => start_key = key,
                _ => break,
            }
        }
        Ok(messages)
    }

    async fn ping(&self) -> CouchResult<()> {
        let path = self.database.to_string();
        let response = self.send(self.request(Method::GET, &[]), &path).await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(CouchDaoError::RequestStatus {
                path,
                status: response.status(),
            })
        }
    }
}

impl ChatStore for CouchChatStore {
    fn insert_user(&self, user: UserEntity) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.insert_user(user).await.map_err(Into::into) })
    }

    fn find_user(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<UserEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let document = store.get_document::<UserDocument>(&user_doc_id(id)).await?;
            Ok(document.map(|doc| doc.body))
        })
    }

    fn find_user_by_email(
        &self,
        email: String,
    ) -> BoxFuture<'static, StorageResult<Option<UserEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_user_by_email(email).await.map_err(Into::into) })
    }

    fn find_user_by_partner_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<UserEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_user_where(json!({ "partner_code": code }))
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
                .find_user_where(json!({ "relationship.partner_uid": partner_uid }))
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
        Box::pin(async move { store.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_database().await.map_err(Into::into) })
    }
}
