mod common;

use std::{sync::Arc, time::SystemTime};

use axum::http::{Method, StatusCode};
use futures::future::{BoxFuture, join_all};
use serde_json::{Value, json};
use tandem_back::config::AppConfig;
use tandem_back::dao::{
    chat_store::{ChatStore, memory::MemoryChatStore},
    models::{MessageEntity, SessionEntity, UserEntity},
    storage::StorageResult,
};
use uuid::Uuid;

use common::{TestApp, TestUser};

/// Store whose appends land right after the session was deleted, the way an
/// `end` racing a send would interleave.
#[derive(Clone)]
struct EndsBeforeAppend(MemoryChatStore);

impl ChatStore for EndsBeforeAppend {
    fn insert_user(&self, user: UserEntity) -> BoxFuture<'static, StorageResult<bool>> {
        self.0.insert_user(user)
    }
    fn find_user(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<UserEntity>>> {
        self.0.find_user(id)
    }
    fn find_user_by_email(
        &self,
        email: String,
    ) -> BoxFuture<'static, StorageResult<Option<UserEntity>>> {
        self.0.find_user_by_email(email)
    }
    fn find_user_by_partner_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<UserEntity>>> {
        self.0.find_user_by_partner_code(code)
    }
    fn find_user_by_partner(
        &self,
        partner_uid: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<UserEntity>>> {
        self.0.find_user_by_partner(partner_uid)
    }
    fn find_users(&self, ids: Vec<Uuid>) -> BoxFuture<'static, StorageResult<Vec<UserEntity>>> {
        self.0.find_users(ids)
    }
    fn update_user(
        &self,
        user: UserEntity,
        expected_revision: u64,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        self.0.update_user(user, expected_revision)
    }
    fn insert_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<bool>> {
        self.0.insert_session(session)
    }
    fn find_session(&self, id: String) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        self.0.find_session(id)
    }
    fn update_session(
        &self,
        session: SessionEntity,
        expected_revision: u64,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        self.0.update_session(session, expected_revision)
    }
    fn delete_session(&self, id: String) -> BoxFuture<'static, StorageResult<bool>> {
        self.0.delete_session(id)
    }
    fn append_message(&self, message: MessageEntity) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.0.clone();
        Box::pin(async move {
            inner.delete_session(message.session_id.clone()).await?;
            inner.append_message(message).await
        })
    }
    fn delete_message(&self, message: MessageEntity) -> BoxFuture<'static, StorageResult<()>> {
        self.0.delete_message(message)
    }
    fn list_messages(
        &self,
        session_id: String,
        since: Option<SystemTime>,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<MessageEntity>>> {
        self.0.list_messages(session_id, since, limit)
    }
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.0.health_check()
    }
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.0.try_reconnect()
    }
}

async fn create_session(app: &TestApp, admin: &TestUser) -> (String, String) {
    let (status, body) = app
        .request(Method::POST, "/sessions", Some(&admin.token), None)
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let key = body["access_key"].as_str().unwrap().to_owned();
    assert_eq!(key.len(), 32);
    (body["session"]["id"].as_str().unwrap().to_owned(), key)
}

async fn send(app: &TestApp, user: &TestUser, id: &str, key: &str, text: &str) -> (StatusCode, Value) {
    app.request_with(
        Method::POST,
        &format!("/sessions/{id}/messages"),
        Some(&user.token),
        &[("x-access-key", key)],
        Some(json!({ "text": text })),
    )
    .await
}

async fn history(app: &TestApp, user: &TestUser, id: &str, key: &str, query: &str) -> (StatusCode, Value) {
    app.request_with(
        Method::GET,
        &format!("/sessions/{id}/messages{query}"),
        Some(&user.token),
        &[("x-access-key", key)],
        None,
    )
    .await
}

async fn join(app: &TestApp, user: &TestUser, id: &str) -> (StatusCode, Value) {
    app.request(Method::POST, &format!("/sessions/{id}/join"), Some(&user.token), None)
        .await
}

async fn accept(app: &TestApp, admin: &TestUser, user: &TestUser, id: &str) -> (StatusCode, Value) {
    app.request(
        Method::POST,
        &format!("/sessions/{id}/participants/{}/accept", user.uid),
        Some(&admin.token),
        None,
    )
    .await
}

#[tokio::test]
async fn admission_then_chat() {
    let app = TestApp::new().await;
    let ada = app.user("ada").await;
    let bob = app.user("bob").await;
    let (id, key) = create_session(&app, &ada).await;

    // Codes are case-insensitive.
    let (status, body) = app
        .request(
            Method::POST,
            &format!("/sessions/{}/join", id.to_lowercase()),
            Some(&bob.token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["participants"][1]["status"], "pending");

    let (status, _) = send(&app, &bob, &id, &key, "hi").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .request(Method::POST, &format!("/sessions/{id}/start"), Some(&ada.token), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .request(
            Method::POST,
            &format!("/sessions/{id}/participants/{}/accept", bob.uid),
            Some(&bob.token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .request(
            Method::POST,
            &format!("/sessions/{id}/participants/{}/accept", bob.uid),
            Some(&ada.token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["participants"][1]["status"], "accepted");

    // Messages wait for the chat to start.
    let (status, _) = send(&app, &bob, &id, &key, "hi").await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app
        .request(Method::POST, &format!("/sessions/{id}/start"), Some(&ada.token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phase"], "chatting");

    let (status, first) = send(&app, &bob, &id, &key, "  hi ada  ").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["text"], "hi ada");
    assert_eq!(first["sender_name"], "bob");
    let (status, _) = send(&app, &ada, &id, &key, "hello bob").await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = history(&app, &ada, &id, &key, "").await;
    assert_eq!(status, StatusCode::OK);
    let texts: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|message| message["text"].as_str().unwrap())
        .collect();
    assert_eq!(texts, ["hi ada", "hello bob"]);

    let since = first["created_at"].as_str().unwrap();
    let (_, body) = history(&app, &bob, &id, &key, &format!("?since={since}")).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["text"], "hello bob");

    let (status, _) = history(&app, &bob, &id, &key, "?since=yesterday").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn access_key_gates_messages() {
    let app = TestApp::new().await;
    let ada = app.user("ada").await;
    let (id, key) = create_session(&app, &ada).await;

    let (status, _) = history(&app, &ada, &id, &"0".repeat(32), "").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .request(
            Method::GET,
            &format!("/sessions/{id}/messages"),
            Some(&ada.token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = history(&app, &ada, &id, &key, "").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());

    // The key is never echoed back.
    let (_, body) = app
        .request(Method::GET, &format!("/sessions/{id}"), Some(&ada.token), None)
        .await;
    assert!(body.get("access_key").is_none());
    assert!(!body.to_string().contains(&key));
}

#[tokio::test]
async fn outsiders_cannot_see_a_session() {
    let app = TestApp::new().await;
    let ada = app.user("ada").await;
    let eve = app.user("eve").await;
    let (id, key) = create_session(&app, &ada).await;

    let (status, _) = app
        .request(Method::GET, &format!("/sessions/{id}"), Some(&eve.token), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = history(&app, &eve, &id, &key, "").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .request(Method::GET, "/sessions/ZZZZZZ", Some(&eve.token), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn leaving_hands_admin_over_and_last_one_out_deletes() {
    let app = TestApp::new().await;
    let ada = app.user("ada").await;
    let bob = app.user("bob").await;
    let (id, _) = create_session(&app, &ada).await;
    app.request(Method::POST, &format!("/sessions/{id}/join"), Some(&bob.token), None)
        .await;

    let (status, _) = app
        .request(Method::POST, &format!("/sessions/{id}/leave"), Some(&ada.token), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = app
        .request(Method::GET, &format!("/sessions/{id}"), Some(&bob.token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["admin_uid"], bob.uid.to_string());
    assert_eq!(body["participants"][0]["status"], "accepted");

    let (status, _) = app
        .request(Method::POST, &format!("/sessions/{id}/leave"), Some(&bob.token), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app
        .request(Method::GET, &format!("/sessions/{id}"), Some(&bob.token), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_removes_and_ends() {
    let app = TestApp::new().await;
    let ada = app.user("ada").await;
    let bob = app.user("bob").await;
    let (id, _) = create_session(&app, &ada).await;
    app.request(Method::POST, &format!("/sessions/{id}/join"), Some(&bob.token), None)
        .await;

    let (status, _) = app
        .request(
            Method::DELETE,
            &format!("/sessions/{id}/participants/{}", ada.uid),
            Some(&ada.token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app
        .request(
            Method::DELETE,
            &format!("/sessions/{id}/participants/{}", bob.uid),
            Some(&ada.token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["participants"].as_array().unwrap().len(), 1);

    let (status, _) = app
        .request(Method::DELETE, &format!("/sessions/{id}"), Some(&bob.token), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .request(Method::DELETE, &format!("/sessions/{id}"), Some(&ada.token), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app
        .request(Method::GET, &format!("/sessions/{id}"), Some(&ada.token), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn session_stream_announces_removals() {
    let app = TestApp::new().await;
    let ada = app.user("ada").await;
    let bob = app.user("bob").await;
    let (id, _) = create_session(&app, &ada).await;
    app.request(Method::POST, &format!("/sessions/{id}/join"), Some(&bob.token), None)
        .await;

    let mut events = app.state.session_events().subscribe(id.clone());
    app.request(
        Method::DELETE,
        &format!("/sessions/{id}/participants/{}", bob.uid),
        Some(&ada.token),
        None,
    )
    .await;

    let mut names = Vec::new();
    while let Ok(event) = events.try_recv() {
        names.push(event.event.unwrap_or_default());
    }
    assert!(names.contains(&"participant.removed".to_string()), "{names:?}");
}

/// Create a session with ada as admin and bob accepted, then start the chat.
async fn chatting_pair(app: &TestApp) -> (TestUser, TestUser, String, String) {
    let ada = app.user("ada").await;
    let bob = app.user("bob").await;
    let (id, key) = create_session(app, &ada).await;
    join(app, &bob, &id).await;
    accept(app, &ada, &bob, &id).await;
    let (status, _) = app
        .request(Method::POST, &format!("/sessions/{id}/start"), Some(&ada.token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    (ada, bob, id, key)
}

#[tokio::test]
async fn message_racing_an_end_is_discarded() {
    let app = TestApp::new().await;
    let (_, bob, id, key) = chatting_pair(&app).await;
    let (status, _) = send(&app, &bob, &id, &key, "before").await;
    assert_eq!(status, StatusCode::CREATED);

    app.state
        .install_store(Arc::new(EndsBeforeAppend(app.store.clone())))
        .await;
    let (status, _) = send(&app, &bob, &id, &key, "secret").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    assert!(app.store.find_session(id.clone()).await.unwrap().is_none());
    let left = app.store.list_messages(id, None, 100).await.unwrap();
    assert!(left.is_empty(), "{left:?}");
}

#[tokio::test]
async fn concurrent_joins_and_accepts_all_land() {
    let app = TestApp::new().await;
    let ada = app.user("ada").await;
    let (id, _) = create_session(&app, &ada).await;
    let mut guests = Vec::new();
    for name in ["bob", "carol", "dan", "erin", "fay", "gus"] {
        guests.push(app.user(name).await);
    }

    let joins = join_all(guests.iter().map(|guest| join(&app, guest, &id))).await;
    assert!(joins.iter().all(|(status, _)| *status == StatusCode::OK), "{joins:?}");

    let accepts = join_all(guests.iter().map(|guest| accept(&app, &ada, guest, &id))).await;
    assert!(accepts.iter().all(|(status, _)| *status == StatusCode::OK), "{accepts:?}");

    let (_, body) = app
        .request(Method::GET, &format!("/sessions/{id}"), Some(&ada.token), None)
        .await;
    let participants = body["participants"].as_array().unwrap();
    assert_eq!(participants.len(), 7);
    assert!(participants.iter().all(|p| p["status"] == "accepted"));
}

#[tokio::test]
async fn history_limit_is_clamped_to_the_page_size() {
    let app = TestApp::with_config(AppConfig {
        message_page_size: 2,
        ..AppConfig::default()
    })
    .await;
    let (_, bob, id, key) = chatting_pair(&app).await;
    for text in ["one", "two", "three"] {
        send(&app, &bob, &id, &key, text).await;
    }

    let count = |body: Value| body.as_array().unwrap().len();
    let (_, body) = history(&app, &bob, &id, &key, "").await;
    assert_eq!(count(body), 2);
    let (_, body) = history(&app, &bob, &id, &key, "?limit=50").await;
    assert_eq!(count(body), 2);
    let (_, body) = history(&app, &bob, &id, &key, "?limit=0").await;
    assert_eq!(body[0]["text"], "one");
    assert_eq!(count(body), 1);
}
