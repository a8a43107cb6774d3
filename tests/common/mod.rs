#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
};
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use tandem_back::{
    config::AppConfig,
    dao::chat_store::memory::MemoryChatStore,
    routes,
    services::mailer::{MailKind, OutboxMailer},
    state::{AppState, SharedState},
};

pub const PASSWORD: &str = "correct horse";

pub struct TestApp {
    pub router: Router,
    pub state: SharedState,
    pub mailer: OutboxMailer,
    pub store: MemoryChatStore,
}

/// A registered, verified and logged-in user.
pub struct TestUser {
    pub uid: Uuid,
    pub email: String,
    pub token: String,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(AppConfig::default()).await
    }

    pub async fn with_config(config: AppConfig) -> Self {
        let mailer = OutboxMailer::new();
        let state = AppState::new(config, Arc::new(mailer.clone()));
        let store = MemoryChatStore::new();
        state.install_store(Arc::new(store.clone())).await;
        let router = routes::router(state.clone());
        Self {
            router,
            state,
            mailer,
            store,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        self.request_with(method, uri, token, &[], body).await
    }

    pub async fn request_with(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        headers: &[(&str, &str)],
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    /// Register an account and return the verification token from the outbox.
    pub async fn register(&self, name: &str) -> (Uuid, String, String) {
        let email = format!("{name}@example.com");
        let (status, body) = self
            .request(
                Method::POST,
                "/auth/register",
                None,
                Some(json!({
                    "email": email,
                    "password": PASSWORD,
                    "name": name,
                    "sex": "unspecified",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        let uid = body["id"].as_str().unwrap().parse().unwrap();
        let token = self
            .mailer
            .last_to(&email, MailKind::Verification)
            .and_then(|mail| mail.token().map(str::to_owned))
            .unwrap();
        (uid, email, token)
    }

    pub async fn login(&self, email: &str, password: &str) -> (StatusCode, Value) {
        self.request(
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "email": email, "password": password })),
        )
        .await
    }

    /// Register, verify and log in.
    pub async fn user(&self, name: &str) -> TestUser {
        let (uid, email, verification) = self.register(name).await;
        let (status, _) = self
            .request(
                Method::POST,
                "/auth/verify",
                None,
                Some(json!({ "token": verification })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = self.login(&email, PASSWORD).await;
        assert_eq!(status, StatusCode::OK);
        TestUser {
            uid,
            email,
            token: body["token"].as_str().unwrap().to_owned(),
        }
    }
}
