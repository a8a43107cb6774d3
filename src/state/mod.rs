pub(crate) mod codes;
/// Per-key async locks for multi-document writes.
pub mod locks;
/// Connection counting for the online-users list.
pub mod presence;
pub(crate) mod session;
pub(crate) mod session_machine;
mod sse;
/// Bearer tokens issued at login.
pub mod tokens;
pub(crate) mod transitions;

use std::{future::Future, sync::Arc};

use tokio::sync::{RwLock, watch};
use tokio::time::timeout;
use uuid::Uuid;

use crate::{
    config::AppConfig, dao::chat_store::ChatStore, error::ServiceError, services::mailer::Mailer,
};

pub use self::sse::{HubMap, SseHub};
use self::{locks::KeyedLocks, presence::Presence, sse::SseState, tokens::TokenRegistry};

/// Handle passed to every handler and background task.
pub type SharedState = Arc<AppState>;

/// Capacity of each SSE broadcast channel.
const SSE_CHANNEL_CAPACITY: usize = 64;

/// Central application state: configuration, storage handle, credentials and
/// the real-time fan-out.
pub struct AppState {
    config: AppConfig,
    store: RwLock<Option<Arc<dyn ChatStore>>>,
    degraded: watch::Sender<bool>,
    mailer: Arc<dyn Mailer>,
    tokens: TokenRegistry,
    user_locks: KeyedLocks<Uuid>,
    sse: SseState,
    presence: Presence,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig, mailer: Arc<dyn Mailer>) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            tokens: TokenRegistry::new(config.auth_token_ttl),
            config,
            store: RwLock::new(None),
            degraded: degraded_tx,
            mailer,
            user_locks: KeyedLocks::new(),
            sse: SseState::new(SSE_CHANNEL_CAPACITY),
            presence: Presence::new(),
        })
    }

    /// Configuration the state was built with.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Obtain a handle to the current store, if one is installed.
    pub async fn store(&self) -> Option<Arc<dyn ChatStore>> {
        let guard = self.store.read().await;
        guard.as_ref().cloned()
    }

    /// Current store, or [`ServiceError::Degraded`] when none is installed.
    pub async fn require_store(&self) -> Result<Arc<dyn ChatStore>, ServiceError> {
        self.store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new store implementation and leave degraded mode.
    pub async fn install_store(&self, store: Arc<dyn ChatStore>) {
        {
            let mut guard = self.store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false);
    }

    /// Remove the current store and enter degraded mode.
    pub async fn clear_store(&self) {
        {
            let mut guard = self.store.write().await;
            guard.take();
        }
        self.update_degraded(true);
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        let guard = self.store.read().await;
        guard.is_none()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Transport for account emails.
    pub fn mailer(&self) -> &dyn Mailer {
        self.mailer.as_ref()
    }

    /// Bearer tokens issued at login.
    pub fn tokens(&self) -> &TokenRegistry {
        &self.tokens
    }

    /// Locks serialising multi-document writes on user accounts.
    pub fn user_locks(&self) -> &KeyedLocks<Uuid> {
        &self.user_locks
    }

    /// Hubs behind the per-user event streams.
    pub fn user_events(&self) -> &HubMap<Uuid> {
        self.sse.users()
    }

    /// Hubs behind the per-session event streams.
    pub fn session_events(&self) -> &HubMap<String> {
        self.sse.sessions()
    }

    /// Live connection counts.
    pub fn presence(&self) -> &Presence {
        &self.presence
    }

    /// Run `work` under the configured transition timeout.
    pub async fn with_timeout<Fut, T>(&self, work: Fut) -> Result<T, ServiceError>
    where
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        timeout(self.config.transition_timeout, work)
            .await
            .map_err(|_| ServiceError::Timeout)?
    }

    /// Update and broadcast the degraded flag when the value changes.
    fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            let changed = *current != value;
            *current = value;
            changed
        });
    }
}
