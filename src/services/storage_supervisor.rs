use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{chat_store::ChatStore, storage::StorageError},
    state::SharedState,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Connect to the storage backend and keep it installed while healthy.
///
/// The store is withdrawn from the shared state (degraded mode) as soon as a
/// health check fails, and installed again once a reconnect succeeds. After
/// [`MAX_RECONNECT_ATTEMPTS`] failed reconnects a brand new connection is
/// attempted with exponential backoff.
pub async fn run<F, Fut>(state: SharedState, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn ChatStore>, StorageError>> + Send,
{
    let mut delay = INITIAL_DELAY;

    loop {
        match connect().await {
            Ok(store) => {
                state.install_store(store.clone()).await;
                info!("storage connection established; leaving degraded mode");
                delay = INITIAL_DELAY;

                while supervise(&state, &store).await {
                    sleep(HEALTH_POLL_INTERVAL).await;
                }

                warn!("exhausted storage reconnect attempts; staying in degraded mode");
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
            Err(err) => {
                warn!(error = %err, "storage connection attempt failed");
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
        }
    }
}

/// One health round. Returns `false` once the connection is considered lost.
async fn supervise(state: &SharedState, store: &Arc<dyn ChatStore>) -> bool {
    let Err(err) = store.health_check().await else {
        if state.is_degraded().await {
            info!("storage healthy again; leaving degraded mode");
            state.install_store(store.clone()).await;
        }
        return true;
    };

    warn!(error = %err, "storage health check failed; entering degraded mode");
    state.clear_store().await;

    let mut reconnect_delay = INITIAL_DELAY;
    for attempt in 0..MAX_RECONNECT_ATTEMPTS {
        match store.try_reconnect().await {
            Ok(()) => {
                info!(attempt, "storage reconnection succeeded after health check failure");
                state.install_store(store.clone()).await;
                return true;
            }
            Err(reconnect_err) => {
                warn!(attempt, error = %reconnect_err, "storage reconnect attempt failed");
                sleep(reconnect_delay).await;
                reconnect_delay = (reconnect_delay * 2).min(MAX_DELAY);
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::time::timeout;

    use super::*;
    use crate::{
        config::AppConfig, dao::chat_store::memory::MemoryChatStore,
        services::mailer::LogMailer, state::AppState,
    };

    #[tokio::test(start_paused = true)]
    async fn degraded_mode_follows_store_health() {
        let state = AppState::new(AppConfig::default(), Arc::new(LogMailer));
        let memory = MemoryChatStore::new();
        let mut watcher = state.degraded_watcher();
        assert!(*watcher.borrow());

        let connections = Arc::new(AtomicUsize::new(0));
        let store = memory.clone();
        let counter = connections.clone();
        tokio::spawn(run(state.clone(), move || {
            let store: Arc<dyn ChatStore> = Arc::new(store.clone());
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, StorageError>(store) }
        }));

        timeout(Duration::from_secs(1), watcher.wait_for(|degraded| !degraded))
            .await
            .unwrap()
            .unwrap();
        assert!(!state.is_degraded().await);

        memory.set_offline(true);
        timeout(Duration::from_secs(30), watcher.wait_for(|degraded| *degraded))
            .await
            .unwrap()
            .unwrap();
        assert!(state.require_store().await.is_err());

        memory.set_offline(false);
        timeout(Duration::from_secs(60), watcher.wait_for(|degraded| !degraded))
            .await
            .unwrap()
            .unwrap();
        assert!(connections.load(Ordering::SeqCst) >= 1);
    }
}
