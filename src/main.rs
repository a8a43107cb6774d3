//! Tandem Back binary entrypoint wiring REST, WebSocket, SSE and the storage supervisor.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::{Context, bail};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tandem_back::{
    config::AppConfig,
    dao::{
        chat_store::{ChatStore, memory::MemoryChatStore},
        storage::StorageError,
    },
    routes,
    services::{mailer::LogMailer, storage_supervisor},
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let app_state = AppState::new(config, Arc::new(LogMailer));

    let backend = env::var("STORAGE_BACKEND").unwrap_or_else(|_| default_backend().into());
    start_storage(&app_state, &backend).await?;

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

fn default_backend() -> &'static str {
    if cfg!(feature = "mongo-store") {
        "mongo"
    } else if cfg!(feature = "couch-store") {
        "couch"
    } else {
        "memory"
    }
}

/// Install the selected backend. Database backends are handed to the storage
/// supervisor, which connects in the background; the server answers 503 until
/// then.
async fn start_storage(state: &SharedState, backend: &str) -> anyhow::Result<()> {
    match backend {
        "memory" => {
            warn!("using the in-memory store; data is lost on restart");
            let store: Arc<dyn ChatStore> = Arc::new(MemoryChatStore::new());
            state.install_store(store).await;
        }
        #[cfg(feature = "mongo-store")]
        "mongo" => {
            use tandem_back::dao::chat_store::mongodb::{MongoChatStore, MongoConfig};

            info!("using the MongoDB store");
            tokio::spawn(storage_supervisor::run(state.clone(), || async {
                let config = MongoConfig::from_env().await?;
                let store: Arc<dyn ChatStore> = Arc::new(MongoChatStore::connect(config).await?);
                Ok::<_, StorageError>(store)
            }));
        }
        #[cfg(feature = "couch-store")]
        "couch" => {
            use tandem_back::dao::chat_store::couchdb::{CouchChatStore, CouchConfig};

            info!("using the CouchDB store");
            tokio::spawn(storage_supervisor::run(state.clone(), || async {
                let config = CouchConfig::from_env()?;
                let store: Arc<dyn ChatStore> = Arc::new(CouchChatStore::connect(config).await?);
                Ok::<_, StorageError>(store)
            }));
        }
        other => bail!("unsupported STORAGE_BACKEND `{other}` (expected mongo, couch or memory)"),
    }
    Ok(())
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler; waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
