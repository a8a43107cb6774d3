use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Ping the installed store and report whether requests can be served.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let online = state.presence().online().len();
    let Some(store) = state.store().await else {
        warn!("healthcheck: no store installed (degraded mode)");
        return HealthResponse::degraded("no storage backend connected", online);
    };

    match store.health_check().await {
        Ok(()) => HealthResponse::ok(online),
        Err(err) => {
            warn!(error = %err, "healthcheck: store ping failed");
            HealthResponse::degraded(err.to_string(), online)
        }
    }
}
