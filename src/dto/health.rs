use serde::Serialize;
use serde_with::skip_serializing_none;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ok,
    /// No usable store: every storage-backed route answers 503.
    Degraded,
}

/// Body of `GET /healthcheck`.
#[skip_serializing_none]
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: HealthStatus,
    /// Why the store is unusable, only when degraded.
    pub reason: Option<String>,
    /// Users with a live event stream or chat socket on this instance.
    pub online_users: usize,
}

impl HealthResponse {
    pub fn ok(online_users: usize) -> Self {
        Self {
            status: HealthStatus::Ok,
            reason: None,
            online_users,
        }
    }

    pub fn degraded(reason: impl Into<String>, online_users: usize) -> Self {
        Self {
            status: HealthStatus::Degraded,
            reason: Some(reason.into()),
            online_users,
        }
    }
}
