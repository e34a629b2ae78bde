//! Health check payloads.

use serde::Serialize;
use utoipa::ToSchema;

/// Overall service state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Everything is reachable.
    Ok,
    /// Live games keep running but question history is not being recorded.
    Degraded,
}

/// Health payload returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Overall state.
    pub status: HealthStatus,
    /// Whether a history store is installed and answered its last health check.
    pub history_store: bool,
}

impl HealthResponse {
    /// Build the payload from the degraded flag and store presence.
    pub fn new(degraded: bool, history_store: bool) -> Self {
        let status = if degraded {
            HealthStatus::Degraded
        } else {
            HealthStatus::Ok
        };
        Self {
            status,
            history_store,
        }
    }
}
