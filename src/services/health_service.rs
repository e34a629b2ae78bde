use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Check the history store and report whether the service runs degraded.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let history_store = match state.history_store().await {
        Some(store) => match store.health_check().await {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "history store health check failed");
                false
            }
        },
        None => {
            warn!("history store unavailable (degraded mode)");
            false
        }
    };

    HealthResponse::new(state.is_degraded().await, history_store)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::history_store::MemoryHistoryStore,
        dto::health::HealthStatus,
        state::AppState,
    };

    #[tokio::test]
    async fn reports_degraded_until_history_store_installed() {
        let state = AppState::in_memory(AppConfig::default());
        let before = health_status(&state).await;
        assert_eq!(before.status, HealthStatus::Degraded);
        assert!(!before.history_store);

        state
            .install_history_store(Arc::new(MemoryHistoryStore::new()))
            .await;
        let after = health_status(&state).await;
        assert_eq!(after.status, HealthStatus::Ok);
        assert!(after.history_store);
    }
}
