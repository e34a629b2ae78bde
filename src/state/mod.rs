//! Shared application state handed to routes and services.

/// Live sockets and rooms.
pub mod hub;
/// Session statuses and transitions.
pub mod lifecycle;
/// Scoring and ranking.
pub mod scoring;
/// Records kept in the ephemeral store.
pub mod session;

use std::{future::Future, sync::Arc};

use tokio::sync::{RwLock, watch};

use crate::{
    config::AppConfig,
    dao::{
        ephemeral::{EphemeralStore, MemoryStore},
        history_store::HistoryStore,
        locks::{LockKey, LockManager, LockSet, MemoryLockManager, with_locks},
        session_repo::SessionRepository,
    },
    error::ServiceError,
    services::notifier::{LogNotifier, StatusNotifier},
};

pub use self::hub::ConnectionHub;

/// Handle shared by every route and handler.
pub type SharedState = Arc<AppState>;

/// Central application state: live-state store, locks, sockets and the history backend.
pub struct AppState {
    config: Arc<AppConfig>,
    repo: SessionRepository,
    locks: Arc<dyn LockManager>,
    hub: ConnectionHub,
    history: RwLock<Option<Arc<dyn HistoryStore>>>,
    notifier: Arc<dyn StatusNotifier>,
    degraded: watch::Sender<bool>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a history store is installed.
    pub fn new(
        config: AppConfig,
        store: Arc<dyn EphemeralStore>,
        locks: Arc<dyn LockManager>,
        notifier: Arc<dyn StatusNotifier>,
    ) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        let repo = SessionRepository::new(store, config.session_ttl());
        Arc::new(Self {
            config: Arc::new(config),
            repo,
            locks,
            hub: ConnectionHub::new(),
            history: RwLock::new(None),
            notifier,
            degraded: degraded_tx,
        })
    }

    /// State backed entirely by in-process stores, with status changes only logged.
    pub fn in_memory(config: AppConfig) -> SharedState {
        Self::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryLockManager::new()),
            Arc::new(LogNotifier),
        )
    }

    /// Immutable application configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Typed access to the live-state store.
    pub fn repo(&self) -> &SessionRepository {
        &self.repo
    }

    /// Socket registry used for acknowledgements and room broadcasts.
    pub fn hub(&self) -> &ConnectionHub {
        &self.hub
    }

    /// Lock backend shared by every lock set.
    pub fn lock_manager(&self) -> Arc<dyn LockManager> {
        self.locks.clone()
    }

    /// Sink for session status changes.
    pub fn notifier(&self) -> Arc<dyn StatusNotifier> {
        self.notifier.clone()
    }

    /// Run `work` while holding `keys`, releasing them on every exit path.
    pub async fn with_locks<F, Fut, T>(
        &self,
        keys: impl IntoIterator<Item = LockKey>,
        work: F,
    ) -> Result<T, ServiceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        with_locks(self.locks.clone(), self.config.lock_policy(), keys, work).await
    }

    /// Acquire a lock set the caller may extend before releasing it explicitly.
    pub async fn lock_set(
        &self,
        keys: impl IntoIterator<Item = LockKey>,
    ) -> Result<LockSet, ServiceError> {
        Ok(LockSet::acquire(self.locks.clone(), self.config.lock_policy(), keys).await?)
    }

    /// Obtain a handle to the current history store, if one is installed.
    pub async fn history_store(&self) -> Option<Arc<dyn HistoryStore>> {
        let guard = self.history.read().await;
        guard.as_ref().cloned()
    }

    /// Install a new history store implementation and leave degraded mode.
    pub async fn install_history_store(&self, store: Arc<dyn HistoryStore>) {
        {
            let mut guard = self.history.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false).await;
    }

    /// Remove the current history store and enter degraded mode.
    pub async fn clear_history_store(&self) {
        {
            let mut guard = self.history.write().await;
            guard.take();
        }
        self.update_degraded(true).await;
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub async fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::history_store::MemoryHistoryStore;

    #[tokio::test]
    async fn installing_history_store_leaves_degraded_mode() {
        let state = AppState::in_memory(AppConfig::default());
        assert!(state.is_degraded().await);

        state
            .install_history_store(Arc::new(MemoryHistoryStore::new()))
            .await;
        assert!(!state.is_degraded().await);
        assert!(state.history_store().await.is_some());

        state.clear_history_store().await;
        assert!(state.is_degraded().await);
        assert!(state.history_store().await.is_none());
    }

    #[tokio::test]
    async fn with_locks_leaves_nothing_held() {
        let state = AppState::in_memory(AppConfig::default());
        let value = state
            .with_locks(
                [
                    LockKey::Roster("123456".into()),
                    LockKey::Session("123456".into()),
                ],
                || async { Ok(7) },
            )
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(state.lock_manager().outstanding(), 0);
    }
}
