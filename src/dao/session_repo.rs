//! Typed access to the records kept in the ephemeral store.

use std::{sync::Arc, time::Duration};

use serde::{Serialize, de::DeserializeOwned};

use crate::{
    dao::{
        ephemeral::EphemeralStore,
        storage::{StorageError, StorageResult},
    },
    state::session::{ConnectionBinding, GameSession, PendingAnswer, Player},
};

/// Key of the session record.
pub fn session_key(code: &str) -> String {
    format!("session:{code}")
}

/// Key of the roster list.
pub fn roster_key(code: &str) -> String {
    format!("roster:{code}")
}

/// Key of a connection binding.
pub fn binding_key(connection_id: &str) -> String {
    format!("connection:{connection_id}")
}

/// Key of a pending answer.
pub fn pending_key(code: &str, connection_id: &str) -> String {
    format!("answer:{code}:{connection_id}")
}

/// Session, roster, binding and pending-answer records encoded as JSON.
///
/// Every write refreshes the record TTL. Callers hold the matching locks for read-modify-write.
#[derive(Clone)]
pub struct SessionRepository {
    store: Arc<dyn EphemeralStore>,
    ttl: Duration,
}

impl SessionRepository {
    /// Repository writing records with `ttl`.
    pub fn new(store: Arc<dyn EphemeralStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Session under `code`, if live.
    pub async fn load_session(&self, code: &str) -> StorageResult<Option<GameSession>> {
        self.get_json(&session_key(code)).await
    }

    /// Write the session under its own code.
    pub async fn save_session(&self, session: &GameSession) -> StorageResult<()> {
        self.set_json(&session_key(&session.code), session).await
    }

    /// Whether a session record exists under `code`.
    pub async fn session_exists(&self, code: &str) -> StorageResult<bool> {
        Ok(self.store.get(&session_key(code)).await?.is_some())
    }

    /// Roster in join order; a missing roster reads as empty.
    pub async fn load_roster(&self, code: &str) -> StorageResult<Vec<Player>> {
        Ok(self.get_json(&roster_key(code)).await?.unwrap_or_default())
    }

    /// Replace the roster of `code`.
    pub async fn save_roster(&self, code: &str, players: &[Player]) -> StorageResult<()> {
        self.set_json(&roster_key(code), &players).await
    }

    /// Binding of `connection_id`, if any.
    pub async fn load_binding(&self, connection_id: &str) -> StorageResult<Option<ConnectionBinding>> {
        self.get_json(&binding_key(connection_id)).await
    }

    /// Bind `connection_id` to a session.
    pub async fn save_binding(
        &self,
        connection_id: &str,
        binding: &ConnectionBinding,
    ) -> StorageResult<()> {
        self.set_json(&binding_key(connection_id), binding).await
    }

    /// Forget the binding of `connection_id`.
    pub async fn delete_binding(&self, connection_id: &str) -> StorageResult<()> {
        self.store.delete(&binding_key(connection_id)).await
    }

    /// Pending answer of `connection_id` in `code`.
    pub async fn load_pending(
        &self,
        code: &str,
        connection_id: &str,
    ) -> StorageResult<Option<PendingAnswer>> {
        self.get_json(&pending_key(code, connection_id)).await
    }

    /// Store a pending answer.
    pub async fn save_pending(
        &self,
        code: &str,
        connection_id: &str,
        pending: &PendingAnswer,
    ) -> StorageResult<()> {
        self.set_json(&pending_key(code, connection_id), pending).await
    }

    /// Drop a pending answer.
    pub async fn delete_pending(&self, code: &str, connection_id: &str) -> StorageResult<()> {
        self.store.delete(&pending_key(code, connection_id)).await
    }

    /// Connection ids holding a pending answer in session `code`.
    pub async fn pending_connections(&self, code: &str) -> StorageResult<Vec<String>> {
        let prefix = pending_key(code, "");
        let keys = self.store.scan_prefix(&prefix).await?;
        Ok(keys
            .into_iter()
            .filter_map(|key| key.strip_prefix(&prefix).map(str::to_owned))
            .collect())
    }

    /// Delete the session record, its roster and every pending answer.
    pub async fn purge_session(&self, code: &str) -> StorageResult<()> {
        for connection_id in self.pending_connections(code).await? {
            self.delete_pending(code, &connection_id).await?;
        }
        self.store.delete(&roster_key(code)).await?;
        self.store.delete(&session_key(code)).await
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> StorageResult<Option<T>> {
        let Some(raw) = self.store.get(key).await? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StorageError::Corrupt {
                key: key.to_owned(),
                source,
            })
    }

    async fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StorageResult<()> {
        let raw = serde_json::to_string(value).map_err(|source| StorageError::Corrupt {
            key: key.to_owned(),
            source,
        })?;
        self.store.set(key, raw, Some(self.ttl)).await
    }
}
