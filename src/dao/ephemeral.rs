//! Key/value store with per-entry expiry holding every piece of live game state.

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::debug;

use crate::dao::storage::StorageResult;

/// Abstraction over the ephemeral store backing sessions, rosters and connection bindings.
///
/// A missing key is a normal outcome (expired or never written), never an error. No atomicity is
/// offered across keys; read-modify-write spans must be guarded by the lock manager.
pub trait EphemeralStore: Send + Sync {
    /// Value under `key`, or `None` when missing or expired.
    fn get(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<String>>>;
    /// Write `value`, expiring it after `ttl` when given.
    fn set(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Remove `key`; removing a missing key succeeds.
    fn delete(&self, key: &str) -> BoxFuture<'static, StorageResult<()>>;
    /// Live keys starting with `prefix`.
    fn scan_prefix(&self, prefix: &str) -> BoxFuture<'static, StorageResult<Vec<String>>>;
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|deadline| deadline > now)
    }
}

/// In-process [`EphemeralStore`] backed by a concurrent hash map.
///
/// Expired entries are hidden on read and purged by [`MemoryStore::spawn_sweeper`].
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, Entry>>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Periodically drop expired entries until the store itself is dropped.
    pub fn spawn_sweeper(&self, every: Duration) {
        let weak: Weak<DashMap<String, Entry>> = Arc::downgrade(&self.entries);
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                let Some(entries) = weak.upgrade() else {
                    break;
                };

                let now = Instant::now();
                let before = entries.len();
                entries.retain(|_, entry| entry.is_live(now));
                let purged = before.saturating_sub(entries.len());
                if purged > 0 {
                    debug!(purged, "swept expired ephemeral entries");
                }
            }
        });
    }

    fn read(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let live = self
            .entries
            .get(key)
            .map(|entry| entry.is_live(now).then(|| entry.value.clone()));

        match live {
            Some(Some(value)) => Some(value),
            Some(None) => {
                self.entries.remove_if(key, |_, entry| !entry.is_live(now));
                None
            }
            None => None,
        }
    }
}

impl EphemeralStore for MemoryStore {
    fn get(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<String>>> {
        let value = self.read(key);
        Box::pin(async move { Ok(value) })
    }

    fn set(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let entry = Entry {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.entries.insert(key.to_owned(), entry);
        Box::pin(async { Ok(()) })
    }

    fn delete(&self, key: &str) -> BoxFuture<'static, StorageResult<()>> {
        self.entries.remove(key);
        Box::pin(async { Ok(()) })
    }

    fn scan_prefix(&self, prefix: &str) -> BoxFuture<'static, StorageResult<Vec<String>>> {
        let now = Instant::now();
        let keys = self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix) && entry.value().is_live(now))
            .map(|entry| entry.key().clone())
            .collect();
        Box::pin(async move { Ok(keys) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_key_reads_as_none() {
        let store = MemoryStore::new();
        assert_eq!(store.get("session:000000").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_then_delete() {
        let store = MemoryStore::new();
        store.set("roster:1", "[]".into(), None).await.unwrap();
        assert_eq!(store.get("roster:1").await.unwrap().as_deref(), Some("[]"));

        store.delete("roster:1").await.unwrap();
        assert_eq!(store.get("roster:1").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let store = MemoryStore::new();
        store
            .set("session:1", "{}".into(), Some(Duration::from_secs(10)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(store.get("session:1").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.get("session:1").await.unwrap().is_none());
        assert!(store.scan_prefix("session:").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn scan_prefix_only_returns_matching_keys() {
        let store = MemoryStore::new();
        store.set("session:1", "{}".into(), None).await.unwrap();
        store.set("session:2", "{}".into(), None).await.unwrap();
        store.set("roster:1", "[]".into(), None).await.unwrap();

        let mut keys = store.scan_prefix("session:").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["session:1".to_string(), "session:2".to_string()]);
    }
}
