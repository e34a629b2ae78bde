//! Named, leased mutual exclusion plus the scoped lock set used by every mutating handler.

use std::{future::Future, sync::Arc, time::Duration};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::time::{Instant, sleep};
use tracing::warn;
use uuid::Uuid;

/// Errors raised while acquiring or releasing a lock.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// The lock is held by someone else and the retry budget ran out.
    #[error("lock `{name}` is currently held")]
    Unavailable {
        /// Lock name.
        name: String,
    },
    /// The lease was already gone (expired and taken over, or never held).
    #[error("lease on `{name}` is no longer held")]
    LeaseLost {
        /// Lock name.
        name: String,
    },
}

/// Token proving ownership of a named lock until `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    /// Lock name.
    pub name: String,
    /// Owner token checked on release.
    pub token: Uuid,
    /// End of the lease.
    pub expires_at: Instant,
}

/// Distributed-lock seam. Acquisition never queues: a held lock fails immediately.
pub trait LockManager: Send + Sync {
    /// Take `name` for `lease`, failing at once if it is held and unexpired.
    fn acquire(&self, name: &str, lease: Duration) -> BoxFuture<'static, Result<Lease, LockError>>;
    /// Give back a lease; fails when it expired and was taken over.
    fn release(&self, lease: Lease) -> BoxFuture<'static, Result<(), LockError>>;
    /// Number of leases currently live.
    fn outstanding(&self) -> usize;
}

/// Resources that can be locked, declared in their global acquisition order.
///
/// The derived ordering (session, then roster, then connection) is what [`LockSet`] sorts by.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockKey {
    /// `session:<code>`.
    Session(String),
    /// `roster:<code>`.
    Roster(String),
    /// `connection:<id>`.
    Connection(String),
}

impl LockKey {
    /// Lock name, identical to the ephemeral key the lock guards.
    pub fn name(&self) -> String {
        match self {
            LockKey::Session(code) => format!("session:{code}"),
            LockKey::Roster(code) => format!("roster:{code}"),
            LockKey::Connection(id) => format!("connection:{id}"),
        }
    }
}

/// Lease length and bounded retry budget applied when acquiring a [`LockSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    /// How long a lease lives before anyone may take it over.
    pub lease: Duration,
    /// Tries per key before giving up.
    pub attempts: u32,
    /// Pause between tries.
    pub retry_delay: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            lease: Duration::from_millis(5_000),
            attempts: 5,
            retry_delay: Duration::from_millis(20),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Holder {
    token: Uuid,
    expires_at: Instant,
}

/// In-process [`LockManager`]; expired leases can be taken over by the next caller.
#[derive(Clone, Default)]
pub struct MemoryLockManager {
    held: Arc<DashMap<String, Holder>>,
}

impl MemoryLockManager {
    /// Manager with nothing held.
    pub fn new() -> Self {
        Self::default()
    }
}

impl LockManager for MemoryLockManager {
    fn acquire(&self, name: &str, lease: Duration) -> BoxFuture<'static, Result<Lease, LockError>> {
        let now = Instant::now();
        let holder = Holder {
            token: Uuid::new_v4(),
            expires_at: now + lease,
        };

        let outcome = match self.held.entry(name.to_owned()) {
            Entry::Occupied(current) if current.get().expires_at > now => {
                Err(LockError::Unavailable {
                    name: name.to_owned(),
                })
            }
            Entry::Occupied(mut expired) => {
                warn!(lock = %name, "taking over expired lease");
                expired.insert(holder);
                Ok(())
            }
            Entry::Vacant(slot) => {
                slot.insert(holder);
                Ok(())
            }
        };

        let name = name.to_owned();
        Box::pin(async move {
            outcome.map(|()| Lease {
                name,
                token: holder.token,
                expires_at: holder.expires_at,
            })
        })
    }

    fn release(&self, lease: Lease) -> BoxFuture<'static, Result<(), LockError>> {
        let removed = self
            .held
            .remove_if(&lease.name, |_, holder| holder.token == lease.token);
        Box::pin(async move {
            match removed {
                Some(_) => Ok(()),
                None => Err(LockError::LeaseLost { name: lease.name }),
            }
        })
    }

    fn outstanding(&self) -> usize {
        let now = Instant::now();
        self.held
            .iter()
            .filter(|holder| holder.expires_at > now)
            .count()
    }
}

/// Set of leases acquired in global order and released together.
///
/// Prefer [`with_locks`]; a set dropped without [`LockSet::release`] hands its leases to a
/// background task so they never outlive the handler.
pub struct LockSet {
    manager: Arc<dyn LockManager>,
    policy: LockPolicy,
    held: Vec<(LockKey, Lease)>,
}

impl LockSet {
    /// Acquire every key in global order, releasing what was taken if any acquisition fails.
    pub async fn acquire(
        manager: Arc<dyn LockManager>,
        policy: LockPolicy,
        keys: impl IntoIterator<Item = LockKey>,
    ) -> Result<Self, LockError> {
        let mut set = Self {
            manager,
            policy,
            held: Vec::new(),
        };
        if let Err(err) = set.extend(keys).await {
            set.release().await;
            return Err(err);
        }
        Ok(set)
    }

    /// Acquire additional keys. They must all order after the keys already held.
    pub async fn extend(&mut self, keys: impl IntoIterator<Item = LockKey>) -> Result<(), LockError> {
        let mut keys: Vec<LockKey> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();

        for key in keys {
            if self.held.iter().any(|(held, _)| *held == key) {
                continue;
            }
            debug_assert!(
                self.held.last().is_none_or(|(last, _)| *last < key),
                "lock `{}` acquired out of order",
                key.name()
            );
            let lease = acquire_with_retry(self.manager.as_ref(), &key.name(), &self.policy).await?;
            self.held.push((key, lease));
        }
        Ok(())
    }

    /// Release every lease in reverse acquisition order.
    pub async fn release(mut self) {
        let held = std::mem::take(&mut self.held);
        for (_, lease) in held.into_iter().rev() {
            let name = lease.name.clone();
            if let Err(err) = self.manager.release(lease).await {
                warn!(lock = %name, error = %err, "failed to release lock");
            }
        }
    }
}

impl Drop for LockSet {
    fn drop(&mut self) {
        if self.held.is_empty() {
            return;
        }

        let held = std::mem::take(&mut self.held);
        let manager = self.manager.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    for (_, lease) in held.into_iter().rev() {
                        let _ = manager.release(lease).await;
                    }
                });
            }
            Err(_) => warn!(
                count = held.len(),
                "lock set dropped outside a runtime; leases will expire on their own"
            ),
        }
    }
}

async fn acquire_with_retry(
    manager: &dyn LockManager,
    name: &str,
    policy: &LockPolicy,
) -> Result<Lease, LockError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match manager.acquire(name, policy.lease).await {
            Ok(lease) => return Ok(lease),
            Err(LockError::Unavailable { .. }) if attempt < policy.attempts.max(1) => {
                sleep(policy.retry_delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Run `work` while holding every lock in `keys`, releasing them on every exit path.
pub async fn with_locks<F, Fut, T, E>(
    manager: Arc<dyn LockManager>,
    policy: LockPolicy,
    keys: impl IntoIterator<Item = LockKey>,
    work: F,
) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<LockError>,
{
    let locks = LockSet::acquire(manager, policy, keys).await?;
    let outcome = work().await;
    locks.release().await;
    outcome
}
