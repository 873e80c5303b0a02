//! Named async locks, created on first use and dropped once idle.
//!
//! Used to serialize check-then-write sequences that storage cannot make
//! atomic on its own: counting a board-month's cards before inserting a
//! coded card, and counting a stage's cards before placing one in it.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

type LockMap = DashMap<String, Arc<Mutex<()>>>;

#[derive(Clone, Default)]
pub struct KeyedLocks {
    locks: Arc<LockMap>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for the lock named `key`. It stays held until the guard drops.
    pub async fn acquire(&self, key: impl Into<String>) -> KeyedGuard {
        let key = key.into();
        // The map's shard lock is released at the end of this statement,
        // before awaiting the mutex.
        let lock = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        let guard = lock.lock_owned().await;
        debug!(key = %key, "acquired keyed lock");
        KeyedGuard {
            key,
            guard: Some(guard),
            locks: self.locks.clone(),
        }
    }

    /// Number of locks currently held or waited on.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Holds a named lock. Dropping it releases the lock and forgets the name
/// when nobody else is holding or waiting for it.
pub struct KeyedGuard {
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockMap>,
}

impl KeyedGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters keep their own clone, so a count of one means only the
        // map refers to the lock.
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl std::fmt::Debug for KeyedGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedGuard").field("key", &self.key).finish()
    }
}
