//! Per-series mutual exclusion.
//!
//! Live collection, backfill, and signal-state updates for one series all run
//! behind that series' lock. Distinct series never contend.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use chokepoint_core::SeriesKey;

/// Held while a job owns its series. Released on drop.
pub type KeyGuard = OwnedMutexGuard<()>;

#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<SeriesKey, Arc<AsyncMutex<()>>>>,
}

impl KeyLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, key: &SeriesKey) -> Arc<AsyncMutex<()>> {
        self.locks
            .lock()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Acquires `key` without waiting. `None` if another job holds it.
    #[must_use]
    pub fn try_acquire(&self, key: &SeriesKey) -> Option<KeyGuard> {
        self.lock_for(key).try_lock_owned().ok()
    }

    /// Waits until `key` is free.
    pub async fn acquire(&self, key: &SeriesKey) -> KeyGuard {
        self.lock_for(key).lock_owned().await
    }

    #[must_use]
    pub fn is_held(&self, key: &SeriesKey) -> bool {
        self.lock_for(key).try_lock().is_err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_acquire_is_exclusive_per_key() {
        let locks = KeyLocks::new();
        let a = SeriesKey::new("suez-canal", "a");
        let b = SeriesKey::new("suez-canal", "b");

        let guard = locks.try_acquire(&a).unwrap();
        assert!(locks.try_acquire(&a).is_none());
        assert!(locks.is_held(&a));
        // unrelated key is unaffected
        assert!(locks.try_acquire(&b).is_some());

        drop(guard);
        assert!(locks.try_acquire(&a).is_some());
    }

    #[tokio::test]
    async fn test_acquire_waits_for_release() {
        let locks = Arc::new(KeyLocks::new());
        let key = SeriesKey::new("suez-canal", "a");
        let guard = locks.try_acquire(&key).unwrap();

        let waiter = {
            let locks = Arc::clone(&locks);
            let key = key.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(&key).await;
            })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
        assert!(!locks.is_held(&key));
    }
}
