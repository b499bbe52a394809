//! Per-key async mutexes.
//!
//! Mutations of one message (or one thread) must not interleave, while
//! mutations of different keys run freely. A slot is created on first use and
//! dropped again once nobody holds or waits for it.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Default)]
struct Slot {
    mutex: Arc<AsyncMutex<()>>,
    /// Holders plus waiters.
    users: usize,
}

type Slots<K> = Arc<Mutex<HashMap<K, Slot>>>;

/// A set of async mutexes addressed by key.
#[derive(Debug)]
pub struct KeyedLocks<K> {
    slots: Slots<K>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    /// Create an empty lock set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    ///
    /// Dropping the returned future while it waits gives up its claim on the
    /// slot, so abandoned waiters do not keep keys alive.
    pub async fn lock(&self, key: K) -> KeyGuard<K> {
        let (lease, mutex) = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            let slot = slots.entry(key.clone()).or_default();
            slot.users = slot.users.saturating_add(1);
            let mutex = Arc::clone(&slot.mutex);
            (
                Lease {
                    key,
                    slots: Arc::clone(&self.slots),
                },
                mutex,
            )
        };
        let guard = mutex.lock_owned().await;
        KeyGuard {
            _guard: guard,
            _lease: lease,
        }
    }

    /// Number of keys currently held or awaited.
    pub fn active(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// One holder's or waiter's claim on a slot.
#[derive(Debug)]
struct Lease<K: Eq + Hash> {
    key: K,
    slots: Slots<K>,
}

impl<K: Eq + Hash> Drop for Lease<K> {
    fn drop(&mut self) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = slots.get_mut(&self.key) {
            slot.users = slot.users.saturating_sub(1);
            if slot.users == 0 {
                slots.remove(&self.key);
            }
        }
    }
}

/// Exclusive access to one key; released on drop.
#[derive(Debug)]
pub struct KeyGuard<K: Eq + Hash> {
    // Declared first so the mutex is released before the lease.
    _guard: OwnedMutexGuard<()>,
    _lease: Lease<K>,
}
