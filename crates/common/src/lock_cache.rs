//! Bounded key → lock table.
//!
//! Every key maps to one async mutex for as long as the key is resident.
//! The table holds at most `capacity` keys and evicts the least recently
//! used one when a new key would exceed that. A key whose lock is still
//! referenced outside the table (held, or awaited) is never evicted:
//! replacing it would hand a second, unrelated lock to the next caller and
//! break mutual exclusion for that key. When every resident key is in use
//! the table overflows temporarily and shrinks again as locks are released.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;

use crate::error::LockError;

/// A per-key lock handed out by [`LockCache`].
pub type KeyLock = Arc<tokio::sync::Mutex<()>>;

/// Exclusive access to one key. Released on drop.
#[derive(Debug)]
pub struct KeyGuard {
    _guard: OwnedMutexGuard<()>,
}

struct Slot {
    lock: KeyLock,
    tick: u64,
}

struct Entries<K> {
    slots: HashMap<K, Slot>,
    recency: BTreeMap<u64, K>,
    tick: u64,
}

/// Fixed-capacity associative lock cache with reference-aware LRU eviction.
pub struct LockCache<K> {
    name: &'static str,
    capacity: NonZeroUsize,
    entries: Mutex<Entries<K>>,
}

impl<K> LockCache<K>
where
    K: Eq + Hash + Clone + Display,
{
    /// Creates an empty cache. `name` labels log lines and metrics.
    pub fn new(name: &'static str, capacity: NonZeroUsize) -> Self {
        Self {
            name,
            capacity,
            entries: Mutex::new(Entries {
                slots: HashMap::with_capacity(capacity.get()),
                recency: BTreeMap::new(),
                tick: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Number of resident keys. May exceed the capacity while every key is in use.
    pub fn len(&self) -> usize {
        self.entries.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.lock().slots.contains_key(key)
    }

    /// Returns the lock for `key`, creating it if the key is not resident.
    ///
    /// Repeated calls return the same lock while the key stays resident.
    pub fn lock_for(&self, key: &K) -> KeyLock {
        let mut guard = self.entries.lock();
        let entries = &mut *guard;
        entries.tick += 1;
        let tick = entries.tick;

        let lock = match entries.slots.get_mut(key) {
            Some(slot) => {
                let previous = std::mem::replace(&mut slot.tick, tick);
                let lock = Arc::clone(&slot.lock);
                entries.recency.remove(&previous);
                lock
            }
            None => {
                let lock = KeyLock::default();
                entries.slots.insert(
                    key.clone(),
                    Slot {
                        lock: Arc::clone(&lock),
                        tick,
                    },
                );
                lock
            }
        };
        entries.recency.insert(tick, key.clone());

        self.shrink(entries, key);
        lock
    }

    /// Waits up to `timeout` for exclusive access to `key`.
    pub async fn acquire(&self, key: &K, timeout: Duration) -> Result<KeyGuard, LockError> {
        let lock = self.lock_for(key);
        match tokio::time::timeout(timeout, lock.lock_owned()).await {
            Ok(guard) => Ok(KeyGuard { _guard: guard }),
            Err(_) => {
                metrics::counter!("lock_timeouts_total", "cache" => self.name).increment(1);
                tracing::warn!(cache = self.name, %key, ?timeout, "lock acquisition timed out");
                Err(LockError::Timeout {
                    resource: format!("{}:{key}", self.name),
                    timeout,
                })
            }
        }
    }

    /// Evicts least recently used, unreferenced keys until the cache fits.
    /// `current` is the key being handed out and is never evicted.
    fn shrink(&self, entries: &mut Entries<K>, current: &K) {
        if entries.slots.len() <= self.capacity.get() {
            return;
        }

        let excess = entries.slots.len() - self.capacity.get();
        let victims: Vec<(u64, K)> = entries
            .recency
            .iter()
            .filter(|(_, key)| *key != current)
            .filter(|(_, key)| {
                entries
                    .slots
                    .get(*key)
                    .is_some_and(|slot| Arc::strong_count(&slot.lock) == 1)
            })
            .take(excess)
            .map(|(tick, key)| (*tick, key.clone()))
            .collect();

        for (tick, key) in &victims {
            entries.recency.remove(tick);
            entries.slots.remove(key);
        }
        if !victims.is_empty() {
            metrics::counter!("lock_cache_evictions_total", "cache" => self.name)
                .increment(victims.len() as u64);
        }

        if entries.slots.len() > self.capacity.get() {
            metrics::counter!("lock_cache_overflow_total", "cache" => self.name).increment(1);
            tracing::warn!(
                cache = self.name,
                resident = entries.slots.len(),
                capacity = self.capacity.get(),
                "every resident lock is in use, cache exceeds its capacity"
            );
        }
    }
}

impl<K> std::fmt::Debug for LockCache<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockCache")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("resident", &self.entries.lock().slots.len())
            .finish()
    }
}
