//! Time- and size-bounded association store
//!
//! [`TimedStore`] holds the transient per-peer state of every pairing stage:
//! public keys waiting for the second ECDH call, and completed exchanges
//! waiting for human verification and certificate issuance.
//!
//! Two bounds are enforced on every access rather than by a background sweep:
//!
//! - **TTL**: an entry older than the configured TTL is evicted
//! - **Capacity**: past the configured capacity the oldest entries (by
//!   insertion order, not by access) are evicted
//!
//! Reads never refresh an entry's timestamp. Re-inserting a key replaces the
//! entry, gives it a fresh timestamp and makes it the newest entry.
//!
//! # Atomic sequences
//!
//! Single operations lock internally. Callers that need a check-then-act
//! sequence (read and delete, else reject) hold a [`StoreGuard`] from
//! [`TimedStore::lock`] for the duration of the critical section:
//!
//! ```
//! use std::time::Duration;
//! use masc_pairing::store::TimedStore;
//!
//! let store: TimedStore<String, u32> = TimedStore::new(Duration::from_secs(60), 4);
//! store.set("peer".to_string(), 7);
//!
//! let mut guard = store.lock();
//! let value = guard.take(&"peer".to_string());
//! assert_eq!(value, Some(7));
//! assert!(!guard.contains(&"peer".to_string()));
//! ```

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use tracing::trace;

/// Source of "now" for TTL accounting
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> Instant;
}

/// Clock backed by [`Instant::now`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock
///
/// Clones share the same instant, so a test can hand one clone to a store
/// and keep another to move time forward.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    /// Create a clock frozen at the current instant
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

/// A value and the instant it was inserted
struct TimedEntry<V> {
    value: V,
    inserted_at: Instant,
}

/// Backing storage. `order` lists keys oldest first and always holds exactly
/// the keys of `map`; timestamps are nondecreasing along it.
struct Entries<K, V> {
    map: HashMap<K, TimedEntry<V>>,
    order: VecDeque<K>,
}

impl<K: Eq + Hash + Clone, V> Entries<K, V> {
    fn new() -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        let entry = self.map.remove(key)?;
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        Some(entry.value)
    }

    fn evict_expired(&mut self, now: Instant, ttl: Duration) {
        while let Some(oldest) = self.order.front() {
            let expired = self
                .map
                .get(oldest)
                .map(|e| now.saturating_duration_since(e.inserted_at) > ttl)
                .unwrap_or(true);
            if !expired {
                break;
            }
            if let Some(key) = self.order.pop_front() {
                self.map.remove(&key);
            }
        }
    }

    fn evict_over(&mut self, limit: usize) {
        let mut evicted = 0usize;
        while self.map.len() > limit {
            match self.order.pop_front() {
                Some(key) => {
                    self.map.remove(&key);
                    evicted += 1;
                }
                None => break,
            }
        }
        if evicted > 0 {
            trace!(evicted, limit, "evicted oldest entries over capacity");
        }
    }
}

/// Concurrent key-value store bounded by entry age and entry count
pub struct TimedStore<K, V> {
    entries: Mutex<Entries<K, V>>,
    ttl: Duration,
    capacity: usize,
    clock: Arc<dyn Clock>,
}

impl<K, V> TimedStore<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create a store using the system clock
    ///
    /// A capacity of zero is treated as one.
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self::with_clock(ttl, capacity, Arc::new(SystemClock))
    }

    /// Create a store using the given clock
    pub fn with_clock(ttl: Duration, capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(Entries::new()),
            ttl,
            capacity: capacity.max(1),
            clock,
        }
    }

    /// Entry time-to-live
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Maximum number of live entries
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Acquire exclusive access for a multi-step critical section
    pub fn lock(&self) -> StoreGuard<'_, K, V> {
        StoreGuard {
            entries: self.entries.lock(),
            ttl: self.ttl,
            capacity: self.capacity,
            clock: self.clock.as_ref(),
        }
    }

    /// Insert or overwrite `key` with a fresh timestamp
    pub fn set(&self, key: K, value: V) {
        self.lock().set(key, value);
    }

    /// Remove `key`, returning its value, or `None` if it was absent or expired
    pub fn delete(&self, key: &K) -> Option<V> {
        self.lock().delete(key)
    }

    /// Read and remove a live entry in one critical section
    pub fn take(&self, key: &K) -> Option<V> {
        self.lock().take(key)
    }

    /// Whether a live entry exists for `key`
    pub fn contains(&self, key: &K) -> bool {
        self.lock().contains(key)
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the store holds no live entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> TimedStore<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Read a live entry, or `None` if absent or expired
    pub fn get(&self, key: &K) -> Option<V> {
        self.lock().get(key).cloned()
    }
}

impl<K, V> fmt::Debug for TimedStore<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimedStore")
            .field("ttl", &self.ttl)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

/// Exclusive access to a [`TimedStore`]
///
/// Every operation on the guard applies the TTL and capacity bounds exactly
/// as the store's own methods do. Dropping the guard releases the lock.
pub struct StoreGuard<'a, K, V> {
    entries: MutexGuard<'a, Entries<K, V>>,
    ttl: Duration,
    capacity: usize,
    clock: &'a dyn Clock,
}

impl<K, V> StoreGuard<'_, K, V>
where
    K: Eq + Hash + Clone,
{
    fn evict(&mut self, limit: usize) {
        let now = self.clock.now();
        self.entries.evict_expired(now, self.ttl);
        self.entries.evict_over(limit);
    }

    /// Insert or overwrite `key` with a fresh timestamp
    ///
    /// Makes room for one more entry first, unless `key` is already present:
    /// overwriting never evicts the entry being overwritten.
    pub fn set(&mut self, key: K, value: V) {
        let now = self.clock.now();
        self.entries.evict_expired(now, self.ttl);

        if self.entries.map.contains_key(&key) {
            self.entries.remove(&key);
        }
        self.entries.evict_over(self.capacity - 1);

        self.entries.order.push_back(key.clone());
        self.entries.map.insert(
            key,
            TimedEntry {
                value,
                inserted_at: now,
            },
        );
    }

    /// Read a live entry, or `None` if absent or expired
    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.evict(self.capacity);
        self.entries.map.get(key).map(|e| &e.value)
    }

    /// Remove `key`, returning its value, or `None` if it was absent or expired
    pub fn delete(&mut self, key: &K) -> Option<V> {
        self.evict(self.capacity);
        self.entries.remove(key)
    }

    /// Read and remove a live entry
    pub fn take(&mut self, key: &K) -> Option<V> {
        self.evict(self.capacity);
        self.entries.remove(key)
    }

    /// Whether a live entry exists for `key`
    pub fn contains(&mut self, key: &K) -> bool {
        self.evict(self.capacity);
        self.entries.map.contains_key(key)
    }

    /// Number of live entries
    pub fn len(&mut self) -> usize {
        self.evict(self.capacity);
        self.entries.map.len()
    }

    /// Whether no live entries remain
    pub fn is_empty(&mut self) -> bool {
        self.len() == 0
    }
}
