//! Fixed-shard concurrent map
//!
//! Storage is divided into a fixed number of substorages selected by the
//! low-order bits of the key, so lookup and update never need a global
//! lock, only their shard's reader-writer lock.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

use crate::error::RegistryError;

/// Shard index mask (4 bits)
pub const SHARD_MASK: u64 = 0b1111;

/// Number of shards
pub const SHARD_COUNT: usize = (SHARD_MASK + 1) as usize;

/// Keys that map themselves onto a shard index
///
/// The shard index must be stable and derived from the key's low-order
/// bits (after hashing, for keys without meaningful low bits).
pub trait ShardKey: Eq + Hash + Clone {
    /// Shard index in `0..SHARD_COUNT`
    fn shard(&self) -> usize;
}

impl ShardKey for u32 {
    fn shard(&self) -> usize {
        (u64::from(*self) & SHARD_MASK) as usize
    }
}

impl ShardKey for Ipv4Addr {
    fn shard(&self) -> usize {
        u32::from(*self).shard()
    }
}

impl ShardKey for String {
    fn shard(&self) -> usize {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        (hasher.finish() & SHARD_MASK) as usize
    }
}

/// Sharded concurrent map with a fixed entry capacity
///
/// Values are handed out by clone, so `V` is typically an `Arc<..>`.
#[derive(Debug)]
pub struct ShardedMap<K: ShardKey, V: Clone> {
    shards: Vec<RwLock<HashMap<K, V>>>,
    /// Total entries across shards; kept separately so the capacity check
    /// never has to touch another shard's lock
    entries: AtomicUsize,
    max_entries: usize,
}

impl<K: ShardKey, V: Clone> ShardedMap<K, V> {
    /// Create a map capped at `max_entries` total entries
    ///
    /// The cap bounds memory under flood conditions; hitting it surfaces
    /// as [`RegistryError::CapacityExhausted`] from `lookup_or_create`,
    /// which the packet path turns into a dropped packet.
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect(),
            entries: AtomicUsize::new(0),
            max_entries: max_entries.max(1),
        }
    }

    /// Look up an entry
    #[must_use]
    pub fn lookup(&self, key: &K) -> Option<V> {
        self.shards[key.shard()].read().get(key).cloned()
    }

    /// Look up an entry, creating it with `factory` on miss
    ///
    /// Atomic with respect to concurrent creators of the same key: the
    /// factory runs under the shard's write lock after a double-check, so
    /// exactly one value is ever created per key. Returns `(value, created)`.
    pub fn lookup_or_create(
        &self,
        key: K,
        factory: impl FnOnce() -> V,
    ) -> Result<(V, bool), RegistryError> {
        self.lookup_or_create_with(key, factory, |_| {})
    }

    /// `lookup_or_create` with a visitor run on the resolved entry while
    /// its shard lock is still held
    ///
    /// Side effects that must be ordered against a concurrent
    /// [`Self::remove_if`] of the same key (reference counting, most
    /// notably) belong in `visit`, not after the call returns.
    pub fn lookup_or_create_with(
        &self,
        key: K,
        factory: impl FnOnce() -> V,
        visit: impl FnOnce(&V),
    ) -> Result<(V, bool), RegistryError> {
        let shard = &self.shards[key.shard()];

        {
            let guard = shard.read();
            if let Some(existing) = guard.get(&key) {
                visit(existing);
                return Ok((existing.clone(), false));
            }
        }

        let mut guard = shard.write();
        if let Some(existing) = guard.get(&key) {
            visit(existing);
            return Ok((existing.clone(), false));
        }

        let current = self.entries.load(Ordering::Relaxed);
        if current >= self.max_entries {
            return Err(RegistryError::CapacityExhausted {
                current,
                max: self.max_entries,
            });
        }

        let value = factory();
        visit(&value);
        guard.insert(key, value.clone());
        self.entries.fetch_add(1, Ordering::Relaxed);
        Ok((value, true))
    }

    /// Remove an entry, returning it if present
    pub fn remove(&self, key: &K) -> Option<V> {
        let removed = self.shards[key.shard()].write().remove(key);
        if removed.is_some() {
            self.entries.fetch_sub(1, Ordering::Relaxed);
        }
        removed
    }

    /// Remove an entry when `predicate` approves, evaluated under the
    /// shard's write lock
    ///
    /// The predicate serializes on the same lock as `lookup_or_create_with`
    /// visitors, so a removal decided here cannot interleave with a
    /// concurrent reference to the same entry.
    pub fn remove_if(&self, key: &K, predicate: impl FnOnce(&V) -> bool) -> Option<V> {
        let mut guard = self.shards[key.shard()].write();
        if guard.get(key).is_some_and(predicate) {
            self.entries.fetch_sub(1, Ordering::Relaxed);
            guard.remove(key)
        } else {
            None
        }
    }

    /// Visit every entry in one shard under its read lock
    ///
    /// The callback must not call back into this map for the same shard.
    pub fn for_each_in_shard(&self, shard: usize, mut f: impl FnMut(&K, &V)) {
        for (k, v) in self.shards[shard].read().iter() {
            f(k, v);
        }
    }

    /// Collect a snapshot of one shard's values
    #[must_use]
    pub fn collect_shard(&self, shard: usize) -> Vec<(K, V)> {
        self.shards[shard]
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Total entry count across all shards
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.load(Ordering::Relaxed)
    }

    /// Whether the map holds no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn raw_shard(&self, shard: usize) -> &RwLock<HashMap<K, V>> {
        &self.shards[shard]
    }
}
