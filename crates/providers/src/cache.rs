//! Fixed-capacity LRU cache.

use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::Mutex;

struct Slot<V> {
    value: V,
    last_used: u64,
}

struct Inner<K, V> {
    slots: HashMap<K, Slot<V>>,
    tick: u64,
}

/// A process-owned cache holding at most `capacity` entries. Inserting
/// into a full cache evicts the least recently used entry and returns it.
pub struct BoundedCache<K, V> {
    capacity: usize,
    inner: Mutex<Inner<K, V>>,
}

impl<K: Eq + Hash + Clone, V: Clone> BoundedCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner { slots: HashMap::new(), tick: 0 }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up `key`, marking it most recently used.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        inner.tick += 1;
        let tick = inner.tick;
        let slot = inner.slots.get_mut(key)?;
        slot.last_used = tick;
        Some(slot.value.clone())
    }

    /// Insert or replace `key`. Returns the evicted entry, if any.
    pub fn insert(&self, key: K, value: V) -> Option<(K, V)> {
        let mut inner = self.inner.lock();
        inner.tick += 1;
        let tick = inner.tick;

        let mut evicted = None;
        if !inner.slots.contains_key(&key) && inner.slots.len() >= self.capacity {
            let oldest = inner
                .slots
                .iter()
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                evicted = inner.slots.remove(&oldest).map(|slot| (oldest, slot.value));
            }
        }
        inner.slots.insert(key, Slot { value, last_used: tick });
        evicted
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.lock().slots.remove(key).map(|slot| slot.value)
    }

    /// Keep only entries whose key satisfies `keep`. Returns how many
    /// were dropped.
    pub fn retain_keys(&self, mut keep: impl FnMut(&K) -> bool) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.slots.len();
        inner.slots.retain(|k, _| keep(k));
        before - inner.slots.len()
    }
}
