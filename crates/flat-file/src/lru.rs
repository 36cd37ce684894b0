// flat-file/src/lru.rs

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// LRU cache with a separately locked recency list.
///
/// Membership changes need `&mut self`, so they happen under the caller's
/// exclusive lock. Promotion only needs `&self`: a reader holding the
/// caller's shared lock can still `touch` an entry, which takes the inner
/// recency lock.
pub struct LruCache<K, V> {
    entries: HashMap<K, V>,
    /// Most recently used at the front
    recency: Mutex<VecDeque<K>>,
    capacity: usize,
}

impl<K: Clone + Hash + Eq, V> LruCache<K, V> {
    /// Create a cache holding at most `capacity` entries (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: HashMap::with_capacity(capacity),
            recency: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Look up an entry without changing its recency
    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    /// Mark `key` as most recently used
    pub fn touch(&self, key: &K) {
        if !self.entries.contains_key(key) {
            return;
        }
        let mut recency = self.recency.lock();
        promote(&mut recency, key);
    }

    /// Insert `key` as most recently used.
    ///
    /// When the cache is full, the least recently used entry is removed
    /// first and handed back so the caller can release it. Replacing an
    /// existing key hands back the previous value instead.
    pub fn insert_evicting_if_full(&mut self, key: K, value: V) -> Option<(K, V)> {
        let recency = self.recency.get_mut();

        if let Some(previous) = self.entries.insert(key.clone(), value) {
            promote(recency, &key);
            return Some((key, previous));
        }

        let mut evicted = None;
        if self.entries.len() > self.capacity {
            if let Some(oldest) = recency.pop_back() {
                evicted = self.entries.remove(&oldest).map(|value| (oldest, value));
            }
        }

        recency.push_front(key);
        evicted
    }

    /// Remove the least recently used entry if the cache is full, so the
    /// next insert does not have to evict
    pub fn evict_if_full(&mut self) -> Option<(K, V)> {
        if self.entries.len() < self.capacity {
            return None;
        }
        let oldest = self.recency.get_mut().pop_back()?;
        self.entries.remove(&oldest).map(|value| (oldest, value))
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let value = self.entries.remove(key)?;
        self.recency.get_mut().retain(|k| k != key);
        Some(value)
    }

    /// Remove every entry whose key matches `predicate`
    pub fn remove_if<P>(&mut self, mut predicate: P) -> Vec<(K, V)>
    where
        P: FnMut(&K) -> bool,
    {
        let keys: Vec<K> = self.entries.keys().filter(|k| predicate(k)).cloned().collect();
        keys.into_iter()
            .filter_map(|key| self.remove(&key).map(|value| (key, value)))
            .collect()
    }

    /// Remove every entry
    pub fn drain(&mut self) -> Vec<(K, V)> {
        self.recency.get_mut().clear();
        self.entries.drain().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn promote<K: PartialEq + Clone>(recency: &mut VecDeque<K>, key: &K) {
    if recency.front() == Some(key) {
        return;
    }
    recency.retain(|k| k != key);
    recency.push_front(key.clone());
}
