//! In-memory `K -> V` mapping shared by the [`Cache`](crate::Cache) and its
//! workers.
//!
//! Deliberately narrow: no cursor pagination, no random sampling, no cost
//! accounting -- nothing here does range scans or eviction by size. Values
//! are present iff the most recent computation for a key succeeded and the
//! entry has not since expired; the `Store` itself knows nothing about TTLs
//! or workers, only about `put`/`get`/`delete`/`contains_key`.

use std::hash::Hash;

use dashmap::DashMap;

/// Concurrent, TTL-agnostic key/value map.
///
/// Linearizable per key; arbitrary parallel readers and writers are safe.
/// Holds no opinion about expiry -- callers (the [`Worker`](crate::worker::Worker))
/// are responsible for deleting entries when they go stale.
pub(crate) struct Store<K, V> {
    entries: DashMap<K, V>,
}

impl<K, V> Store<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub(crate) fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Unconditional insert/replace.
    pub(crate) fn put(&self, key: K, value: V) {
        self.entries.insert(key, value);
    }

    /// Non-blocking, constant-time expected lookup.
    pub(crate) fn get(&self, key: &K) -> Option<V> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Idempotent removal.
    pub(crate) fn delete(&self, key: &K) {
        self.entries.remove(key);
    }

    /// Whether an entry is currently present for `key`.
    pub(crate) fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }
}
