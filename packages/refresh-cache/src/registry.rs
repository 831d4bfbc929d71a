//! The process-facing entry point: key uniqueness, routing reads to the
//! `Store` or the addressed `Worker`.
//!
//! A `DashMap<K, WorkerHandle<V>>` gives lock-free lookups for the common
//! case; a single `parking_lot::Mutex` serializes only the "does this key
//! already exist" check against concurrent registrations of the same key.

use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::{GetError, RegisterError};
use crate::store::Store;
use crate::worker::{self, WorkerHandle};

/// Default deadline for [`Cache::get`] when the caller doesn't specify one.
pub const DEFAULT_GET_TIMEOUT: Duration = Duration::from_millis(30_000);

/// A self-refreshing keyed value cache.
///
/// Owns the shared [`Store`] and the set of per-key [`Worker`](crate::worker)s.
/// Does not itself hold values -- the `Store` is the single source of truth
/// for present entries; `Cache` only routes.
pub struct Cache<K, V> {
    store: Arc<Store<K, V>>,
    workers: DashMap<K, WorkerHandle<V>>,
    registration_lock: Mutex<()>,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates an empty cache with no registered keys.
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: Arc::new(Store::new()),
            workers: DashMap::new(),
            registration_lock: Mutex::new(()),
        }
    }

    /// Registers a computation for `key`.
    ///
    /// Spawns a dedicated worker that runs `fun` roughly every
    /// `refresh_interval`, storing each success and expiring it after `ttl`
    /// if no fresher success arrives first. Returns
    /// [`RegisterError::AlreadyRegistered`] if a worker or a stored value
    /// already exists for `key`; the existing worker is left untouched.
    ///
    /// # Panics
    ///
    /// Panics if `ttl` is zero, `refresh_interval` is zero, or
    /// `refresh_interval >= ttl`. These are caller contract violations, not
    /// part of the runtime error taxonomy.
    pub fn register_function<F, Fut>(
        &self,
        key: K,
        fun: F,
        ttl: Duration,
        refresh_interval: Duration,
    ) -> Result<(), RegisterError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        assert!(!ttl.is_zero(), "ttl_ms must be positive");
        assert!(
            !refresh_interval.is_zero(),
            "refresh_interval_ms must be positive"
        );
        assert!(
            refresh_interval < ttl,
            "refresh_interval_ms must be strictly less than ttl_ms"
        );

        let _guard = self.registration_lock.lock();

        if self.workers.contains_key(&key) || self.store.contains_key(&key) {
            return Err(RegisterError::AlreadyRegistered);
        }

        tracing::info!(key = ?key, ?ttl, ?refresh_interval, "registering new worker");
        let handle = worker::spawn_from_closure(
            key.clone(),
            fun,
            ttl,
            refresh_interval,
            Arc::clone(&self.store),
        );
        self.workers.insert(key, handle);
        Ok(())
    }

    /// Reads the value for `key`, waiting at most `timeout` for a fresh
    /// computation if none is currently stored.
    ///
    /// Three outcomes:
    /// - a stored value exists: returned immediately, without consulting
    ///   the worker (the "hot path" -- may be stale if a refresh is
    ///   in-flight, which is deliberate: a stale read is preferred over
    ///   blocking).
    /// - no stored value, but a worker exists: delegates to
    ///   `Worker::await_current`.
    /// - no worker exists for `key`: [`GetError::NotRegistered`].
    pub async fn get(&self, key: &K, timeout: Duration) -> Result<V, GetError> {
        if let Some(value) = self.store.get(key) {
            return Ok(value);
        }

        let handle = self.workers.get(key).map(|entry| entry.value().clone());
        match handle {
            Some(handle) => handle
                .await_current(timeout)
                .await
                .ok_or(GetError::Timeout),
            None => Err(GetError::NotRegistered),
        }
    }

    /// [`Cache::get`] with the default 30 second timeout.
    pub async fn get_default(&self, key: &K) -> Result<V, GetError> {
        self.get(key, DEFAULT_GET_TIMEOUT).await
    }

    /// Test/administrative hook forcing the worker for `key` (if any) to run
    /// its function now. See [`WorkerHandle::trigger_run`].
    #[cfg(test)]
    pub(crate) fn trigger_run(&self, key: &K) {
        if let Some(handle) = self.workers.get(key) {
            handle.trigger_run();
        }
    }

    /// Test hook simulating an external deletion racing with the worker:
    /// removes the stored value without touching the worker's own state.
    #[cfg(test)]
    pub(crate) fn delete_stored_value_for_test(&self, key: &K) {
        self.store.delete(key);
    }
}

impl<K, V> Default for Cache<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
