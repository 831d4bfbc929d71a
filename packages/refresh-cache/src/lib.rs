//! A self-refreshing keyed value cache.
//!
//! Register a 0-arity computation once per key; a dedicated worker
//! recomputes it on a fixed interval, stores each success, retries failures
//! and crashes indefinitely, and expires stale entries after a TTL. Readers
//! call [`Cache::get`] and either get the last stored value immediately, or
//! (if nothing is stored yet) wait for the in-flight computation up to a
//! bounded timeout.
//!
//! This crate does not do distributed coordination, replication, memory-
//! pressure eviction, LRU, or persistence across restarts -- it is a
//! single-process, in-memory cache whose only eviction mechanism is TTL
//! expiry. Process-wide wiring (a single shared instance, logging
//! configuration, a CLI) is left to the embedding application; see
//! `demos/` for one way to wire it up.

mod computation;
mod error;
mod registry;
mod store;
mod worker;

pub use error::{GetError, RegisterError};
pub use registry::{Cache, DEFAULT_GET_TIMEOUT};
