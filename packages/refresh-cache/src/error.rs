//! Error taxonomy for the public API.
//!
//! Split mirrors the shape of the registration and read paths themselves:
//! registering a key can only fail one way, reading one can fail two ways.
//! Contract violations (bad `ttl`/`refresh_interval`) are programmer errors
//! and are not part of either enum -- they panic at the call site instead.

/// Error returned by [`crate::Cache::register_function`].
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum RegisterError {
    /// A worker or stored value already exists for this key.
    #[error("key is already registered")]
    AlreadyRegistered,
}

/// Error returned by [`crate::Cache::get`].
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum GetError {
    /// No worker and no stored value exist for this key.
    #[error("key is not registered")]
    NotRegistered,
    /// The caller's deadline elapsed before a successful value was available.
    ///
    /// Also returned when the in-flight computation failed or crashed within
    /// the deadline -- failure reasons are never surfaced to readers.
    #[error("timed out waiting for a value")]
    Timeout,
}
