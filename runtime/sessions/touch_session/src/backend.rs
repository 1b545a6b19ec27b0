use errors::BackendError;
use std::time::Duration;

/// Once the counter goes past this value, the increment that crossed it
/// deletes the counter key: the next increment starts again from 1.
pub const COUNTER_CEILING: u64 = 4_000_000_000;

#[async_trait::async_trait]
/// The interface of a session storage backend.
///
/// Backends are thin: they move bytes in and out of a shared TTL-capable
/// key-value store. Namespacing, id minting and (de)serialization are handled by
/// [`SessionStore`](crate::SessionStore).
///
/// # Atomicity
///
/// [`get_and_touch`](Self::get_and_touch) and
/// [`increment_with_rollover`](Self::increment_with_rollover) must each
/// execute as a single indivisible unit with respect to every other client
/// of the underlying store.
pub trait SessionStorageBackend: std::fmt::Debug + Send + Sync {
    /// Refresh the expiry of `key` to `ttl` from now and return its value,
    /// as one atomic operation.
    ///
    /// It returns `None` if the key doesn't exist (or has already expired).
    /// The expiry of a missing key is never touched.
    async fn get_and_touch(&self, key: &str, ttl: Duration)
    -> Result<Option<Vec<u8>>, BackendError>;

    /// Increment the integer stored at `counter_key` and return the new value,
    /// as one atomic operation.
    ///
    /// A missing key is treated as zero.
    /// If the new value is greater than `ceiling` the key is deleted within the
    /// same atomic unit: the caller still receives the pre-reset value.
    async fn increment_with_rollover(
        &self,
        counter_key: &str,
        ceiling: u64,
    ) -> Result<u64, BackendError>;

    /// Store `value` under `key`, expiring after `ttl`.
    ///
    /// It overwrites any existing value, unconditionally.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), BackendError>;

    /// Remove `key` from the store.
    ///
    /// Deleting a key that doesn't exist is not an error.
    async fn delete(&self, key: &str) -> Result<(), BackendError>;

    /// Refresh the expiry of `key` to `ttl` from now, without reading its value.
    ///
    /// Expiring a key that doesn't exist is not an error.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), BackendError>;
}

/// Errors that can occur when interacting with a session storage backend.
pub mod errors {
    #[derive(Debug, thiserror::Error)]
    #[error("The session storage backend failed to process the request.")]
    /// The storage backend (or the connection to it) failed.
    ///
    /// A missing key is never reported as a [`BackendError`].
    pub struct BackendError(#[source] anyhow::Error);

    impl BackendError {
        pub fn new(source: impl Into<anyhow::Error>) -> Self {
            Self(source.into())
        }
    }
}
