//! Types related to [`SessionStoreConfig`].
mod key_prefix;

pub use key_prefix::{InvalidKeyPrefix, KeyPrefix};

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
/// Configure how a [`SessionStore`](crate::SessionStore) talks to its storage backend.
pub struct SessionStoreConfig {
    /// The namespace for all keys managed by the store.
    ///
    /// Every session id starts with this prefix and the rollover counter
    /// lives under `<key_prefix>incr`.
    /// Operations on ids outside of this namespace are refused.
    ///
    /// # Default
    ///
    /// The default value is `session:`.
    #[serde(default)]
    pub key_prefix: KeyPrefix,
    /// The deadline for each individual call to the storage backend.
    ///
    /// A call that doesn't complete in time is cancelled and
    /// surfaced as [`TransportError::Timeout`](crate::errors::TransportError::Timeout).
    /// No retries are attempted.
    ///
    /// # Default
    ///
    /// The default value is 5 seconds.
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: std::time::Duration,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: KeyPrefix::default(),
            timeout: default_timeout(),
        }
    }
}

impl SessionStoreConfig {
    /// Create a configuration using the provided key prefix and the default timeout.
    pub fn new(key_prefix: KeyPrefix) -> Self {
        Self {
            key_prefix,
            ..Default::default()
        }
    }

    /// Change the deadline for each call to the storage backend.
    pub fn timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

fn default_timeout() -> std::time::Duration {
    std::time::Duration::from_secs(5)
}
