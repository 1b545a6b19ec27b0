use crate::SessionId;
use crate::backend::{COUNTER_CEILING, SessionStorageBackend};
use crate::config::{KeyPrefix, SessionStoreConfig};
use crate::entropy::{EntropySource, SystemEntropy};
use crate::id::ENTROPY_LEN;
use crate::serializer::Serializer;
use errors::{
    DeserializationError, GetError, InvalidIdError, NewIdError, SerializationError, SetError,
    TransportError,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Server-side sessions on top of a shared, TTL-capable key-value store.
///
/// # Guarantees
///
/// - Session ids are unique and can't be guessed: each one combines 64 bytes
///   from a cryptographically secure source, a nanosecond timestamp and a value
///   from a counter shared by every process using the same backend.
/// - Loading a session refreshes its TTL in the same atomic step ("touch on read").
/// - A missing, expired or foreign id never produces an error on [`get`](Self::get):
///   a new session is minted instead.
///
/// # Concurrency
///
/// The store holds no mutable state: all shared state lives in the
/// storage backend. Clone it freely and use it from as many tasks as you need.
pub struct SessionStore<S> {
    backend: Arc<dyn SessionStorageBackend>,
    serializer: S,
    entropy: Arc<dyn EntropySource>,
    config: SessionStoreConfig,
}

/// A session returned by [`SessionStore::get`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session<P> {
    /// The id the caller should use from now on.
    ///
    /// It differs from the requested one if a new session had to be minted.
    pub id: SessionId,
    /// The typed session payload.
    pub payload: P,
    /// `true` if the session was minted by this call.
    pub is_new: bool,
}

impl<S: Clone> Clone for SessionStore<S> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            serializer: self.serializer.clone(),
            entropy: self.entropy.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S> std::fmt::Debug for SessionStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("backend", &self.backend)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S: Serializer> SessionStore<S> {
    /// Creates a new session store on top of the provided backend.
    ///
    /// Session ids draw their randomness from [`SystemEntropy`].
    pub fn new<Backend>(backend: Backend, serializer: S, config: SessionStoreConfig) -> Self
    where
        Backend: SessionStorageBackend + 'static,
    {
        Self {
            backend: Arc::new(backend),
            serializer,
            entropy: Arc::new(SystemEntropy::new()),
            config,
        }
    }

    /// Use a different source of randomness for new session ids.
    pub fn with_entropy_source<E>(mut self, entropy: E) -> Self
    where
        E: EntropySource + 'static,
    {
        self.entropy = Arc::new(entropy);
        self
    }

    pub fn config(&self) -> &SessionStoreConfig {
        &self.config
    }

    pub fn key_prefix(&self) -> &KeyPrefix {
        &self.config.key_prefix
    }

    /// Returns `true` if `id` belongs to this store's namespace.
    ///
    /// The rollover counter shares the namespace but is never a valid id.
    pub fn is_valid(&self, id: &str) -> bool {
        self.config.key_prefix.owns(id)
    }

    /// Load the session associated with `id`, refreshing its TTL to `ttl`.
    ///
    /// If `id` is not a valid id for this store, or there is no session
    /// record for it, a new session is minted and stored with the payload
    /// returned by [`Serializer::new_payload`].
    ///
    /// Concurrent calls for the same missing id each mint their own session.
    ///
    /// # Errors
    ///
    /// Backend failures and timeouts are returned as they are, as well as
    /// payloads that can't be deserialized. The latter leaves the stored
    /// record in place, with its TTL refreshed.
    #[tracing::instrument(name = "Get session", level = tracing::Level::INFO, skip_all)]
    pub async fn get(&self, id: &str, ttl: Duration) -> Result<Session<S::Payload>, GetError> {
        if self.is_valid(id) {
            let record = self.bounded(self.backend.get_and_touch(id, ttl)).await?;
            match record {
                Some(raw) => {
                    let payload = self
                        .serializer
                        .unmarshal(&raw)
                        .map_err(DeserializationError::new)?;
                    return Ok(Session {
                        id: SessionId::new(id.to_owned()),
                        payload,
                        is_new: false,
                    });
                }
                None => tracing::debug!(
                    "There is no record for the incoming session id, minting a new session."
                ),
            }
        } else {
            tracing::trace!(
                "The incoming session id is outside of this store's namespace, minting a new session."
            );
        }

        let id = self.new_id().await?;
        let payload = self.serializer.new_payload(&id);
        self.set(&id, &payload, ttl).await?;
        Ok(Session {
            id,
            payload,
            is_new: true,
        })
    }

    /// Mint a new session id.
    ///
    /// Nothing is stored under the new id: use [`set`](Self::set) to attach a payload to it.
    ///
    /// # Errors
    ///
    /// It fails if the shared counter can't be incremented or if the entropy
    /// source can't provide enough randomness. It is never retried internally.
    #[tracing::instrument(name = "Mint session id", level = tracing::Level::INFO, skip_all)]
    pub async fn new_id(&self) -> Result<SessionId, NewIdError> {
        let prefix = &self.config.key_prefix;
        let counter_key = prefix.counter_key();
        let counter = self
            .bounded(
                self.backend
                    .increment_with_rollover(&counter_key, COUNTER_CEILING),
            )
            .await?;
        // A clock set before 1970 wraps around: the bits still vary, which is all the id needs.
        let unix_nanos = jiff::Timestamp::now().as_nanosecond() as u64;

        let mut entropy = [0u8; ENTROPY_LEN];
        loop {
            self.entropy.fill(&mut entropy)?;
            let id = SessionId::compose(prefix, &entropy, unix_nanos, counter);
            // The encoded entropy may, rarely, spell out the counter key.
            if prefix.owns(&id) {
                return Ok(id);
            }
            tracing::trace!(
                "The new session id collides with the counter namespace, drawing new entropy."
            );
        }
    }

    /// Store `payload` under `id`, expiring after `ttl`.
    ///
    /// Any existing record is overwritten: the last writer wins.
    ///
    /// # Errors
    ///
    /// Ids outside of this store's namespace are rejected before anything else happens.
    /// If the payload can't be serialized the backend is never contacted.
    #[tracing::instrument(name = "Set session", level = tracing::Level::INFO, skip_all)]
    pub async fn set(&self, id: &str, payload: &S::Payload, ttl: Duration) -> Result<(), SetError> {
        if !self.is_valid(id) {
            return Err(InvalidIdError(()).into());
        }
        let raw = self
            .serializer
            .marshal(payload)
            .map_err(SerializationError::new)?;
        self.bounded(self.backend.set(id, &raw, ttl)).await?;
        Ok(())
    }

    /// Delete the session record for `id`.
    ///
    /// Ids outside of this store's namespace are ignored: the backend is not contacted.
    /// Deleting a session that doesn't exist is not an error.
    #[tracing::instrument(name = "Delete session", level = tracing::Level::INFO, skip_all)]
    pub async fn delete(&self, id: &str) -> Result<(), TransportError> {
        if !self.is_valid(id) {
            tracing::trace!("Ignoring deletion for an id outside of this store's namespace.");
            return Ok(());
        }
        self.bounded(self.backend.delete(id)).await
    }

    /// Refresh the TTL of the session record for `id`, without loading it.
    ///
    /// Ids outside of this store's namespace are ignored: the backend is not contacted.
    #[tracing::instrument(name = "Expire session", level = tracing::Level::INFO, skip_all)]
    pub async fn expire(&self, id: &str, ttl: Duration) -> Result<(), TransportError> {
        if !self.is_valid(id) {
            tracing::trace!("Ignoring TTL refresh for an id outside of this store's namespace.");
            return Ok(());
        }
        self.bounded(self.backend.expire(id, ttl)).await
    }

    /// Run a backend call, giving up once the configured timeout elapses.
    async fn bounded<T, F>(&self, call: F) -> Result<T, TransportError>
    where
        F: Future<Output = Result<T, crate::store::errors::BackendError>>,
    {
        let timeout = self.config.timeout;
        match tokio::time::timeout(timeout, call).await {
            Ok(outcome) => Ok(outcome?),
            Err(_) => Err(TransportError::Timeout { timeout }),
        }
    }
}

/// Errors that can occur when interacting with a [`SessionStore`].
pub mod errors {
    use crate::entropy::EntropyError;
    use crate::store::errors::BackendError;

    #[non_exhaustive]
    #[derive(Debug, thiserror::Error)]
    /// The storage backend couldn't complete a call.
    pub enum TransportError {
        /// The call didn't complete within the configured timeout and was cancelled.
        #[error("The session storage backend didn't reply within {timeout:?}.")]
        Timeout {
            /// The deadline that was exceeded.
            timeout: std::time::Duration,
        },
        /// The backend reported a failure.
        #[error(transparent)]
        Backend(#[from] BackendError),
    }

    #[derive(Debug, thiserror::Error)]
    #[error("Failed to serialize the session payload.")]
    /// The session payload couldn't be serialized.
    pub struct SerializationError(#[source] Box<dyn std::error::Error + Send + Sync>);

    impl SerializationError {
        pub(crate) fn new(source: impl std::error::Error + Send + Sync + 'static) -> Self {
            Self(Box::new(source))
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("Failed to deserialize the session payload.")]
    /// The stored session record couldn't be deserialized.
    pub struct DeserializationError(#[source] Box<dyn std::error::Error + Send + Sync>);

    impl DeserializationError {
        pub(crate) fn new(source: impl std::error::Error + Send + Sync + 'static) -> Self {
            Self(Box::new(source))
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("The session id doesn't belong to this store's namespace.")]
    /// The id is outside of the store's key prefix, or it is the reserved counter key.
    pub struct InvalidIdError(pub(crate) ());

    #[non_exhaustive]
    #[derive(Debug, thiserror::Error)]
    /// The error returned by [`SessionStore::new_id`][super::SessionStore::new_id].
    pub enum NewIdError {
        #[error("Failed to increment the session counter.")]
        Transport(#[from] TransportError),
        #[error(transparent)]
        Entropy(#[from] EntropyError),
    }

    #[non_exhaustive]
    #[derive(Debug, thiserror::Error)]
    /// The error returned by [`SessionStore::set`][super::SessionStore::set].
    pub enum SetError {
        #[error(transparent)]
        InvalidId(#[from] InvalidIdError),
        #[error(transparent)]
        Serialization(#[from] SerializationError),
        #[error("Failed to store the session record.")]
        Transport(#[from] TransportError),
    }

    #[non_exhaustive]
    #[derive(Debug, thiserror::Error)]
    /// The error returned by [`SessionStore::get`][super::SessionStore::get].
    pub enum GetError {
        #[error("Failed to load the session record.")]
        Transport(#[from] TransportError),
        #[error(transparent)]
        Deserialization(#[from] DeserializationError),
        #[error("Failed to mint a new session id.")]
        NewId(#[from] NewIdError),
        #[error("Failed to store the record for a new session.")]
        Set(#[from] SetError),
    }
}
