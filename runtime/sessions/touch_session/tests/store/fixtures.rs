use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use touch_session::config::KeyPrefix;
use touch_session::entropy::{EntropyError, EntropySource, SystemEntropy};
use touch_session::serializer::{JsonSerializer, Serializer};
use touch_session::store::{SessionStorageBackend, errors::BackendError};
use touch_session::{SessionId, SessionStore, SessionStoreConfig};
use touch_session_memory_store::InMemorySessionStore;

pub const PREFIX: &str = "session_test";

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Data {
    pub int: u64,
    pub string: String,
}

static MINTED: AtomicUsize = AtomicUsize::new(0);

/// Every new session gets a distinct payload, tied to its id.
fn new_data(id: &SessionId) -> Data {
    Data {
        int: MINTED.fetch_add(1, Ordering::Relaxed) as u64,
        string: id.to_string(),
    }
}

pub type TestStore = SessionStore<JsonSerializer<Data>>;

pub fn config() -> SessionStoreConfig {
    SessionStoreConfig::new(KeyPrefix::new(PREFIX).unwrap())
}

fn serializer() -> JsonSerializer<Data> {
    JsonSerializer::new(new_data as fn(&SessionId) -> Data)
}

/// A session store on top of an empty in-memory backend.
///
/// The backend is returned as well, to inspect its content.
pub fn store() -> (TestStore, InMemorySessionStore) {
    let backend = InMemorySessionStore::new();
    (
        SessionStore::new(backend.clone(), serializer(), config()),
        backend,
    )
}

/// A session store on top of an empty in-memory backend, with a mechanism
/// to inspect what calls were made to it.
pub fn spy_store() -> (TestStore, CallTracker, InMemorySessionStore) {
    let backend = InMemorySessionStore::new();
    let spy_backend = SpyBackend::new(backend.clone());
    let call_tracker = spy_backend.call_tracker();
    (
        SessionStore::new(spy_backend, serializer(), config()),
        call_tracker,
        backend,
    )
}

/// A session store whose backend takes `delay` to answer every call.
pub fn slow_store(delay: Duration, timeout: Duration) -> TestStore {
    let backend = SlowBackend {
        backend: InMemorySessionStore::new(),
        delay,
    };
    SessionStore::new(backend, serializer(), config().timeout(timeout))
}

/// A session store whose backend fails every call.
pub fn broken_store() -> TestStore {
    SessionStore::new(BrokenBackend, serializer(), config())
}

/// A session store whose backend mints ids but refuses to store records.
pub fn read_only_store() -> (TestStore, InMemorySessionStore) {
    let backend = InMemorySessionStore::new();
    (
        SessionStore::new(ReadOnlyBackend(backend.clone()), serializer(), config()),
        backend,
    )
}

/// A wrapper that keeps track of which methods have been called
/// on the underlying session storage backend.
#[derive(Debug)]
pub struct SpyBackend<B> {
    backend: B,
    call_tracker: CallTracker,
}

impl<B> SpyBackend<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            call_tracker: Default::default(),
        }
    }

    pub fn call_tracker(&self) -> CallTracker {
        self.call_tracker.clone()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CallTracker(Arc<Mutex<Vec<String>>>);

impl CallTracker {
    pub async fn assert_store_was_untouched(&self) {
        let oplog = self.0.lock().await;
        assert!(
            oplog.is_empty(),
            "Server store was supposed to be untouched, but at least one method has been called on it. Operation log:\n  - {}",
            oplog.join("\n  - ")
        )
    }

    pub async fn operation_log(&self) -> Vec<String> {
        self.0.lock().await.clone()
    }

    async fn push_operation(&self, op: impl Into<String>) {
        self.0.lock().await.push(op.into());
    }
}

/// Session ids are long and random: the operation log only records whether
/// the key is the counter or a session.
fn redact(key: &str) -> &'static str {
    if key == format!("{PREFIX}incr") {
        "<counter>"
    } else {
        "<id>"
    }
}

#[async_trait::async_trait]
impl<B: SessionStorageBackend> SessionStorageBackend for SpyBackend<B> {
    async fn get_and_touch(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<Option<Vec<u8>>, BackendError> {
        self.call_tracker
            .push_operation(format!("get_and_touch {} {}s", redact(key), ttl.as_secs()))
            .await;
        self.backend.get_and_touch(key, ttl).await
    }

    async fn increment_with_rollover(
        &self,
        counter_key: &str,
        ceiling: u64,
    ) -> Result<u64, BackendError> {
        self.call_tracker
            .push_operation(format!("increment {}", redact(counter_key)))
            .await;
        self.backend.increment_with_rollover(counter_key, ceiling).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), BackendError> {
        self.call_tracker
            .push_operation(format!("set {} {}s", redact(key), ttl.as_secs()))
            .await;
        self.backend.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        self.call_tracker
            .push_operation(format!("delete {}", redact(key)))
            .await;
        self.backend.delete(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), BackendError> {
        self.call_tracker
            .push_operation(format!("expire {} {}s", redact(key), ttl.as_secs()))
            .await;
        self.backend.expire(key, ttl).await
    }
}

#[derive(Debug)]
struct SlowBackend<B> {
    backend: B,
    delay: Duration,
}

#[async_trait::async_trait]
impl<B: SessionStorageBackend> SessionStorageBackend for SlowBackend<B> {
    async fn get_and_touch(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<Option<Vec<u8>>, BackendError> {
        tokio::time::sleep(self.delay).await;
        self.backend.get_and_touch(key, ttl).await
    }

    async fn increment_with_rollover(
        &self,
        counter_key: &str,
        ceiling: u64,
    ) -> Result<u64, BackendError> {
        tokio::time::sleep(self.delay).await;
        self.backend.increment_with_rollover(counter_key, ceiling).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), BackendError> {
        tokio::time::sleep(self.delay).await;
        self.backend.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        tokio::time::sleep(self.delay).await;
        self.backend.delete(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), BackendError> {
        tokio::time::sleep(self.delay).await;
        self.backend.expire(key, ttl).await
    }
}

#[derive(Debug)]
struct BrokenBackend;

fn connection_refused() -> BackendError {
    BackendError::new(std::io::Error::new(
        std::io::ErrorKind::ConnectionRefused,
        "connection refused",
    ))
}

#[async_trait::async_trait]
impl SessionStorageBackend for BrokenBackend {
    async fn get_and_touch(
        &self,
        _key: &str,
        _ttl: Duration,
    ) -> Result<Option<Vec<u8>>, BackendError> {
        Err(connection_refused())
    }

    async fn increment_with_rollover(
        &self,
        _counter_key: &str,
        _ceiling: u64,
    ) -> Result<u64, BackendError> {
        Err(connection_refused())
    }

    async fn set(&self, _key: &str, _value: &[u8], _ttl: Duration) -> Result<(), BackendError> {
        Err(connection_refused())
    }

    async fn delete(&self, _key: &str) -> Result<(), BackendError> {
        Err(connection_refused())
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<(), BackendError> {
        Err(connection_refused())
    }
}

/// Forwards everything to the wrapped backend, except for writes.
#[derive(Debug)]
struct ReadOnlyBackend<B>(B);

#[async_trait::async_trait]
impl<B: SessionStorageBackend> SessionStorageBackend for ReadOnlyBackend<B> {
    async fn get_and_touch(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<Option<Vec<u8>>, BackendError> {
        self.0.get_and_touch(key, ttl).await
    }

    async fn increment_with_rollover(
        &self,
        counter_key: &str,
        ceiling: u64,
    ) -> Result<u64, BackendError> {
        self.0.increment_with_rollover(counter_key, ceiling).await
    }

    async fn set(&self, _key: &str, _value: &[u8], _ttl: Duration) -> Result<(), BackendError> {
        Err(BackendError::new(anyhow::anyhow!(
            "READONLY You can't write against a read only replica."
        )))
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        self.0.delete(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), BackendError> {
        self.0.expire(key, ttl).await
    }
}

/// An entropy source that never delivers.
#[derive(Debug)]
pub struct ExhaustedEntropy;

impl EntropySource for ExhaustedEntropy {
    fn fill(&self, dest: &mut [u8]) -> Result<(), EntropyError> {
        Err(EntropyError::new(
            dest.len(),
            std::io::Error::other("entropy pool exhausted"),
        ))
    }
}

/// Hands out the queued buffers first, then falls back to the system source.
#[derive(Debug)]
pub struct ScriptedEntropy {
    queue: std::sync::Mutex<Vec<Vec<u8>>>,
    fallback: SystemEntropy,
}

impl ScriptedEntropy {
    pub fn new(mut buffers: Vec<Vec<u8>>) -> Self {
        buffers.reverse();
        Self {
            queue: std::sync::Mutex::new(buffers),
            fallback: SystemEntropy::new(),
        }
    }
}

impl EntropySource for ScriptedEntropy {
    fn fill(&self, dest: &mut [u8]) -> Result<(), EntropyError> {
        match self.queue.lock().unwrap().pop() {
            Some(buffer) => {
                dest.copy_from_slice(&buffer);
                Ok(())
            }
            None => self.fallback.fill(dest),
        }
    }
}

/// A serializer that refuses to serialize anything.
#[derive(Debug, Clone)]
pub struct RefusingSerializer;

#[derive(Debug, thiserror::Error)]
#[error("This payload can't be serialized")]
pub struct Refused;

impl Serializer for RefusingSerializer {
    type Payload = Data;
    type Error = Refused;

    fn marshal(&self, _payload: &Data) -> Result<Vec<u8>, Refused> {
        Err(Refused)
    }

    fn unmarshal(&self, _raw: &[u8]) -> Result<Data, Refused> {
        Err(Refused)
    }

    fn new_payload(&self, id: &SessionId) -> Data {
        new_data(id)
    }
}

pub fn refusing_spy_store() -> (SessionStore<RefusingSerializer>, CallTracker) {
    let spy_backend = SpyBackend::new(InMemorySessionStore::new());
    let call_tracker = spy_backend.call_tracker();
    (
        SessionStore::new(spy_backend, RefusingSerializer, config()),
        call_tracker,
    )
}
