//! An in-memory storage backend for `touch_session`, geared towards testing and local development.
use anyhow::Context;
use jiff::Timestamp;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::{Mutex, MutexGuard};

use touch_session::store::{SessionStorageBackend, errors::BackendError};

#[derive(Clone)]
/// An in-memory session storage backend.
///
/// It mimics the semantics of a Redis server: keys carry an optional
/// deadline, counters are stored as decimal strings, and every operation
/// runs under a single lock, which makes each of them atomic.
///
/// # Limitations
///
/// This store won't persist data between server restarts.
/// It also won't synchronize data between multiple server instances.
/// It is primarily intended for testing and local development.
pub struct InMemorySessionStore(Arc<Mutex<HashMap<String, StoreRecord>>>);

impl std::fmt::Debug for InMemorySessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemorySessionStore")
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct StoreRecord {
    value: Vec<u8>,
    /// `None` if the key never expires.
    deadline: Option<Timestamp>,
}

impl StoreRecord {
    fn is_stale(&self, now: Timestamp) -> bool {
        self.deadline.is_some_and(|d| d <= now)
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySessionStore {
    /// Creates a new (empty) in-memory session store.
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(HashMap::new())))
    }

    /// Returns `true` if `key` exists and hasn't expired.
    pub async fn contains_key(&self, key: &str) -> bool {
        let mut guard = self.0.lock().await;
        Self::get_mut_if_fresh(&mut guard, key).is_some()
    }

    /// The time left before `key` expires.
    ///
    /// It returns `None` if the key doesn't exist or never expires.
    pub async fn remaining_ttl(&self, key: &str) -> Option<Duration> {
        let mut guard = self.0.lock().await;
        let deadline = Self::get_mut_if_fresh(&mut guard, key)?.deadline?;
        Some(
            deadline
                .duration_since(Timestamp::now())
                .try_into()
                .unwrap_or(Duration::ZERO),
        )
    }

    /// Remove all expired keys, returning how many were removed.
    ///
    /// Expired keys are invisible to every other operation, but they keep
    /// using memory until they are purged or overwritten.
    #[tracing::instrument(name = "Purge expired keys", level = tracing::Level::TRACE, skip_all)]
    pub async fn purge_expired(&self) -> usize {
        let mut guard = self.0.lock().await;
        let now = Timestamp::now();
        let before = guard.len();
        guard.retain(|_, record| !record.is_stale(now));
        before - guard.len()
    }

    fn get_mut_if_fresh<'a>(
        guard: &'a mut MutexGuard<'_, HashMap<String, StoreRecord>>,
        key: &str,
    ) -> Option<&'a mut StoreRecord> {
        let now = Timestamp::now();
        if guard.get(key).is_some_and(|r| r.is_stale(now)) {
            guard.remove(key);
            return None;
        }
        guard.get_mut(key)
    }
}

#[async_trait::async_trait]
impl SessionStorageBackend for InMemorySessionStore {
    #[tracing::instrument(name = "Get and touch session record", level = tracing::Level::TRACE, skip_all)]
    async fn get_and_touch(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<Option<Vec<u8>>, BackendError> {
        let deadline = deadline_after(ttl)?;
        let mut guard = self.0.lock().await;
        let Some(record) = Self::get_mut_if_fresh(&mut guard, key) else {
            return Ok(None);
        };
        record.deadline = Some(deadline);
        Ok(Some(record.value.clone()))
    }

    #[tracing::instrument(name = "Increment session counter", level = tracing::Level::TRACE, skip_all)]
    async fn increment_with_rollover(
        &self,
        counter_key: &str,
        ceiling: u64,
    ) -> Result<u64, BackendError> {
        let mut guard = self.0.lock().await;
        let (current, deadline) = match Self::get_mut_if_fresh(&mut guard, counter_key) {
            Some(record) => (parse_counter(&record.value)?, record.deadline),
            None => (0, None),
        };
        let Some(next) = current.checked_add(1) else {
            return Err(BackendError::new(anyhow::anyhow!(
                "Incrementing the counter would overflow"
            )));
        };
        if next > ceiling {
            guard.remove(counter_key);
        } else {
            guard.insert(
                counter_key.to_owned(),
                StoreRecord {
                    value: next.to_string().into_bytes(),
                    deadline,
                },
            );
        }
        Ok(next)
    }

    #[tracing::instrument(name = "Set session record", level = tracing::Level::TRACE, skip_all)]
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), BackendError> {
        let deadline = deadline_after(ttl)?;
        let mut guard = self.0.lock().await;
        guard.insert(
            key.to_owned(),
            StoreRecord {
                value: value.to_vec(),
                deadline: Some(deadline),
            },
        );
        Ok(())
    }

    #[tracing::instrument(name = "Delete session record", level = tracing::Level::TRACE, skip_all)]
    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        let mut guard = self.0.lock().await;
        guard.remove(key);
        Ok(())
    }

    #[tracing::instrument(name = "Expire session record", level = tracing::Level::TRACE, skip_all)]
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), BackendError> {
        let deadline = deadline_after(ttl)?;
        let mut guard = self.0.lock().await;
        if let Some(record) = Self::get_mut_if_fresh(&mut guard, key) {
            record.deadline = Some(deadline);
        }
        Ok(())
    }
}

/// The TTL is validated before any key is looked up, like Redis does,
/// so an out-of-range TTL fails even for missing keys.
fn deadline_after(ttl: Duration) -> Result<Timestamp, BackendError> {
    Timestamp::now()
        .checked_add(ttl)
        .with_context(|| format!("A TTL of {ttl:?} is past the largest supported timestamp"))
        .map_err(BackendError::new)
}

/// Counters are decimal strings, the way Redis stores them.
fn parse_counter(raw: &[u8]) -> Result<u64, BackendError> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| {
            BackendError::new(anyhow::anyhow!(
                "The value stored at the counter key is not an integer"
            ))
        })
}
