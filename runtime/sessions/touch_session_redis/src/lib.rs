#![deny(missing_docs)]
//! A Redis-based storage backend for [`touch_session`](https://crates.io/crates/touch_session),
//! implemented using the [`redis`](https://crates.io/crates/redis) crate.
use anyhow::Context;
use redis::{AsyncCommands, SetExpiry, SetOptions, Value, aio::ConnectionManager};
use std::time::Duration;
use touch_session::store::{SessionStorageBackend, errors::BackendError};

/// Refresh the TTL first, then read: a key that no longer exists is never resurrected.
const LUA_GET_AND_TOUCH: &str = r#"
    if redis.call('PEXPIRE', KEYS[1], ARGV[1]) == 1 then
        return redis.call('GET', KEYS[1])
    end
    return false
"#;

/// The value past the ceiling is still returned to the caller; the next INCR starts from 1.
const LUA_INCR_WITH_ROLLOVER: &str = r#"
    local value = redis.call('INCR', KEYS[1])
    if value > tonumber(ARGV[1]) then
        redis.call('DEL', KEYS[1])
    end
    return value
"#;

#[derive(Clone)]
/// A session storage backend using Redis.
///
/// # Implementation details
///
/// Every session record is an individual Redis string key with a TTL, set with
/// millisecond precision. The two operations that must be atomic, loading a
/// record while refreshing its TTL and incrementing the shared id counter,
/// run server-side as Lua scripts.
pub struct RedisSessionStore {
    connection: ConnectionManager,
    get_and_touch: redis::Script,
    incr_with_rollover: redis::Script,
}

impl std::fmt::Debug for RedisSessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisSessionStore")
            .field("connection", &"<ConnectionManager>")
            .finish_non_exhaustive()
    }
}

impl RedisSessionStore {
    /// Creates a new Redis session store instance.
    ///
    /// It requires a [`ConnectionManager`] to interact with Redis.
    pub fn new(connection: ConnectionManager) -> Self {
        Self {
            connection,
            get_and_touch: redis::Script::new(LUA_GET_AND_TOUCH),
            incr_with_rollover: redis::Script::new(LUA_INCR_WITH_ROLLOVER),
        }
    }

    /// Connect to the Redis server at `url` (e.g. `redis://localhost:6379`).
    pub async fn connect(url: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self::new(connection))
    }
}

/// Redis stores expiries as absolute Unix milliseconds in a signed 64-bit
/// integer and replies "invalid expire time" when `now + ttl` overflows it.
/// Halving the range leaves room for any realistic `now`.
const MAX_TTL_MILLIS: u64 = i64::MAX as u64 / 2;

/// TTLs are sent in milliseconds. Redis rejects a zero expiry, so anything
/// shorter than a millisecond is rounded up.
fn ttl_millis(ttl: Duration) -> Result<u64, BackendError> {
    match u64::try_from(ttl.as_millis()) {
        Ok(millis) if millis <= MAX_TTL_MILLIS => Ok(millis.max(1)),
        _ => Err(BackendError::new(anyhow::anyhow!(
            "A TTL of {ttl:?} is longer than Redis can represent (at most {MAX_TTL_MILLIS}ms)"
        ))),
    }
}

fn redis_value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Nil => "Nil",
        Value::Okay => "Okay",
        Value::Int(_) => "Int",
        Value::BulkString(_) => "BulkString",
        Value::Array(_) => "Array",
        Value::SimpleString(_) => "SimpleString",
        Value::Map(_) => "Map",
        Value::Set(_) => "Set",
        Value::Attribute { .. } => "Attribute",
        Value::Double(_) => "Double",
        Value::Boolean(_) => "Boolean",
        Value::VerbatimString { .. } => "VerbatimString",
        Value::BigNumber(_) => "BigNumber",
        Value::Push { .. } => "Push",
        Value::ServerError(_) => "ServerError",
    }
}

#[async_trait::async_trait]
impl SessionStorageBackend for RedisSessionStore {
    /// Refresh the TTL of a session record and load it, in a single script invocation.
    #[tracing::instrument(name = "Get and touch server-side session record", level = tracing::Level::INFO, skip_all)]
    async fn get_and_touch(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<Option<Vec<u8>>, BackendError> {
        let mut conn = self.connection.clone();
        self.get_and_touch
            .key(key)
            .arg(ttl_millis(ttl)?)
            .invoke_async(&mut conn)
            .await
            .context("Failed to run the get-and-touch script")
            .map_err(BackendError::new)
    }

    /// Increment the shared id counter, deleting it once it crosses `ceiling`.
    #[tracing::instrument(name = "Increment session id counter", level = tracing::Level::INFO, skip_all)]
    async fn increment_with_rollover(
        &self,
        counter_key: &str,
        ceiling: u64,
    ) -> Result<u64, BackendError> {
        let mut conn = self.connection.clone();
        let value: i64 = self
            .incr_with_rollover
            .key(counter_key)
            .arg(ceiling)
            .invoke_async(&mut conn)
            .await
            .context("Failed to run the increment-with-rollover script")
            .map_err(BackendError::new)?;
        u64::try_from(value).map_err(|_| {
            BackendError::new(anyhow::anyhow!(
                "Redis INCR returned {value}. Expected a positive integer"
            ))
        })
    }

    /// Store a session record, overwriting any previous value.
    #[tracing::instrument(name = "Set server-side session record", level = tracing::Level::INFO, skip_all)]
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), BackendError> {
        let reply: Value = self
            .connection
            .clone()
            .set_options(
                key,
                value,
                SetOptions::default().with_expiration(SetExpiry::PX(ttl_millis(ttl)?)),
            )
            .await
            .map_err(BackendError::new)?;
        match reply {
            Value::Okay => Ok(()),
            other => Err(BackendError::new(anyhow::anyhow!(
                "Redis SET replied {}. Expected Okay",
                redis_value_type_name(&other)
            ))),
        }
    }

    /// Delete a session record, if it exists.
    #[tracing::instrument(name = "Delete server-side session record", level = tracing::Level::INFO, skip_all)]
    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        let ndeleted: u64 = self
            .connection
            .clone()
            .del(key)
            .await
            .map_err(BackendError::new)?;
        match ndeleted {
            0 | 1 => Ok(()),
            n => Err(BackendError::new(anyhow::anyhow!(
                "Redis DEL replied {n}. Expected 0 or 1."
            ))),
        }
    }

    /// Refresh the TTL of a session record, if it exists.
    #[tracing::instrument(name = "Expire server-side session record", level = tracing::Level::INFO, skip_all)]
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), BackendError> {
        // `ttl_millis` never exceeds `i64::MAX / 2`.
        let millis = ttl_millis(ttl)? as i64;
        // 1 if the TTL was refreshed, 0 if the key doesn't exist.
        let _updated: i64 = self
            .connection
            .clone()
            .pexpire(key, millis)
            .await
            .map_err(BackendError::new)?;
        Ok(())
    }
}
