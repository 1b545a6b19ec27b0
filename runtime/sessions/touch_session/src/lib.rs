/*!
Server-side sessions backed by a shared, TTL-capable key-value cache (e.g. Redis or Valkey).

# Anatomy of a session

A session is made of:

- A **session id**: an opaque, unguessable string the client sends back on every request.
- A **session record**: the serialized payload your application attaches to the session,
  stored under the session id in the cache, with a time-to-live.

Records expire on their own if nobody touches them. Every successful
[`SessionStore::get`] pushes the expiry forward: loading a session and refreshing
its TTL happen in the same atomic step on the cache server.

# Session ids

Session ids are minted by [`SessionStore`], never by the caller. Each one is the
store's [`KeyPrefix`] followed by the URL-safe base64 encoding of:

- 64 bytes from a cryptographically secure random source;
- a nanosecond timestamp;
- a value from a counter shared, via the cache, by every process using the same prefix.

The counter rolls over after [`COUNTER_CEILING`](store::COUNTER_CEILING).

# Missing sessions

[`SessionStore::get`] never fails because a session is missing: unknown, expired or
malformed ids are replaced with a brand-new session, built by your [`Serializer`].

[`KeyPrefix`]: config::KeyPrefix
[`Serializer`]: serializer::Serializer
*/
pub mod config;
pub mod entropy;
pub mod serializer;

mod backend;
mod id;
mod store_;

pub use config::SessionStoreConfig;
pub use id::SessionId;
pub use store_::{Session, SessionStore};

pub mod store {
    //! Types and traits related to the storage backend of a [`SessionStore`][super::SessionStore].
    pub use crate::backend::errors;
    pub use crate::backend::{COUNTER_CEILING, SessionStorageBackend};
}

pub mod errors {
    //! Errors returned by [`SessionStore`][super::SessionStore].
    pub use crate::entropy::EntropyError;
    pub use crate::store_::errors::*;
}
