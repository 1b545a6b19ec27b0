//! The boundary between typed session payloads and the bytes kept in the storage backend.
//!
//! A [`SessionStore`](crate::SessionStore) never looks inside a payload:
//! it hands it to its [`Serializer`] on the way in and on the way out.
//! [`JsonSerializer`] is a good default; enable the `bincode` feature for
//! a more compact binary codec.
use crate::SessionId;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;

/// Convert session payloads to and from their stored representation,
/// and build the payload for brand-new sessions.
pub trait Serializer: Send + Sync {
    /// The typed session payload.
    type Payload;
    /// The error returned when (de)serialization fails.
    type Error: std::error::Error + Send + Sync + 'static;

    fn marshal(&self, payload: &Self::Payload) -> Result<Vec<u8>, Self::Error>;

    fn unmarshal(&self, raw: &[u8]) -> Result<Self::Payload, Self::Error>;

    /// The payload attached to a session that was just minted
    /// with the given id.
    fn new_payload(&self, id: &SessionId) -> Self::Payload;
}

fn default_payload<T: Default>(_id: &SessionId) -> T {
    T::default()
}

/// A [`Serializer`] that stores payloads as JSON documents.
///
/// The payload for new sessions is built by the closure passed to
/// [`JsonSerializer::new`]. If the payload type implements [`Default`]
/// you can use [`JsonSerializer::default`] instead.
pub struct JsonSerializer<T, F = fn(&SessionId) -> T> {
    fresh: F,
    _payload: PhantomData<fn() -> T>,
}

impl<T, F> JsonSerializer<T, F>
where
    F: Fn(&SessionId) -> T,
{
    pub fn new(fresh: F) -> Self {
        Self {
            fresh,
            _payload: PhantomData,
        }
    }
}

impl<T: Default> Default for JsonSerializer<T> {
    fn default() -> Self {
        Self::new(default_payload::<T>)
    }
}

impl<T, F: Clone> Clone for JsonSerializer<T, F> {
    fn clone(&self) -> Self {
        Self {
            fresh: self.fresh.clone(),
            _payload: PhantomData,
        }
    }
}

impl<T, F> std::fmt::Debug for JsonSerializer<T, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonSerializer")
            .field("payload", &std::any::type_name::<T>())
            .finish_non_exhaustive()
    }
}

impl<T, F> Serializer for JsonSerializer<T, F>
where
    T: Serialize + DeserializeOwned,
    F: Fn(&SessionId) -> T + Send + Sync,
{
    type Payload = T;
    type Error = serde_json::Error;

    fn marshal(&self, payload: &T) -> Result<Vec<u8>, Self::Error> {
        serde_json::to_vec(payload)
    }

    fn unmarshal(&self, raw: &[u8]) -> Result<T, Self::Error> {
        serde_json::from_slice(raw)
    }

    fn new_payload(&self, id: &SessionId) -> T {
        (self.fresh)(id)
    }
}

#[cfg(feature = "bincode")]
pub use binary::{BincodeError, BincodeSerializer};

#[cfg(feature = "bincode")]
mod binary {
    use super::{Serializer, default_payload};
    use crate::SessionId;
    use serde::Serialize;
    use serde::de::DeserializeOwned;
    use std::marker::PhantomData;

    /// A [`Serializer`] that stores payloads using `bincode`'s standard configuration.
    ///
    /// The encoding is compact but not self-describing: changing the
    /// shape of the payload type makes existing records unreadable.
    pub struct BincodeSerializer<T, F = fn(&SessionId) -> T> {
        fresh: F,
        _payload: PhantomData<fn() -> T>,
    }

    impl<T, F> BincodeSerializer<T, F>
    where
        F: Fn(&SessionId) -> T,
    {
        pub fn new(fresh: F) -> Self {
            Self {
                fresh,
                _payload: PhantomData,
            }
        }
    }

    impl<T: Default> Default for BincodeSerializer<T> {
        fn default() -> Self {
            Self::new(default_payload::<T>)
        }
    }

    impl<T, F: Clone> Clone for BincodeSerializer<T, F> {
        fn clone(&self) -> Self {
            Self {
                fresh: self.fresh.clone(),
                _payload: PhantomData,
            }
        }
    }

    impl<T, F> std::fmt::Debug for BincodeSerializer<T, F> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("BincodeSerializer")
                .field("payload", &std::any::type_name::<T>())
                .finish_non_exhaustive()
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    /// The error returned by [`BincodeSerializer`].
    pub enum BincodeError {
        #[error(transparent)]
        Encode(#[from] bincode::error::EncodeError),
        #[error(transparent)]
        Decode(#[from] bincode::error::DecodeError),
        #[error("{0} trailing bytes after the encoded payload")]
        TrailingBytes(usize),
    }

    impl<T, F> Serializer for BincodeSerializer<T, F>
    where
        T: Serialize + DeserializeOwned,
        F: Fn(&SessionId) -> T + Send + Sync,
    {
        type Payload = T;
        type Error = BincodeError;

        fn marshal(&self, payload: &T) -> Result<Vec<u8>, Self::Error> {
            Ok(bincode::serde::encode_to_vec(
                payload,
                bincode::config::standard(),
            )?)
        }

        fn unmarshal(&self, raw: &[u8]) -> Result<T, Self::Error> {
            let (payload, read) =
                bincode::serde::decode_from_slice(raw, bincode::config::standard())?;
            if read != raw.len() {
                return Err(BincodeError::TrailingBytes(raw.len() - read));
            }
            Ok(payload)
        }

        fn new_payload(&self, id: &SessionId) -> T {
            (self.fresh)(id)
        }
    }

}
