use crate::config::KeyPrefix;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;

/// Number of random bytes at the start of every session id.
pub(crate) const ENTROPY_LEN: usize = 64;
const TIMESTAMP_LEN: usize = 8;
const COUNTER_LEN: usize = 4;
const RAW_LEN: usize = ENTROPY_LEN + TIMESTAMP_LEN + COUNTER_LEN;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
/// The identifier for a session.
///
/// It's also the key of the session record in the storage backend.
///
/// # Format stability
///
/// From an API perspective, a session id is an opaque string that starts
/// with the [`KeyPrefix`] of the store that minted it.
/// Do **not** depend on the specifics of the underlying representation.
/// It may change between versions and those changes will not be considered
/// breaking changes.
pub struct SessionId(String);

impl SessionId {
    pub(crate) fn new(id: String) -> Self {
        Self(id)
    }

    /// Lay out entropy, timestamp and counter, then encode them
    /// using the URL-safe base64 alphabet behind `prefix`.
    ///
    /// Only the low 32 bits of `counter` are kept.
    pub(crate) fn compose(
        prefix: &KeyPrefix,
        entropy: &[u8; ENTROPY_LEN],
        unix_nanos: u64,
        counter: u64,
    ) -> Self {
        let mut raw = [0u8; RAW_LEN];
        raw[..ENTROPY_LEN].copy_from_slice(entropy);
        raw[ENTROPY_LEN..ENTROPY_LEN + TIMESTAMP_LEN].copy_from_slice(&unix_nanos.to_be_bytes());
        raw[ENTROPY_LEN + TIMESTAMP_LEN..].copy_from_slice(&(counter as u32).to_be_bytes());

        let mut id = String::with_capacity(prefix.as_str().len() + RAW_LEN.div_ceil(3) * 4);
        id.push_str(prefix.as_str());
        URL_SAFE.encode_string(raw, &mut id);
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::ops::Deref for SessionId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
