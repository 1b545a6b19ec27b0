/// The suffix appended to the key prefix to obtain the key of the rollover counter.
const COUNTER_SUFFIX: &str = "incr";

#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(transparent)]
/// The namespace shared by every key a [`SessionStore`](crate::SessionStore) touches.
///
/// It can't be empty: an empty prefix would make every key in the
/// storage backend look like a session id.
pub struct KeyPrefix(String);

impl<'de> serde::Deserialize<'de> for KeyPrefix {
    fn deserialize<D>(deserializer: D) -> Result<KeyPrefix, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        KeyPrefix::new(value).map_err(serde::de::Error::custom)
    }
}

impl Default for KeyPrefix {
    fn default() -> Self {
        Self("session:".into())
    }
}

impl KeyPrefix {
    pub fn new(value: impl Into<String>) -> Result<Self, InvalidKeyPrefix> {
        let value = value.into();
        if value.is_empty() {
            Err(InvalidKeyPrefix(()))
        } else {
            Ok(Self(value))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The key of the shared rollover counter, `<prefix>incr`.
    pub fn counter_key(&self) -> String {
        format!("{}{COUNTER_SUFFIX}", self.0)
    }

    /// Returns `true` if `id` lives in this namespace and isn't the
    /// reserved counter key (or anything starting with it).
    pub fn owns(&self, id: &str) -> bool {
        match id.strip_prefix(self.0.as_str()) {
            Some(rest) => !rest.starts_with(COUNTER_SUFFIX),
            None => false,
        }
    }
}

impl TryFrom<String> for KeyPrefix {
    type Error = InvalidKeyPrefix;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for KeyPrefix {
    type Error = InvalidKeyPrefix;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl std::fmt::Display for KeyPrefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug)]
/// Error raised when trying to create a [`KeyPrefix`] from an empty string.
pub struct InvalidKeyPrefix(());

impl std::fmt::Display for InvalidKeyPrefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "The key prefix for session ids can't be empty")
    }
}

impl std::error::Error for InvalidKeyPrefix {}
