//! Where the random bytes of a session id come from.
use ring::rand::{SecureRandom, SystemRandom};

/// A cryptographically secure source of random bytes.
///
/// Implementations must either fill the whole buffer or fail:
/// a session id is never minted from partial entropy.
pub trait EntropySource: std::fmt::Debug + Send + Sync {
    fn fill(&self, dest: &mut [u8]) -> Result<(), EntropyError>;
}

#[derive(Debug, Clone)]
/// The random number generator provided by the underlying operating system.
///
/// This is the default [`EntropySource`].
pub struct SystemEntropy(SystemRandom);

impl SystemEntropy {
    pub fn new() -> Self {
        Self(SystemRandom::new())
    }
}

impl Default for SystemEntropy {
    fn default() -> Self {
        Self::new()
    }
}

impl EntropySource for SystemEntropy {
    fn fill(&self, dest: &mut [u8]) -> Result<(), EntropyError> {
        self.0
            .fill(dest)
            .map_err(|e| EntropyError::new(dest.len(), e))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Failed to draw {len} bytes from the entropy source")]
/// The entropy source couldn't fill the buffer for a new session id.
pub struct EntropyError {
    len: usize,
    #[source]
    source: anyhow::Error,
}

impl EntropyError {
    pub fn new(len: usize, source: impl Into<anyhow::Error>) -> Self {
        Self {
            len,
            source: source.into(),
        }
    }
}
