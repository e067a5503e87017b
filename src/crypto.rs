//! Cryptographic seam.
//!
//! Key exchange and the symmetric cipher are supplied by the embedding
//! application; the client only moves their output around.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;

/// Failure reported by a [`CipherService`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cipher error: {0}")]
pub struct CipherError(pub String);

/// Session key material agreed during the handshake.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedSecret(Bytes);

impl SharedSecret {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedSecret(<{} bytes>)", self.0.len())
    }
}

/// Keys produced by key exchange, threaded through the login phases.
#[derive(Debug, Clone)]
pub struct SessionKeys {
    secret: Arc<SharedSecret>,
}

impl SessionKeys {
    pub fn new(secret: SharedSecret) -> Self {
        Self {
            secret: Arc::new(secret),
        }
    }

    pub fn secret(&self) -> &SharedSecret {
        &self.secret
    }
}

/// Opaque key exchange and symmetric cipher.
pub trait CipherService: Send + Sync {
    fn derive_shared_secret(&self) -> Result<SharedSecret, CipherError>;

    fn encrypt(&self, secret: &SharedSecret, plaintext: &[u8]) -> Result<Vec<u8>, CipherError>;

    fn decrypt(&self, secret: &SharedSecret, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError>;
}
