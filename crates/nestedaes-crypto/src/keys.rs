//! Key material: key-encrypting keys, data-encryption keys and base IVs

use rand::RngCore;
use zeroize::Zeroize;

use crate::suite::Suite;

/// A key-encrypting key. Seals the DEK list in a container header and is
/// replaced on every rotation. Zeroized on drop.
#[derive(Clone)]
pub struct Kek {
    bytes: Vec<u8>,
}

/// A per-layer data-encryption key. Zeroized on drop.
#[derive(Clone)]
pub struct Dek {
    bytes: Vec<u8>,
}

impl Kek {
    /// Length is checked where the key is used, against the suite in play.
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
        }
    }

    /// Generate a random KEK sized for `S`.
    pub fn generate<S: Suite>() -> Self {
        Self {
            bytes: random_bytes(S::KEY_SIZE),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Dek {
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
        }
    }

    /// Generate a random DEK sized for `S`.
    pub fn generate<S: Suite>() -> Self {
        Self {
            bytes: random_bytes(S::KEY_SIZE),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Drop for Kek {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl Drop for Dek {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for Kek {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kek").field("bytes", &"[REDACTED]").finish()
    }
}

impl std::fmt::Debug for Dek {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dek").field("bytes", &"[REDACTED]").finish()
    }
}

/// The per-container IV seed.
///
/// Not secret, but it must never be reused across two independently keyed
/// containers: every layer IV is derived from it.
#[derive(Clone, PartialEq, Eq)]
pub struct BaseIv {
    bytes: Vec<u8>,
}

impl BaseIv {
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
        }
    }

    /// Generate a random base IV sized for `S`.
    pub fn generate<S: Suite>() -> Self {
        Self {
            bytes: random_bytes(S::IV_SIZE),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for BaseIv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("BaseIv").field(&hex::encode(&self.bytes)).finish()
    }
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}
