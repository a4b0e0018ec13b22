//! nestedaes-crypto: updatable encryption by nested AES
//!
//! Implements the "simple nested construction" from Boneh, Eskandarian, Kim
//! and Shih, *Improving Speed and Security in Updatable Encryption Schemes*
//! (ASIACRYPT 2020, section 4.1). A ciphertext can be rotated to a fresh
//! key-encrypting key without the plaintext ever being reconstructed.
//!
//! Container ("blob") layout, big-endian throughout:
//! ```text
//! BLOB         := HEADER || PAYLOAD
//! HEADER       := SIZE (u32) || BASE_IV || ENC_HEADER
//! ENC_HEADER   := AEAD(KEK, BASE_IV + (n-1), DATA_TAG || DEK_0 || ... || DEK_{n-1})
//! PAYLOAD      := CTR_{DEK_{n-1}}( ... CTR_{DEK_1}( GCM_{DEK_0}(plaintext) ) ... )
//! ```
//!
//! Layer 0 is AES-256-GCM under a random DEK and a zero nonce, with its tag
//! moved into the header. Every rotation appends a DEK and applies one
//! AES-256-CTR pass over the whole payload, keyed by that DEK at IV
//! `BASE_IV + layer`. The KEK is replaced on every rotation.

pub mod blob;
pub mod error;
pub mod header;
pub mod iv;
pub mod keys;
pub mod nested;
pub mod suite;

pub use blob::{join, split};
pub use error::{AuthStage, Field, NestedAesError, Result};
pub use header::{Header, PlainHeader};
pub use iv::LayerIv;
pub use keys::{BaseIv, Dek, Kek};
pub use nested::{
    decrypt, decrypt_with, encrypt, encrypt_with, reencrypt, reencrypt_with,
    reencrypt_with_keys, reencrypt_with_keys_and_suite,
};
pub use suite::{Aes256GcmCtr, Suite};

/// Size of a KEK or DEK in bytes for the default suite (AES-256)
pub const KEY_SIZE: usize = Aes256GcmCtr::KEY_SIZE;

/// Size of the base IV for the default suite (96-bit GCM nonce)
pub const IV_SIZE: usize = Aes256GcmCtr::IV_SIZE;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = Aes256GcmCtr::TAG_SIZE;

/// Width of the big-endian size field that opens every header
pub const SIZE_FIELD_LEN: usize = 4;
