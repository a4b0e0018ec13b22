//! Primitive suite: an AEAD with detachable tag plus a matching stream cipher
//!
//! The header codec and the transform engine only see this trait, so the
//! block cipher family can be swapped without touching the container logic.

use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce, Tag};
use ctr::cipher::{KeyIvInit, StreamCipher};

use crate::error::{AuthStage, Field, NestedAesError, Result};

/// Capability interface over one block cipher family.
///
/// `IV_SIZE` doubles as the AEAD nonce size and must not exceed 16 bytes, the
/// widest IV that [`crate::LayerIv`] can carry.
pub trait Suite {
    const NAME: &'static str;
    const KEY_SIZE: usize;
    const IV_SIZE: usize;
    const TAG_SIZE: usize;

    /// Encrypt `buf` in place and return the detached authentication tag.
    fn seal_in_place(key: &[u8], iv: &[u8], aad: &[u8], buf: &mut [u8]) -> Result<Vec<u8>>;

    /// Verify `tag` and decrypt `buf` in place. `stage` is recorded in the
    /// error on failure.
    fn open_in_place(
        key: &[u8],
        iv: &[u8],
        aad: &[u8],
        buf: &mut [u8],
        tag: &[u8],
        stage: AuthStage,
    ) -> Result<()>;

    /// XOR the counter-mode keystream for (`key`, `iv`) into `buf`.
    /// Applying it twice is the identity.
    fn apply_keystream(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<()>;
}

/// AES-256-GCM for the inner layer and the header, AES-256-CTR for rotations.
///
/// The CTR counter block is `IV || 0x00000000`, advanced as a 128-bit
/// big-endian counter.
#[derive(Debug, Clone, Copy, Default)]
pub struct Aes256GcmCtr;

type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;

const AES_BLOCK_SIZE: usize = 16;

impl Aes256GcmCtr {
    fn cipher(key: &[u8]) -> Result<Aes256Gcm> {
        NestedAesError::check_len(Field::Key, Self::KEY_SIZE, key.len())?;
        Aes256Gcm::new_from_slice(key)
            .map_err(|_| NestedAesError::length(Field::Key, Self::KEY_SIZE, key.len()))
    }

    fn nonce(iv: &[u8]) -> Result<&Nonce<aes_gcm::aead::consts::U12>> {
        NestedAesError::check_len(Field::Iv, Self::IV_SIZE, iv.len())?;
        Ok(Nonce::from_slice(iv))
    }
}

impl Suite for Aes256GcmCtr {
    const NAME: &'static str = "AES-256-GCM/AES-256-CTR";
    const KEY_SIZE: usize = 32;
    const IV_SIZE: usize = 12;
    const TAG_SIZE: usize = 16;

    fn seal_in_place(key: &[u8], iv: &[u8], aad: &[u8], buf: &mut [u8]) -> Result<Vec<u8>> {
        let cipher = Self::cipher(key)?;
        let nonce = Self::nonce(iv)?;
        let tag = cipher
            .encrypt_in_place_detached(nonce, aad, buf)
            .map_err(|_| NestedAesError::EncryptionFailed)?;
        Ok(tag.to_vec())
    }

    fn open_in_place(
        key: &[u8],
        iv: &[u8],
        aad: &[u8],
        buf: &mut [u8],
        tag: &[u8],
        stage: AuthStage,
    ) -> Result<()> {
        let cipher = Self::cipher(key)?;
        let nonce = Self::nonce(iv)?;
        NestedAesError::check_len(Field::DataTag, Self::TAG_SIZE, tag.len())?;
        cipher
            .decrypt_in_place_detached(nonce, aad, buf, Tag::from_slice(tag))
            .map_err(|_| NestedAesError::AuthFailed(stage))
    }

    fn apply_keystream(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<()> {
        NestedAesError::check_len(Field::Key, Self::KEY_SIZE, key.len())?;
        NestedAesError::check_len(Field::Iv, Self::IV_SIZE, iv.len())?;

        let mut block = [0u8; AES_BLOCK_SIZE];
        block[..Self::IV_SIZE].copy_from_slice(iv);

        let mut cipher = Aes256Ctr::new_from_slices(key, &block)
            .map_err(|_| NestedAesError::length(Field::Key, Self::KEY_SIZE, key.len()))?;
        cipher
            .try_apply_keystream(buf)
            .map_err(|_| NestedAesError::KeystreamExhausted(buf.len()))
    }
}
