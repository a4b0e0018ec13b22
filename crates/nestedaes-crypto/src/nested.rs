//! Encrypt, reencrypt (key rotation) and decrypt
//!
//! Buffer convention: the transforms that consume a blob take it by value
//! and reuse its allocation for their output. The payload is rewritten in
//! place, so no extra payload-sized copy is made, but the caller never holds
//! a buffer that a failed call left half transformed.
//!
//! All `*_with` forms are generic over the [`Suite`]; the plain forms use
//! [`Aes256GcmCtr`].

use tracing::{debug, trace};

use crate::blob::{join, split_mut};
use crate::error::{AuthStage, Field, NestedAesError, Result};
use crate::header::Header;
use crate::iv::LayerIv;
use crate::keys::{Dek, Kek};
use crate::suite::{Aes256GcmCtr, Suite};

/// Encrypt `plaintext` into a new single-layer blob.
///
/// - `kek`: the key-encrypting key sealing the header
/// - `base_iv`: random per-container IV seed; must never be passed twice
/// - `aad`: associated data bound to the inner AEAD layer (may be empty)
pub fn encrypt(plaintext: &[u8], kek: &[u8], base_iv: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    encrypt_with::<Aes256GcmCtr>(plaintext, kek, base_iv, aad)
}

pub fn encrypt_with<S: Suite>(
    plaintext: &[u8],
    kek: &[u8],
    base_iv: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    NestedAesError::check_len(Field::Kek, S::KEY_SIZE, kek.len())?;
    NestedAesError::check_len(Field::BaseIv, S::IV_SIZE, base_iv.len())?;

    // The DEK is fresh and used for this one message, so a zero nonce is unique.
    let dek = Dek::generate::<S>();
    let zero_nonce = vec![0u8; S::IV_SIZE];

    let mut payload = plaintext.to_vec();
    let data_tag = S::seal_in_place(dek.as_bytes(), &zero_nonce, aad, &mut payload)?;

    let header = Header::<S>::new(base_iv, &data_tag, &dek)?;
    let header_bytes = header.marshal(kek)?;

    debug!(
        suite = S::NAME,
        header_len = header_bytes.len(),
        payload_len = payload.len(),
        "encrypted blob"
    );
    Ok(join(&header_bytes, &payload))
}

/// Rotate `blob` to a fresh KEK, adding one encryption layer.
///
/// Returns the new blob and the new KEK; `kek` no longer opens the result.
pub fn reencrypt(blob: Vec<u8>, kek: &[u8]) -> Result<(Vec<u8>, Kek)> {
    reencrypt_with::<Aes256GcmCtr>(blob, kek)
}

pub fn reencrypt_with<S: Suite>(blob: Vec<u8>, kek: &[u8]) -> Result<(Vec<u8>, Kek)> {
    let new_kek = Kek::generate::<S>();
    let new_dek = Dek::generate::<S>();
    let blob = reencrypt_with_keys_and_suite::<S>(blob, kek, &new_kek, new_dek)?;
    Ok((blob, new_kek))
}

/// [`reencrypt`] with caller-supplied key material.
///
/// `new_kek` and `new_dek` must be fresh random keys: reusing a DEK within one
/// blob lineage repeats a (key, IV) pair.
pub fn reencrypt_with_keys(
    blob: Vec<u8>,
    kek: &[u8],
    new_kek: &Kek,
    new_dek: Dek,
) -> Result<Vec<u8>> {
    reencrypt_with_keys_and_suite::<Aes256GcmCtr>(blob, kek, new_kek, new_dek)
}

pub fn reencrypt_with_keys_and_suite<S: Suite>(
    mut blob: Vec<u8>,
    kek: &[u8],
    new_kek: &Kek,
    new_dek: Dek,
) -> Result<Vec<u8>> {
    NestedAesError::check_len(Field::Kek, S::KEY_SIZE, new_kek.as_bytes().len())?;
    NestedAesError::check_len(Field::Dek, S::KEY_SIZE, new_dek.as_bytes().len())?;

    let (header_bytes, payload) = split_mut(&mut blob)?;
    let old_header_len = header_bytes.len();
    let mut header = Header::<S>::unmarshal(kek, header_bytes)?;

    let layer = header.dek_count();
    header.add_dek(new_dek)?;

    let iv = LayerIv::derive(header.base_iv(), layer)?;
    trace!(layer, "applying rotation layer");
    S::apply_keystream(header.deks()[layer].as_bytes(), &iv.to_bytes(), payload)?;

    let new_header = header.marshal(new_kek.as_bytes())?;
    debug!(
        suite = S::NAME,
        layers = header.dek_count(),
        payload_len = payload.len(),
        "reencrypted blob"
    );

    drop(blob.splice(..old_header_len, new_header));
    Ok(blob)
}

/// Decrypt `blob` with its current KEK, removing every layer.
///
/// Fails with an authentication error for a stale or wrong KEK and for
/// tampering at any layer.
pub fn decrypt(blob: Vec<u8>, kek: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    decrypt_with::<Aes256GcmCtr>(blob, kek, aad)
}

pub fn decrypt_with<S: Suite>(mut blob: Vec<u8>, kek: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let (header_bytes, payload) = split_mut(&mut blob)?;
    let header_len = header_bytes.len();
    let header = Header::<S>::unmarshal(kek, header_bytes)?;

    let layers = header.dek_count();
    debug!(
        suite = S::NAME,
        layers,
        payload_len = payload.len(),
        "decrypting blob"
    );

    // Rotation layers come off newest first; each DEK pairs with its own IV.
    let mut iv = LayerIv::derive(header.base_iv(), layers - 1)?;
    for layer in (1..layers).rev() {
        trace!(layer, "removing rotation layer");
        S::apply_keystream(header.deks()[layer].as_bytes(), &iv.to_bytes(), payload)?;
        iv.decrement();
    }

    let zero_nonce = vec![0u8; S::IV_SIZE];
    S::open_in_place(
        header.deks()[0].as_bytes(),
        &zero_nonce,
        aad,
        payload,
        header.data_tag(),
        AuthStage::Payload,
    )?;

    let plaintext_len = blob.len() - header_len;
    blob.copy_within(header_len.., 0);
    blob.truncate(plaintext_len);
    Ok(blob)
}
