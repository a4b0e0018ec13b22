//! Container header codec
//!
//! Wire format:
//! ```text
//! [4 bytes: size, u32 BE][IV_SIZE bytes: base IV][encrypted part][TAG_SIZE bytes: header tag]
//! encrypted part (plaintext) = [TAG_SIZE bytes: data tag][KEY_SIZE bytes: DEK_0]...[DEK_{n-1}]
//! ```
//!
//! The encrypted part is sealed under the current KEK at IV `base IV + (n-1)`
//! with no associated data. The size field covers the whole header,
//! including itself and the header tag.

use std::fmt;
use std::marker::PhantomData;

use zeroize::Zeroizing;

use crate::error::{AuthStage, Field, NestedAesError, Result};
use crate::iv::LayerIv;
use crate::keys::Dek;
use crate::suite::{Aes256GcmCtr, Suite};
use crate::SIZE_FIELD_LEN;

/// The part of a header readable without any key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlainHeader {
    /// Total header length in bytes
    pub size: u32,
    pub base_iv: Vec<u8>,
}

impl PlainHeader {
    /// Read the plain part from the front of a header or of a whole blob.
    pub fn peek<S: Suite>(data: &[u8]) -> Result<Self> {
        let min = SIZE_FIELD_LEN + S::IV_SIZE;
        if data.len() < min {
            return Err(NestedAesError::BlobTooShort {
                got: data.len(),
                min,
            });
        }

        let size = read_size(data)?;
        let base_iv = data[SIZE_FIELD_LEN..min].to_vec();
        Ok(Self { size, base_iv })
    }

    /// Number of encryption layers, derived from the header size alone.
    pub fn layer_count<S: Suite>(&self) -> Result<usize> {
        let encrypted_len = (self.size as usize)
            .checked_sub(SIZE_FIELD_LEN + S::IV_SIZE)
            .ok_or(NestedAesError::PartialDekEntry)?;
        dek_count::<S>(encrypted_len)
    }
}

/// A decrypted container header.
pub struct Header<S: Suite = Aes256GcmCtr> {
    size: u32,
    base_iv: Vec<u8>,
    data_tag: Vec<u8>,
    deks: Vec<Dek>,
    _suite: PhantomData<S>,
}

impl<S: Suite> Header<S> {
    /// Create a header holding the first DEK.
    pub fn new(base_iv: &[u8], data_tag: &[u8], dek: &Dek) -> Result<Self> {
        NestedAesError::check_len(Field::BaseIv, S::IV_SIZE, base_iv.len())?;
        NestedAesError::check_len(Field::DataTag, S::TAG_SIZE, data_tag.len())?;
        NestedAesError::check_len(Field::Dek, S::KEY_SIZE, dek.as_bytes().len())?;

        let size = SIZE_FIELD_LEN + S::IV_SIZE + S::TAG_SIZE + S::KEY_SIZE + S::TAG_SIZE;
        Ok(Self {
            size: to_size_field(size)?,
            base_iv: base_iv.to_vec(),
            data_tag: data_tag.to_vec(),
            deks: vec![dek.clone()],
            _suite: PhantomData,
        })
    }

    /// Append the DEK of a new outermost layer.
    pub fn add_dek(&mut self, dek: Dek) -> Result<()> {
        NestedAesError::check_len(Field::Dek, S::KEY_SIZE, dek.as_bytes().len())?;
        self.size = to_size_field(self.size as usize + S::KEY_SIZE)?;
        self.deks.push(dek);
        Ok(())
    }

    /// Serialize the header, sealing the DEK list under `kek`.
    pub fn marshal(&self, kek: &[u8]) -> Result<Vec<u8>> {
        NestedAesError::check_len(Field::Kek, S::KEY_SIZE, kek.len())?;
        if self.deks.is_empty() {
            return Err(NestedAesError::NoDeks);
        }

        let mut sealed = Zeroizing::new(Vec::with_capacity(
            S::TAG_SIZE + self.deks.len() * S::KEY_SIZE,
        ));
        sealed.extend_from_slice(&self.data_tag);
        for dek in &self.deks {
            sealed.extend_from_slice(dek.as_bytes());
        }

        // TODO: bind size and base IV as associated data once the format is versioned
        let iv = LayerIv::derive(&self.base_iv, self.deks.len() - 1)?;
        let tag = S::seal_in_place(kek, &iv.to_bytes(), &[], &mut sealed)?;

        let mut out = Vec::with_capacity(self.size as usize);
        out.extend_from_slice(&self.size.to_be_bytes());
        out.extend_from_slice(&self.base_iv);
        out.extend_from_slice(&sealed);
        out.extend_from_slice(&tag);
        Ok(out)
    }

    /// Parse and decrypt a marshalled header with the current KEK.
    pub fn unmarshal(kek: &[u8], data: &[u8]) -> Result<Self> {
        NestedAesError::check_len(Field::Kek, S::KEY_SIZE, kek.len())?;

        let plain = PlainHeader::peek::<S>(data)?;
        if plain.size as usize != data.len() {
            return Err(NestedAesError::HeaderSizeMismatch {
                declared: plain.size as usize,
                actual: data.len(),
            });
        }

        let encrypted = &data[SIZE_FIELD_LEN + S::IV_SIZE..];
        let n = dek_count::<S>(encrypted.len())?;
        let iv = LayerIv::derive(&plain.base_iv, n - 1)?;

        let (ciphertext, tag) = encrypted.split_at(encrypted.len() - S::TAG_SIZE);
        let mut opened = Zeroizing::new(ciphertext.to_vec());
        S::open_in_place(kek, &iv.to_bytes(), &[], &mut opened, tag, AuthStage::Header)?;

        let (data_tag, keys) = opened.split_at(S::TAG_SIZE);
        let deks = keys.chunks_exact(S::KEY_SIZE).map(Dek::from_slice).collect();

        Ok(Self {
            size: plain.size,
            base_iv: plain.base_iv,
            data_tag: data_tag.to_vec(),
            deks,
            _suite: PhantomData,
        })
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn base_iv(&self) -> &[u8] {
        &self.base_iv
    }

    pub fn data_tag(&self) -> &[u8] {
        &self.data_tag
    }

    /// DEKs, oldest (innermost layer) first.
    pub fn deks(&self) -> &[Dek] {
        &self.deks
    }

    pub fn dek_count(&self) -> usize {
        self.deks.len()
    }

    pub fn plain(&self) -> PlainHeader {
        PlainHeader {
            size: self.size,
            base_iv: self.base_iv.clone(),
        }
    }
}

impl<S: Suite> fmt::Display for Header<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{{")?;
        writeln!(f, "\tSize: {},", self.size)?;
        writeln!(f, "\tBaseIV: {},", hex::encode(&self.base_iv))?;
        writeln!(f, "\tDataTag: {},", hex::encode(&self.data_tag))?;
        writeln!(f, "\tDEKs: {} [REDACTED],", self.deks.len())?;
        write!(f, "}}")
    }
}

impl<S: Suite> fmt::Debug for Header<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Header")
            .field("suite", &S::NAME)
            .field("size", &self.size)
            .field("base_iv", &hex::encode(&self.base_iv))
            .field("data_tag", &hex::encode(&self.data_tag))
            .field("deks", &self.deks.len())
            .finish()
    }
}

/// Read the big-endian size field at the front of `data`.
pub(crate) fn read_size(data: &[u8]) -> Result<u32> {
    let field: [u8; SIZE_FIELD_LEN] = data
        .get(..SIZE_FIELD_LEN)
        .and_then(|b| b.try_into().ok())
        .ok_or(NestedAesError::BlobTooShort {
            got: data.len(),
            min: SIZE_FIELD_LEN,
        })?;
    Ok(u32::from_be_bytes(field))
}

/// DEK count of an encrypted part of `encrypted_len` bytes: one header tag,
/// one data tag, then whole keys only.
fn dek_count<S: Suite>(encrypted_len: usize) -> Result<usize> {
    let keys_len = encrypted_len
        .checked_sub(2 * S::TAG_SIZE)
        .ok_or(NestedAesError::PartialDekEntry)?;
    if keys_len % S::KEY_SIZE != 0 {
        return Err(NestedAesError::PartialDekEntry);
    }

    match keys_len / S::KEY_SIZE {
        0 => Err(NestedAesError::NoDeks),
        n => Ok(n),
    }
}

fn to_size_field(size: usize) -> Result<u32> {
    u32::try_from(size).map_err(|_| NestedAesError::HeaderTooLarge(size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{IV_SIZE, KEY_SIZE, TAG_SIZE};
    use aes_gcm::aead::{Aead, KeyInit};
    use aes_gcm::{Aes256Gcm, Nonce};
    use proptest::prelude::*;

    const IV: &[u8; 12] = b"abcdefghijkl";
    const TAG: &[u8; 16] = b"qrstuvwxyzABCDEF";
    const KEK: &[u8; 32] = b"66666666666666666666666666666666";

    fn test_deks() -> Vec<Dek> {
        [
            b"11111111111111111111111111111111",
            b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
            b"22222222222222222222222222222222",
            b"bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb",
            b"33333333333333333333333333333333",
            b"cccccccccccccccccccccccccccccccc",
        ]
        .iter()
        .map(|k| Dek::from_slice(*k))
        .collect()
    }

    fn dek_bytes(h: &Header) -> Vec<&[u8]> {
        h.deks().iter().map(Dek::as_bytes).collect()
    }

    fn test_header() -> Header {
        let deks = test_deks();
        let mut h: Header = Header::new(IV, TAG, &deks[0]).unwrap();
        for dek in &deks[1..] {
            h.add_dek(dek.clone()).unwrap();
        }
        h
    }

    #[test]
    fn test_new_header_size() {
        let h: Header = Header::new(IV, TAG, &test_deks()[0]).unwrap();
        assert_eq!(h.size() as usize, 4 + IV_SIZE + TAG_SIZE + KEY_SIZE + TAG_SIZE);
        assert_eq!(h.dek_count(), 1);
    }

    #[test]
    fn test_new_rejects_wrong_lengths() {
        let dek = &test_deks()[0];
        assert!(matches!(
            Header::<Aes256GcmCtr>::new(&IV[..8], TAG, dek),
            Err(NestedAesError::InvalidLength { field: Field::BaseIv, .. })
        ));
        assert!(matches!(
            Header::<Aes256GcmCtr>::new(IV, &TAG[..15], dek),
            Err(NestedAesError::InvalidLength { field: Field::DataTag, .. })
        ));
        assert!(matches!(
            Header::<Aes256GcmCtr>::new(IV, TAG, &Dek::from_slice(&[1u8; 16])),
            Err(NestedAesError::InvalidLength { field: Field::Dek, .. })
        ));
    }

    #[test]
    fn test_add_dek_rejects_wrong_length() {
        let mut h = test_header();
        let before = h.size();
        let err = h.add_dek(Dek::from_slice(&[0u8; 31])).unwrap_err();

        assert!(matches!(
            err,
            NestedAesError::InvalidLength { field: Field::Dek, expected: 32, got: 31 }
        ));
        assert_eq!(h.size(), before, "failed append must not change the size");
    }

    #[test]
    fn test_marshal_unmarshal_roundtrip() {
        let h = test_header();
        assert_eq!(h.dek_count(), 6);

        let data = h.marshal(KEK).unwrap();
        assert_eq!(data.len(), h.size() as usize);

        let h2: Header = Header::unmarshal(KEK, &data).unwrap();
        assert_eq!(h2.size(), h.size());
        assert_eq!(h2.base_iv(), h.base_iv());
        assert_eq!(h2.data_tag(), h.data_tag());
        assert_eq!(dek_bytes(&h2), dek_bytes(&h));
    }

    #[test]
    fn test_unmarshal_wrong_kek() {
        let data = test_header().marshal(KEK).unwrap();
        let err = Header::<Aes256GcmCtr>::unmarshal(&[7u8; 32], &data).unwrap_err();
        assert!(matches!(err, NestedAesError::AuthFailed(AuthStage::Header)));
    }

    #[test]
    fn test_unmarshal_detects_tampering() {
        let data = test_header().marshal(KEK).unwrap();
        for i in (4 + IV_SIZE)..data.len() {
            let mut tampered = data.clone();
            tampered[i] ^= 0x01;
            let err = Header::<Aes256GcmCtr>::unmarshal(KEK, &tampered).unwrap_err();
            assert!(err.is_auth_failure(), "byte {i}: {err:?}");
        }
    }

    #[test]
    fn test_unmarshal_detects_base_iv_change() {
        let mut data = test_header().marshal(KEK).unwrap();
        data[4] ^= 0x80;
        let err = Header::<Aes256GcmCtr>::unmarshal(KEK, &data).unwrap_err();
        assert!(err.is_auth_failure());
    }

    #[test]
    fn test_unmarshal_size_mismatch() {
        let mut data = test_header().marshal(KEK).unwrap();
        data.push(0);
        assert!(matches!(
            Header::<Aes256GcmCtr>::unmarshal(KEK, &data),
            Err(NestedAesError::HeaderSizeMismatch { .. })
        ));
    }

    #[test]
    fn test_unmarshal_partial_entry() {
        let mut data = test_header().marshal(KEK).unwrap();
        data.truncate(data.len() - 5);
        let size = data.len() as u32;
        data[..4].copy_from_slice(&size.to_be_bytes());

        assert!(matches!(
            Header::<Aes256GcmCtr>::unmarshal(KEK, &data),
            Err(NestedAesError::PartialDekEntry)
        ));
    }

    #[test]
    fn test_unmarshal_zero_deks() {
        let mut data = vec![0u8; 4 + IV_SIZE + 2 * TAG_SIZE];
        let size = data.len() as u32;
        data[..4].copy_from_slice(&size.to_be_bytes());

        assert!(matches!(
            Header::<Aes256GcmCtr>::unmarshal(KEK, &data),
            Err(NestedAesError::NoDeks)
        ));
    }

    #[test]
    fn test_unmarshal_truncated() {
        assert!(matches!(
            Header::<Aes256GcmCtr>::unmarshal(KEK, &[0, 0]),
            Err(NestedAesError::BlobTooShort { .. })
        ));
    }

    #[test]
    fn test_marshal_rejects_wrong_kek_length() {
        assert!(matches!(
            test_header().marshal(&KEK[..16]),
            Err(NestedAesError::InvalidLength { field: Field::Kek, .. })
        ));
    }

    /// The encrypted part is sealed with empty associated data: the plain
    /// size and base IV are not bound into the header tag, only the IV
    /// derived from the base IV is.
    #[test]
    fn test_header_ciphertext_has_no_associated_data() {
        let h = test_header();
        let data = h.marshal(KEK).unwrap();

        let iv = LayerIv::derive(IV, h.dek_count() - 1).unwrap().to_bytes();
        let cipher = Aes256Gcm::new_from_slice(KEK).unwrap();
        let opened = cipher
            .decrypt(Nonce::from_slice(&iv), &data[4 + IV_SIZE..])
            .unwrap();

        assert_eq!(&opened[..TAG_SIZE], TAG);
        assert_eq!(opened.len(), TAG_SIZE + 6 * KEY_SIZE);
    }

    #[test]
    fn test_plain_header_layer_count() {
        let data = test_header().marshal(KEK).unwrap();
        let plain = PlainHeader::peek::<Aes256GcmCtr>(&data).unwrap();

        assert_eq!(plain.base_iv, IV);
        assert_eq!(plain.size as usize, data.len());
        assert_eq!(plain.layer_count::<Aes256GcmCtr>().unwrap(), 6);
    }

    #[test]
    fn test_display_redacts_deks() {
        let rendered = test_header().to_string();
        assert!(rendered.contains("DEKs: 6 [REDACTED]"));
        assert!(rendered.contains(&hex::encode(IV)));
        assert!(!rendered.contains(&hex::encode(b"11111111")));
    }

    proptest! {
        #[test]
        fn marshalled_size_matches_size_field(
            layers in 1usize..20,
            seed in any::<u8>(),
        ) {
            let dek = Dek::from_slice(&[seed; KEY_SIZE]);
            let mut h: Header = Header::new(IV, TAG, &dek).unwrap();
            for i in 1..layers {
                h.add_dek(Dek::from_slice(&[seed.wrapping_add(i as u8); KEY_SIZE])).unwrap();
            }

            let data = h.marshal(KEK).unwrap();
            prop_assert_eq!(data.len(), h.size() as usize);

            let h2: Header = Header::unmarshal(KEK, &data).unwrap();
            prop_assert_eq!(dek_bytes(&h2), dek_bytes(&h));
            prop_assert_eq!(h2.dek_count(), layers);
        }
    }
}
