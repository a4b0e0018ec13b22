//! Per-layer IV derivation
//!
//! Layer `i` of a container uses `BASE_IV + i`, where the base IV is read as
//! a big-endian unsigned integer of its own width and all arithmetic wraps
//! modulo `2^(8 * width)`. The header of a container with `n` DEKs is sealed
//! under `BASE_IV + (n - 1)`.

use crate::error::{Field, NestedAesError, Result};

/// Widest IV a [`LayerIv`] can carry.
pub const MAX_IV_SIZE: usize = 16;

/// A fixed-width IV held as a bounded unsigned integer.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct LayerIv {
    value: u128,
    width: usize,
}

impl LayerIv {
    /// Parse an IV of exactly `width` bytes.
    pub fn from_bytes(bytes: &[u8], width: usize) -> Result<Self> {
        if width == 0 || width > MAX_IV_SIZE {
            return Err(NestedAesError::length(Field::Iv, MAX_IV_SIZE, width));
        }
        NestedAesError::check_len(Field::Iv, width, bytes.len())?;

        let mut buf = [0u8; MAX_IV_SIZE];
        buf[MAX_IV_SIZE - width..].copy_from_slice(bytes);
        Ok(Self {
            value: u128::from_be_bytes(buf),
            width,
        })
    }

    /// The IV of `layer`, derived from a container's base IV.
    pub fn derive(base: &[u8], layer: usize) -> Result<Self> {
        let mut iv = Self::from_bytes(base, base.len())?;
        iv.increment_by(layer as u128);
        Ok(iv)
    }

    /// Add `n`, wrapping at the IV width.
    pub fn increment_by(&mut self, n: u128) {
        self.value = self.value.wrapping_add(n) & self.mask();
    }

    /// Subtract one, wrapping at the IV width.
    pub fn decrement(&mut self) {
        self.value = self.value.wrapping_sub(1) & self.mask();
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Big-endian bytes, exactly `width` long.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.value.to_be_bytes()[MAX_IV_SIZE - self.width..].to_vec()
    }

    fn mask(&self) -> u128 {
        if self.width == MAX_IV_SIZE {
            u128::MAX
        } else {
            (1u128 << (8 * self.width)) - 1
        }
    }
}

impl std::fmt::Debug for LayerIv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("LayerIv")
            .field(&hex::encode(self.to_bytes()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn derive_adds_layer_to_low_bytes() {
        let base = [0u8; 12];
        let iv = LayerIv::derive(&base, 0x0102).unwrap();
        let mut expected = [0u8; 12];
        expected[10] = 0x01;
        expected[11] = 0x02;
        assert_eq!(iv.to_bytes(), expected);
    }

    #[test]
    fn increment_carries_across_bytes() {
        let mut base = [0u8; 12];
        base[11] = 0xFF;
        base[10] = 0xFF;
        let iv = LayerIv::derive(&base, 1).unwrap();

        let mut expected = [0u8; 12];
        expected[9] = 0x01;
        assert_eq!(iv.to_bytes(), expected);
    }

    #[test]
    fn increment_wraps_at_width() {
        let mut iv = LayerIv::from_bytes(&[0xFF; 12], 12).unwrap();
        iv.increment_by(1);
        assert_eq!(iv.to_bytes(), vec![0u8; 12]);
    }

    #[test]
    fn decrement_wraps_at_width() {
        let mut iv = LayerIv::from_bytes(&[0u8; 12], 12).unwrap();
        iv.decrement();
        assert_eq!(iv.to_bytes(), vec![0xFF; 12]);
    }

    #[test]
    fn full_width_iv_wraps() {
        let mut iv = LayerIv::from_bytes(&[0xFF; 16], 16).unwrap();
        iv.increment_by(2);
        let mut expected = [0u8; 16];
        expected[15] = 1;
        assert_eq!(iv.to_bytes(), expected);
    }

    #[test]
    fn rejects_bad_widths() {
        assert!(LayerIv::from_bytes(&[0u8; 11], 12).is_err());
        assert!(LayerIv::from_bytes(&[0u8; 17], 17).is_err());
        assert!(LayerIv::derive(&[], 0).is_err());
    }

    proptest! {
        #[test]
        fn decrement_undoes_increment(
            base in proptest::collection::vec(any::<u8>(), 12),
            layers in 0usize..2_000,
        ) {
            let mut iv = LayerIv::derive(&base, layers).unwrap();
            for _ in 0..layers {
                iv.decrement();
            }
            prop_assert_eq!(iv, LayerIv::from_bytes(&base, base.len()).unwrap());
        }

        #[test]
        fn distinct_layers_give_distinct_ivs(
            base in proptest::collection::vec(any::<u8>(), 12),
            a in 0usize..1_000_000,
            b in 0usize..1_000_000,
        ) {
            prop_assume!(a != b);
            let iv_a = LayerIv::derive(&base, a).unwrap();
            let iv_b = LayerIv::derive(&base, b).unwrap();
            prop_assert_ne!(iv_a.to_bytes(), iv_b.to_bytes());
        }
    }
}
