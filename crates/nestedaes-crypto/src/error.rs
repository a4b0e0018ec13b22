use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, NestedAesError>;

/// Fixed-length fields whose size is checked before any cipher runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Kek,
    Dek,
    Key,
    BaseIv,
    DataTag,
    Iv,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Field::Kek => "KEK",
            Field::Dek => "DEK",
            Field::Key => "key",
            Field::BaseIv => "base IV",
            Field::DataTag => "data tag",
            Field::Iv => "IV",
        };
        f.write_str(name)
    }
}

/// Which AEAD check rejected the input.
///
/// Only visible through `Debug`: the displayed message is the same for a
/// wrong key and for tampered data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStage {
    Header,
    Payload,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum NestedAesError {
    #[error("invalid {field} length: expected {expected} bytes, got {got}")]
    InvalidLength {
        field: Field,
        expected: usize,
        got: usize,
    },

    #[error("blob too short: {got} bytes (need at least {min})")]
    BlobTooShort { got: usize, min: usize },

    #[error("header size ({header} bytes) exceeds blob size ({blob} bytes)")]
    HeaderExceedsBlob { header: usize, blob: usize },

    #[error("header size field is {declared} but marshalled header is {actual} bytes")]
    HeaderSizeMismatch { declared: usize, actual: usize },

    #[error("header has a partial DEK entry")]
    PartialDekEntry,

    #[error("header has zero DEKs")]
    NoDeks,

    #[error("header too large: {0} bytes does not fit the size field")]
    HeaderTooLarge(usize),

    #[error("keystream exhausted for a {0}-byte payload")]
    KeystreamExhausted(usize),

    #[error("encryption failed")]
    EncryptionFailed,

    /// Wrong key or tampered data. The stage is kept for debugging only.
    #[error("authentication failed")]
    AuthFailed(AuthStage),
}

impl NestedAesError {
    pub(crate) fn length(field: Field, expected: usize, got: usize) -> Self {
        Self::InvalidLength {
            field,
            expected,
            got,
        }
    }

    pub(crate) fn check_len(field: Field, expected: usize, got: usize) -> Result<()> {
        if expected == got {
            Ok(())
        } else {
            Err(Self::length(field, expected, got))
        }
    }

    /// True for failures of an AEAD check (wrong key or tampering).
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::AuthFailed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_display_identically() {
        let header = NestedAesError::AuthFailed(AuthStage::Header);
        let payload = NestedAesError::AuthFailed(AuthStage::Payload);

        assert_eq!(header.to_string(), payload.to_string());
        assert_ne!(format!("{header:?}"), format!("{payload:?}"));
        assert!(header.is_auth_failure());
    }

    #[test]
    fn length_error_names_field() {
        let err = NestedAesError::length(Field::BaseIv, 12, 7);
        assert_eq!(
            err.to_string(),
            "invalid base IV length: expected 12 bytes, got 7"
        );
        assert!(!err.is_auth_failure());
    }
}
