//! Blob codec: `HEADER || PAYLOAD`, where the first four header bytes give
//! the header length.

use crate::error::{NestedAesError, Result};
use crate::header::read_size;

/// Split a blob into its header and payload.
///
/// A header length larger than the blob means truncation or corruption. An
/// empty payload is accepted: it is what an empty plaintext encrypts to.
pub fn split(blob: &[u8]) -> Result<(&[u8], &[u8])> {
    let header_len = header_len(blob)?;
    Ok(blob.split_at(header_len))
}

/// Mutable form of [`split`], used by the transforms to work on the payload
/// in place.
pub fn split_mut(blob: &mut [u8]) -> Result<(&mut [u8], &mut [u8])> {
    let header_len = header_len(blob)?;
    Ok(blob.split_at_mut(header_len))
}

/// Concatenate a marshalled header and a payload.
pub fn join(header: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(header.len() + payload.len());
    blob.extend_from_slice(header);
    blob.extend_from_slice(payload);
    blob
}

pub(crate) fn header_len(blob: &[u8]) -> Result<usize> {
    let header_len = read_size(blob)? as usize;
    if header_len > blob.len() {
        return Err(NestedAesError::HeaderExceedsBlob {
            header: header_len,
            blob: blob.len(),
        });
    }
    Ok(header_len)
}
