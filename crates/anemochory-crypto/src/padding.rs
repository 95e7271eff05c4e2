//! Constant-size frames with random fill.
//!
//! Variable-length packets leak information; every Anemochory frame is
//! padded to a fixed size before encryption. The fill is cryptographically
//! random — zero fill would hand an observer a compression distinguisher.
//!
//! Frame layout: `u16_be data_length ∥ data ∥ random_fill`.
//!
//! All unpad validation failures collapse into the single opaque
//! [`CryptoError::PaddingInvalid`]; the error must not reveal which check
//! tripped.

use rand::rngs::OsRng;
use rand::RngCore;

use anemochory_types::PACKET_SIZE;

use crate::{CryptoError, Result};

/// Bytes reserved for the big-endian length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 2;

/// Pad `data` into a frame of exactly `target_size` bytes.
///
/// # Errors
///
/// Returns [`CryptoError::DataTooLarge`] if the data cannot fit alongside
/// the length prefix.
pub fn pad(data: &[u8], target_size: usize) -> Result<Vec<u8>> {
    if target_size < LENGTH_PREFIX_SIZE || data.len() > target_size - LENGTH_PREFIX_SIZE {
        return Err(CryptoError::DataTooLarge {
            size: data.len(),
            capacity: target_size.saturating_sub(LENGTH_PREFIX_SIZE),
        });
    }

    let mut frame = Vec::with_capacity(target_size);
    frame.extend_from_slice(&(data.len() as u16).to_be_bytes());
    frame.extend_from_slice(data);

    let mut fill = vec![0u8; target_size - frame.len()];
    OsRng.fill_bytes(&mut fill);
    frame.extend_from_slice(&fill);

    Ok(frame)
}

/// Pad `data` into a default-sized (1024-byte) frame.
pub fn pad_default(data: &[u8]) -> Result<Vec<u8>> {
    pad(data, PACKET_SIZE)
}

/// Recover the original data from a padded frame.
///
/// # Errors
///
/// Returns [`CryptoError::PaddingInvalid`] for every malformed frame —
/// truncated prefix and out-of-range length are indistinguishable by
/// design.
pub fn unpad(frame: &[u8]) -> Result<Vec<u8>> {
    if frame.len() < LENGTH_PREFIX_SIZE {
        return Err(CryptoError::PaddingInvalid);
    }
    let length = u16::from_be_bytes([frame[0], frame[1]]) as usize;
    if length > frame.len() - LENGTH_PREFIX_SIZE {
        return Err(CryptoError::PaddingInvalid);
    }
    Ok(frame[LENGTH_PREFIX_SIZE..LENGTH_PREFIX_SIZE + length].to_vec())
}
