//! Best-effort zeroization of key material.
//!
//! All long-lived secrets in the workspace live in [`SecretKey`], which
//! overwrites its bytes on drop through `zeroize` — volatile writes behind a
//! compiler fence, the Rust equivalent of `explicit_bzero`. Transient
//! buffers that held secrets are scrubbed with [`wipe`] before release.
//!
//! Zeroization is best-effort: copies made by the allocator or by moves of
//! the containing struct are outside our control. Keys are therefore kept in
//! owned, mutable containers and never round-tripped through logging or
//! serialization.

use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use anemochory_types::KEY_SIZE;

/// Overwrite a mutable buffer with zeros.
///
/// The write is guaranteed not to be elided by the optimizer.
pub fn wipe(buf: &mut [u8]) {
    buf.zeroize();
}

/// A 32-byte symmetric key that zeroizes itself on drop.
///
/// Never logged, never serialized, never persisted in clear.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey {
    bytes: [u8; KEY_SIZE],
}

impl SecretKey {
    /// Generate a fresh random key from the operating system RNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Wrap existing key material. The caller's copy should be wiped.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Borrow the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material must never reach logs, even via {:?}.
        f.write_str("SecretKey(..)")
    }
}
