//! ChaCha20-Poly1305 AEAD encryption (RFC 8439).
//!
//! Each [`AeadEngine`] is bound to a single 32-byte key. Every encryption
//! draws a fresh random 96-bit nonce, so no per-key counter state exists and
//! nonce reuse requires an RNG failure. No associated data is used at this
//! layer; domain binding happens in the KDF context strings of callers.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::rngs::OsRng;
use rand::RngCore;

use anemochory_types::{AUTH_TAG_SIZE, KEY_SIZE, NONCE_SIZE};

use crate::memwipe::SecretKey;
use crate::{CryptoError, Result};

/// An AEAD cipher bound to one layer key.
///
/// The key lives inside the cipher state; the engine never exposes it.
pub struct AeadEngine {
    cipher: ChaCha20Poly1305,
}

impl AeadEngine {
    /// Create an engine bound to the given key.
    pub fn new(key: &SecretKey) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(key.as_bytes())),
        }
    }

    /// Create an engine from raw key bytes.
    pub fn from_key_bytes(key: &[u8; KEY_SIZE]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(key)),
        }
    }

    /// Generate a fresh random layer key.
    pub fn generate_key() -> SecretKey {
        SecretKey::generate()
    }

    /// Encrypt plaintext under a fresh random nonce.
    ///
    /// Returns `(nonce, ciphertext)` where the ciphertext carries the
    /// 16-byte Poly1305 tag appended.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::AuthenticationFailed`] only on internal cipher
    /// failure, which should not occur in normal operation.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<([u8; NONCE_SIZE], Vec<u8>)> {
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::AuthenticationFailed)?;

        Ok((nonce, ciphertext))
    }

    /// Encrypt plaintext under a caller-supplied nonce.
    ///
    /// Used by the packet layer, which stores the nonce in the layer above.
    /// The nonce must never repeat under this engine's key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::BadNonce`] if the nonce is not 12 bytes.
    pub fn encrypt_with_nonce(&self, nonce: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        if nonce.len() != NONCE_SIZE {
            return Err(CryptoError::BadNonce {
                expected: NONCE_SIZE,
                actual: nonce.len(),
            });
        }
        self.cipher
            .encrypt(Nonce::from_slice(nonce), plaintext)
            .map_err(|_| CryptoError::AuthenticationFailed)
    }

    /// Decrypt and authenticate a ciphertext.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::BadNonce`] if the nonce is not 12 bytes, and
    /// [`CryptoError::AuthenticationFailed`] if the ciphertext is shorter
    /// than the tag or the tag does not verify. Authentication failure means
    /// the packet was tampered with: drop it.
    pub fn decrypt(&self, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        if nonce.len() != NONCE_SIZE {
            return Err(CryptoError::BadNonce {
                expected: NONCE_SIZE,
                actual: nonce.len(),
            });
        }
        if ciphertext.len() < AUTH_TAG_SIZE {
            return Err(CryptoError::AuthenticationFailed);
        }
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::AuthenticationFailed)
    }
}
