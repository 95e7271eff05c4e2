//! # anemochory-crypto
//!
//! Cryptographic primitives for the Anemochory protocol.
//!
//! The suite is fixed — no algorithm negotiation is permitted:
//!
//! - [`aead`] — ChaCha20-Poly1305 authenticated encryption (RFC 8439)
//! - [`kdf`] — HKDF-SHA256 layer, session, and ratchet derivations
//! - [`padding`] — Constant-size frames with random fill
//! - [`memwipe`] — Best-effort zeroization of key material
//! - [`forward`] — Ephemeral X25519 key agreement (RFC 7748)
//! - [`rotation`] — Ratcheting session keys with a decrypt grace window
//! - [`replay`] — Nonce tracking and timestamp freshness
//! - [`clock`] — Injectable time source for the time-dependent modules

pub mod aead;
pub mod clock;
pub mod forward;
pub mod kdf;
pub mod memwipe;
pub mod padding;
pub mod replay;
pub mod rotation;

pub use memwipe::SecretKey;

/// Error types for cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// AEAD authentication failed: the packet was tampered with, corrupted,
    /// or encrypted under a different key.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// A nonce of the wrong size was supplied.
    #[error("bad nonce: expected {expected} bytes, got {actual}")]
    BadNonce { expected: usize, actual: usize },

    /// X25519 key exchange failed (malformed or low-order peer key).
    #[error("key exchange failed: {0}")]
    KeyExchangeFailed(String),

    /// HKDF derivation failed or was given out-of-range parameters.
    #[error("key derivation failed: {0}")]
    KeyDerivationFailed(String),

    /// A constant-size frame failed padding validation.
    ///
    /// Deliberately opaque: the message never distinguishes underflow from
    /// overflow, denying padding oracles.
    #[error("invalid padding")]
    PaddingInvalid,

    /// Input data cannot fit the requested frame.
    #[error("data too large: {size} bytes exceeds frame capacity {capacity}")]
    DataTooLarge { size: usize, capacity: usize },

    /// Invalid key length.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
}

/// Convenience result type for cryptographic operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
