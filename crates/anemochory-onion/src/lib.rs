//! # anemochory-onion
//!
//! Onion packet construction, path selection, and per-hop processing.
//!
//! - [`packet`] — Fixed-size nested-AEAD packet build and peel
//! - [`path`] — Diverse path selection over the node pool
//! - [`processor`] — One-layer peel with drop/forward/exit decisions
//! - [`exit`] — Exit-side payload handling
//!
//! ## Key Parameters
//!
//! | Parameter | Value |
//! |---|---|
//! | Packet size | 1024 bytes |
//! | Hops per path | 3..=7 |
//! | Per-layer overhead | 92 bytes |
//! | Forwarding jitter | 5–50 ms |

pub mod exit;
pub mod packet;
pub mod path;
pub mod processor;

/// Error types for onion operations.
#[derive(Debug, thiserror::Error)]
pub enum OnionError {
    /// A wire packet had the wrong total size.
    #[error("invalid packet size: {actual} bytes, expected {expected}")]
    InvalidSize { expected: usize, actual: usize },

    /// AEAD decryption of a layer failed.
    #[error("layer decryption failed")]
    DecryptionFailed,

    /// Routing info or header fields failed structural validation.
    #[error("malformed routing: {0}")]
    MalformedRouting(String),

    /// The exit frame failed padding validation.
    #[error("invalid padding")]
    PaddingInvalid,

    /// The payload does not fit the chosen hop count.
    #[error("payload too large: {size} bytes, max {max} for {hops} hops")]
    PayloadTooLarge {
        size: usize,
        max: usize,
        hops: usize,
    },

    /// Hop count outside the supported range.
    #[error("hop count must be {min}-{max}, got {count}")]
    InvalidHopCount {
        count: usize,
        min: usize,
        max: usize,
    },

    /// Not enough nodes with the required role.
    #[error("insufficient nodes for role: {0}")]
    InsufficientNodes(String),

    /// Diversity or relay constraints cannot be satisfied by the pool.
    #[error("path constraint violation: {0}")]
    PathConstraint(String),

    /// An underlying cryptographic failure outside the decrypt path.
    #[error("crypto error: {0}")]
    Crypto(#[from] anemochory_crypto::CryptoError),
}

/// Convenience result type for onion operations.
pub type Result<T> = std::result::Result<T, OnionError>;
