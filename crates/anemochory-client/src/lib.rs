//! # anemochory-client
//!
//! The user-facing send API. One call: pick a diverse path, wrap the
//! payload in an onion, hand it to the entry node, retry on transport
//! failures with exponential backoff. Fire and forget — no
//! acknowledgements are tracked at this layer.

pub mod client;

pub use client::{AnemochoryClient, SendResult, DEFAULT_BACKOFF_BASE, MAX_RETRIES};

/// Error types for client-side send preparation.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Empty payloads are rejected before path selection.
    #[error("payload is empty")]
    EmptyPayload,

    /// The payload does not fit the configured hop count.
    #[error("payload too large: {size} bytes, max {max}")]
    PayloadTooLarge { size: usize, max: usize },

    /// Path selection or packet construction failed.
    #[error(transparent)]
    Onion(#[from] anemochory_onion::OnionError),

    /// All transport attempts failed.
    #[error(transparent)]
    Transport(#[from] anemochory_transport::TransportError),
}

/// Convenience result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
