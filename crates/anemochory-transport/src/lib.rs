//! # anemochory-transport
//!
//! Length-prefixed asynchronous transport for packet forwarding.
//!
//! - [`framing`] — `u32_be length ∥ session_tag(16) ∥ packet` frames
//! - [`server`] — Accept loop, one task per connection, silent drops
//! - [`sender`] — Connect-timeout single-frame sender
//!
//! The network layer is where packets meet observers. The server never
//! answers a bad packet — no error replies, no resets beyond closing the
//! connection — because any differential response is oracle feedback.

pub mod framing;
pub mod sender;
pub mod server;

/// Error types for transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Could not connect to the next hop.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// Writing a frame failed mid-stream.
    #[error("write failed: {0}")]
    WriteFailed(String),

    /// No complete frame arrived within the read deadline.
    #[error("read timeout")]
    ReadTimeout,

    /// A frame violated the length-prefix format.
    #[error("framing error: {0}")]
    FramingError(String),

    /// The peer closed the connection at a frame boundary.
    #[error("connection closed")]
    ConnectionClosed,
}

/// Convenience result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;
