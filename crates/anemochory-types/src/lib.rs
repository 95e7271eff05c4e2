//! # anemochory-types
//!
//! Shared domain types and wire constants for the Anemochory protocol.
//!
//! - [`node`] — Node identity, capabilities, and the routing pool
//!
//! ## Wire constants
//!
//! | Constant | Value |
//! |---|---|
//! | Packet size | 1024 bytes |
//! | Header size | 48 bytes |
//! | Routing info size | 64 bytes |
//! | Layer overhead | 92 bytes |
//! | Hop count | 3..=7 |
//! | Minimum pool size | 9 |

pub mod node;

pub use node::{NodeCapability, NodeInfo, NodePool, PoolError};

/// Total wire size of every Anemochory packet, in bytes.
pub const PACKET_SIZE: usize = 1024;

/// ChaCha20-Poly1305 key size (256 bits).
pub const KEY_SIZE: usize = 32;

/// ChaCha20-Poly1305 nonce size (96 bits).
pub const NONCE_SIZE: usize = 12;

/// Poly1305 authentication tag size (128 bits).
pub const AUTH_TAG_SIZE: usize = 16;

/// Session identifier size (256 bits).
pub const SESSION_ID_SIZE: usize = 32;

/// Session tag size: the session id prefix carried in transport frames.
pub const SESSION_TAG_SIZE: usize = 16;

/// Node identifier size (128 bits).
pub const NODE_ID_SIZE: usize = 16;

/// Packet header size: session id, outer nonce, flags, hop count, reserved.
pub const HEADER_SIZE: usize = SESSION_ID_SIZE + NONCE_SIZE + 1 + 1 + 2;

/// Onion content area: everything after the packet header.
pub const INNER_PACKET_SIZE: usize = PACKET_SIZE - HEADER_SIZE;

/// Serialized per-layer routing info size.
///
/// Layout: `address(16) ∥ port(2) ∥ sequence(8) ∥ session_id(32) ∥
/// timestamp(4) ∥ padding_length(2)`, all integers big-endian.
pub const ROUTING_INFO_SIZE: usize = 64;

/// Bytes consumed by each onion layer: routing info, inner nonce, auth tag.
pub const LAYER_OVERHEAD: usize = ROUTING_INFO_SIZE + NONCE_SIZE + AUTH_TAG_SIZE;

/// Minimum number of hops in a path.
pub const MIN_HOPS: usize = 3;

/// Maximum number of hops in a path.
pub const MAX_HOPS: usize = 7;

/// Default hop count: balances anonymity against latency.
pub const DEFAULT_HOP_COUNT: usize = 5;

/// Minimum pool size for viable path selection with subnet diversity.
pub const MIN_POOL_SIZE: usize = 9;

/// A 16-byte stable public node identifier.
pub type NodeId = [u8; NODE_ID_SIZE];

/// A 32-byte session identifier binding key material end to end.
pub type SessionId = [u8; SESSION_ID_SIZE];

/// The session id prefix used in transport frames and relay key registries.
pub type SessionTag = [u8; SESSION_TAG_SIZE];

/// Derive the transport-layer session tag from a full session id.
pub fn session_tag(session_id: &SessionId) -> SessionTag {
    let mut tag = [0u8; SESSION_TAG_SIZE];
    tag.copy_from_slice(&session_id[..SESSION_TAG_SIZE]);
    tag
}
