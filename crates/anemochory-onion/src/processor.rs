//! Per-hop packet processing.
//!
//! A relay sees one layer and nothing else: not the payload, not the
//! origin, not the destination. [`RelayNode`] peels that layer, consults
//! its replay protector, and decides to forward, exit, or drop. Every
//! failure collapses into a silent [`Decision::Drop`] — a relay that
//! answers probes differently per error kind is an oracle.
//!
//! The forwarding jitter is advisory: the processor never sleeps. The
//! transport applies it, which keeps processing synchronous and lets tests
//! mock time.

use std::collections::HashMap;
use std::net::IpAddr;

use rand::Rng;

use anemochory_crypto::clock::SharedClock;
use anemochory_crypto::replay::ReplayProtector;
use anemochory_crypto::SecretKey;
use anemochory_types::{NodeInfo, SessionId, SessionTag, PACKET_SIZE, SESSION_TAG_SIZE};

use crate::packet::{peel_layer, PeelAction};
use crate::OnionError;

/// Minimum advisory forwarding delay in milliseconds.
pub const MIN_JITTER_MS: u64 = 5;

/// Maximum advisory forwarding delay in milliseconds.
pub const MAX_JITTER_MS: u64 = 50;

/// Why a packet was dropped. Never sent back to the peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// No layer key registered for the frame's session tag.
    UnknownSession,
    /// The packet was not exactly [`PACKET_SIZE`] bytes.
    InvalidSize,
    /// The layer failed AEAD authentication.
    AuthenticationFailed,
    /// Header or routing fields failed structural validation.
    MalformedRouting,
    /// The exit frame failed padding validation.
    PaddingInvalid,
    /// The outer nonce was already seen for this session.
    Replay,
    /// The layer timestamp fell outside the freshness window.
    Expired,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::UnknownSession => "UnknownSession",
            Self::InvalidSize => "InvalidSize",
            Self::AuthenticationFailed => "AuthenticationFailed",
            Self::MalformedRouting => "MalformedRouting",
            Self::PaddingInvalid => "PaddingInvalid",
            Self::Replay => "Replay",
            Self::Expired => "Expired",
        };
        f.write_str(name)
    }
}

/// The outcome of processing one packet.
#[derive(Debug)]
pub enum Decision {
    /// Forward the rewritten packet after the advisory jitter.
    Forward {
        /// Outgoing constant-size packet.
        packet_data: Vec<u8>,
        /// Next hop address.
        next_address: IpAddr,
        /// Next hop port.
        next_port: u16,
        /// Advisory delay the transport applies before sending.
        jitter_ms: u64,
    },
    /// Final hop: hand the payload to the exit handler.
    Exit {
        /// Recovered sender payload.
        payload: Vec<u8>,
    },
    /// Silently discard the packet.
    Drop {
        /// Why — for counters and logs only.
        reason: DropReason,
    },
}

/// Packet-processing counters for one relay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NodeStats {
    /// Packets handed to the processor.
    pub packets_processed: u64,
    /// Packets that produced a forward decision.
    pub packets_forwarded: u64,
    /// Packets that reached their exit here.
    pub packets_exited: u64,
    /// Packets dropped for any reason.
    pub packets_dropped: u64,
    /// Drops caused by failed layer authentication.
    pub decryption_failures: u64,
    /// Drops caused by replayed nonces.
    pub replay_attempts: u64,
}

/// One relay's processing state: identity, session keys, replay tracking.
pub struct RelayNode {
    identity: NodeInfo,
    layer_keys: HashMap<SessionTag, (SessionId, SecretKey)>,
    replay: ReplayProtector,
    stats: NodeStats,
}

impl RelayNode {
    /// Create a relay with no registered sessions.
    pub fn new(identity: NodeInfo, clock: SharedClock) -> Self {
        Self {
            identity,
            layer_keys: HashMap::new(),
            replay: ReplayProtector::new(clock),
            stats: NodeStats::default(),
        }
    }

    /// This relay's public identity.
    pub fn identity(&self) -> &NodeInfo {
        &self.identity
    }

    /// Current processing counters.
    pub fn stats(&self) -> NodeStats {
        self.stats
    }

    /// Register the layer key for a session.
    ///
    /// The registry is keyed by the 16-byte session tag used in transport
    /// frames; the full id is kept for header verification.
    pub fn register_session_key(&mut self, session_id: SessionId, key: SecretKey) {
        let tag = anemochory_types::session_tag(&session_id);
        self.layer_keys.insert(tag, (session_id, key));
    }

    /// Remove a session's key and replay state.
    pub fn remove_session_key(&mut self, session_id: &SessionId) {
        let tag = anemochory_types::session_tag(session_id);
        self.layer_keys.remove(&tag);
        self.replay.retire_session(session_id);
    }

    /// Whether a session tag has a registered key.
    pub fn knows_session(&self, tag: &SessionTag) -> bool {
        self.layer_keys.contains_key(tag)
    }

    /// Process one wire packet for the given session tag.
    ///
    /// Never returns an error: every failure is a [`Decision::Drop`].
    pub fn process_packet(&mut self, wire: &[u8], session_tag: &SessionTag) -> Decision {
        self.stats.packets_processed += 1;

        let Some((session_id, key)) = self.layer_keys.get(session_tag) else {
            return self.drop_packet(DropReason::UnknownSession);
        };
        let session_id = *session_id;
        let key = key.clone();

        if wire.len() != PACKET_SIZE {
            return self.drop_packet(DropReason::InvalidSize);
        }

        let peeled = match peel_layer(wire, &key) {
            Ok(peeled) => peeled,
            Err(e) => {
                let reason = match e {
                    OnionError::InvalidSize { .. } => DropReason::InvalidSize,
                    OnionError::DecryptionFailed => {
                        self.stats.decryption_failures += 1;
                        DropReason::AuthenticationFailed
                    }
                    OnionError::PaddingInvalid => DropReason::PaddingInvalid,
                    _ => DropReason::MalformedRouting,
                };
                return self.drop_packet(reason);
            }
        };

        // The frame tag routed us here; the header inside must agree.
        if peeled.routing.session_id != session_id
            || &peeled.routing.session_id[..SESSION_TAG_SIZE] != session_tag
        {
            return self.drop_packet(DropReason::MalformedRouting);
        }

        let metadata = self.replay.create_metadata(
            session_id,
            peeled.routing.sequence_number,
            Some(peeled.routing.timestamp),
        );
        if !self.replay.validate_freshness(&metadata, None) {
            return self.drop_packet(DropReason::Expired);
        }

        if self.replay.is_seen(&peeled.outer_nonce, &session_id) {
            self.stats.replay_attempts += 1;
            return self.drop_packet(DropReason::Replay);
        }
        self.replay.mark_seen(&peeled.outer_nonce, &session_id);
        self.replay.track_sequence(&metadata);

        match peeled.action {
            PeelAction::Exit { payload } => {
                self.stats.packets_exited += 1;
                Decision::Exit { payload }
            }
            PeelAction::Forward {
                packet,
                next_address,
                next_port,
            } => {
                self.stats.packets_forwarded += 1;
                Decision::Forward {
                    packet_data: packet,
                    next_address,
                    next_port,
                    jitter_ms: calculate_jitter(),
                }
            }
        }
    }

    fn drop_packet(&mut self, reason: DropReason) -> Decision {
        self.stats.packets_dropped += 1;
        tracing::debug!(node = %hex::encode(self.identity.node_id), %reason, "packet dropped");
        Decision::Drop { reason }
    }
}

/// Draw an advisory forwarding delay in `[MIN_JITTER_MS, MAX_JITTER_MS]`.
fn calculate_jitter() -> u64 {
    rand::thread_rng().gen_range(MIN_JITTER_MS..=MAX_JITTER_MS)
}
