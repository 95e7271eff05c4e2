//! Fixed-size onion packet construction and processing.
//!
//! Every Anemochory packet is exactly 1024 bytes on the wire, no matter how
//! many layers remain. Each relay peels one AEAD layer, learns only its
//! predecessor and successor, and re-pads the remainder with fresh random
//! fill so the outgoing bytes are unlinkable to the incoming ones.
//!
//! ## Wire layout
//!
//! ```text
//! [session_id:32][outer_nonce:12][flags:1][hop_count:1][reserved:2]   48-byte header
//! [ciphertext][random fill]                                           976-byte body
//! ```
//!
//! The flags byte carries the peel depth — the number of layers already
//! removed (0 as built). It is what lets a relay locate the ciphertext
//! extent inside the constant-size body: `ct_len = 976 − 92 × depth`.
//! `hop_count` is the total layer count of the onion and is copied through
//! unchanged.
//!
//! ## Per-layer plaintext
//!
//! ```text
//! [routing_info:64][next_nonce:12][inner ciphertext]    forward layers
//! [routing_info:64][padded payload frame]               exit layer
//! ```
//!
//! Routing info layout (integers big-endian):
//!
//! ```text
//! [next_hop_address:16][next_hop_port:2][sequence_number:8]
//! [session_id:32][timestamp:4][padding_length:2]
//! ```
//!
//! IPv4 addresses pack as 4 bytes followed by 12 zero bytes; IPv6 as 16 raw
//! bytes. An all-zero address with port 0 marks the exit layer.

use std::net::IpAddr;

use rand::rngs::OsRng;
use rand::RngCore;

use anemochory_crypto::aead::AeadEngine;
use anemochory_crypto::padding;
use anemochory_crypto::{CryptoError, SecretKey};
use anemochory_types::{
    SessionId, HEADER_SIZE, INNER_PACKET_SIZE, LAYER_OVERHEAD, MAX_HOPS, MIN_HOPS, NONCE_SIZE,
    PACKET_SIZE, ROUTING_INFO_SIZE, SESSION_ID_SIZE,
};

use crate::{OnionError, Result};

/// Generate a fresh random 32-byte session id.
pub fn generate_session_id() -> SessionId {
    let mut id = [0u8; SESSION_ID_SIZE];
    OsRng.fill_bytes(&mut id);
    id
}

/// Largest payload that fits an onion with `hop_count` layers.
pub fn max_payload_size(hop_count: usize) -> usize {
    INNER_PACKET_SIZE.saturating_sub(hop_count * LAYER_OVERHEAD)
}

/// Padded frame size for the innermost layer of an `hop_count`-layer onion,
/// chosen so the outermost ciphertext exactly fills the body.
fn inner_frame_size(hop_count: usize) -> usize {
    INNER_PACKET_SIZE + NONCE_SIZE - hop_count * LAYER_OVERHEAD
}

/// Ciphertext extent in the body of a packet at the given peel depth.
fn ciphertext_len(peel_depth: usize) -> usize {
    INNER_PACKET_SIZE - peel_depth * LAYER_OVERHEAD
}

/// Pack an IP address into the 16-byte routing field.
pub fn pack_address(address: IpAddr) -> [u8; 16] {
    let mut packed = [0u8; 16];
    match address {
        IpAddr::V4(v4) => packed[..4].copy_from_slice(&v4.octets()),
        IpAddr::V6(v6) => packed.copy_from_slice(&v6.octets()),
    }
    packed
}

/// Unpack a routing address field.
///
/// A field whose trailing 12 bytes are zero decodes as IPv4; IPv6 addresses
/// with an all-zero tail therefore cannot be used as hop addresses.
pub fn unpack_address(packed: &[u8; 16]) -> IpAddr {
    if packed[4..].iter().all(|&b| b == 0) {
        IpAddr::from([packed[0], packed[1], packed[2], packed[3]])
    } else {
        let mut octets = [0u8; 16];
        octets.copy_from_slice(packed);
        IpAddr::from(octets)
    }
}

/// The once-per-packet header at the outermost layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketHeader {
    /// Session this packet belongs to.
    pub session_id: SessionId,
    /// Nonce for the outermost AEAD layer.
    pub outer_nonce: [u8; NONCE_SIZE],
    /// Peel depth: layers already removed (the flags byte).
    pub layers_peeled: u8,
    /// Total layer count of the onion as built.
    pub hop_count: u8,
}

impl PacketHeader {
    /// Serialize to the fixed 48-byte layout.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[..32].copy_from_slice(&self.session_id);
        buf[32..44].copy_from_slice(&self.outer_nonce);
        buf[44] = self.layers_peeled;
        buf[45] = self.hop_count;
        // bytes 46-47 are reserved (zero)
        buf
    }

    /// Parse and validate a header.
    ///
    /// # Errors
    ///
    /// Returns [`OnionError::MalformedRouting`] if the slice is short, the
    /// reserved bytes are nonzero, the hop count is out of range, or the
    /// peel depth is not below the hop count.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(OnionError::MalformedRouting(format!(
                "header too short: {} bytes",
                data.len()
            )));
        }
        if data[46] != 0 || data[47] != 0 {
            return Err(OnionError::MalformedRouting(
                "reserved header bytes must be zero".to_string(),
            ));
        }
        let layers_peeled = data[44];
        let hop_count = data[45];
        if !(MIN_HOPS..=MAX_HOPS).contains(&usize::from(hop_count)) {
            return Err(OnionError::MalformedRouting(format!(
                "hop count {hop_count} out of range"
            )));
        }
        if layers_peeled >= hop_count {
            return Err(OnionError::MalformedRouting(format!(
                "peel depth {layers_peeled} not below hop count {hop_count}"
            )));
        }

        let mut session_id = [0u8; SESSION_ID_SIZE];
        session_id.copy_from_slice(&data[..32]);
        let mut outer_nonce = [0u8; NONCE_SIZE];
        outer_nonce.copy_from_slice(&data[32..44]);

        Ok(Self {
            session_id,
            outer_nonce,
            layers_peeled,
            hop_count,
        })
    }
}

/// Per-layer routing information, visible only to the layer's holder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LayerRoutingInfo {
    /// Packed next-hop address; all zeros on the exit layer.
    pub next_hop_address: [u8; 16],
    /// Next-hop port; 0 on the exit layer.
    pub next_hop_port: u16,
    /// Sequence number within the session.
    pub sequence_number: u64,
    /// Session this layer belongs to; must match the packet header.
    pub session_id: SessionId,
    /// Unix seconds at build time, for the freshness check.
    pub timestamp: i64,
    /// Random fill the relay appends when re-padding (0 on the exit layer).
    pub padding_length: u16,
}

impl LayerRoutingInfo {
    /// Routing info pointing at the next hop.
    pub fn to_hop(address: IpAddr, port: u16, sequence_number: u64, session_id: SessionId) -> Self {
        Self {
            next_hop_address: pack_address(address),
            next_hop_port: port,
            sequence_number,
            session_id,
            timestamp: 0,
            padding_length: 0,
        }
    }

    /// Routing info marking the exit layer.
    pub fn exit(sequence_number: u64, session_id: SessionId) -> Self {
        Self {
            next_hop_address: [0u8; 16],
            next_hop_port: 0,
            sequence_number,
            session_id,
            timestamp: 0,
            padding_length: 0,
        }
    }

    /// Whether this layer is the exit.
    pub fn is_exit(&self) -> bool {
        self.next_hop_port == 0 && self.next_hop_address.iter().all(|&b| b == 0)
    }

    /// The next-hop endpoint, if this is not the exit layer.
    pub fn next_hop(&self) -> Option<(IpAddr, u16)> {
        if self.is_exit() {
            None
        } else {
            Some((unpack_address(&self.next_hop_address), self.next_hop_port))
        }
    }

    /// Serialize to the fixed 64-byte layout.
    pub fn to_bytes(&self) -> [u8; ROUTING_INFO_SIZE] {
        let mut buf = [0u8; ROUTING_INFO_SIZE];
        buf[..16].copy_from_slice(&self.next_hop_address);
        buf[16..18].copy_from_slice(&self.next_hop_port.to_be_bytes());
        buf[18..26].copy_from_slice(&self.sequence_number.to_be_bytes());
        buf[26..58].copy_from_slice(&self.session_id);
        buf[58..62].copy_from_slice(&(self.timestamp as u32).to_be_bytes());
        buf[62..64].copy_from_slice(&self.padding_length.to_be_bytes());
        buf
    }

    /// Parse routing info from a decrypted layer.
    ///
    /// # Errors
    ///
    /// Returns [`OnionError::MalformedRouting`] if the slice is too short.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < ROUTING_INFO_SIZE {
            return Err(OnionError::MalformedRouting(format!(
                "routing info too short: {} bytes, need {ROUTING_INFO_SIZE}",
                data.len()
            )));
        }
        let mut next_hop_address = [0u8; 16];
        next_hop_address.copy_from_slice(&data[..16]);
        let next_hop_port = u16::from_be_bytes([data[16], data[17]]);
        let mut seq = [0u8; 8];
        seq.copy_from_slice(&data[18..26]);
        let mut session_id = [0u8; SESSION_ID_SIZE];
        session_id.copy_from_slice(&data[26..58]);
        let mut ts = [0u8; 4];
        ts.copy_from_slice(&data[58..62]);
        let padding_length = u16::from_be_bytes([data[62], data[63]]);

        Ok(Self {
            next_hop_address,
            next_hop_port,
            sequence_number: u64::from_be_bytes(seq),
            session_id,
            timestamp: i64::from(u32::from_be_bytes(ts)),
            padding_length,
        })
    }
}

/// What a relay does with a peeled packet.
pub enum PeelAction {
    /// Forward the rewritten constant-size packet to the next hop.
    Forward {
        /// The outgoing 1024-byte packet.
        packet: Vec<u8>,
        /// Next hop address.
        next_address: IpAddr,
        /// Next hop port.
        next_port: u16,
    },
    /// Final layer: deliver the recovered payload.
    Exit {
        /// The original sender payload.
        payload: Vec<u8>,
    },
}

/// Result of peeling one layer.
pub struct PeeledPacket {
    /// The routing info of the peeled layer.
    pub routing: LayerRoutingInfo,
    /// The outer nonce this layer was encrypted under (replay tracking).
    pub outer_nonce: [u8; NONCE_SIZE],
    /// Forward or exit.
    pub action: PeelAction,
}

/// Build a complete onion packet.
///
/// `path` is innermost-first: `path[0]` holds the exit's key and routing,
/// `path[n-1]` the entry's. `now` is stamped into every layer's routing
/// info for the freshness check at each hop.
///
/// # Errors
///
/// Returns [`OnionError::InvalidHopCount`] for paths outside 3..=7 layers
/// and [`OnionError::PayloadTooLarge`] if the payload cannot fit.
pub fn build_onion_packet(
    payload: &[u8],
    path: &[(&SecretKey, &LayerRoutingInfo)],
    session_id: &SessionId,
    now: i64,
) -> Result<Vec<u8>> {
    let hop_count = path.len();
    if !(MIN_HOPS..=MAX_HOPS).contains(&hop_count) {
        return Err(OnionError::InvalidHopCount {
            count: hop_count,
            min: MIN_HOPS,
            max: MAX_HOPS,
        });
    }
    let max = max_payload_size(hop_count);
    if payload.len() > max {
        return Err(OnionError::PayloadTooLarge {
            size: payload.len(),
            max,
            hops: hop_count,
        });
    }

    let mut current = padding::pad(payload, inner_frame_size(hop_count))?;
    let mut prev_nonce: Option<[u8; NONCE_SIZE]> = None;

    for (layer_index, (key, routing)) in path.iter().enumerate() {
        // The relay that peels layer i sits at depth n-1-i and must append
        // one layer's worth of fill per peeled layer, plus its own.
        let fill = if layer_index == 0 {
            0
        } else {
            LAYER_OVERHEAD * (hop_count - layer_index)
        };
        let wire_routing = LayerRoutingInfo {
            next_hop_address: routing.next_hop_address,
            next_hop_port: routing.next_hop_port,
            sequence_number: routing.sequence_number,
            session_id: *session_id,
            timestamp: now,
            padding_length: fill as u16,
        };

        let mut plaintext =
            Vec::with_capacity(ROUTING_INFO_SIZE + NONCE_SIZE + current.len());
        plaintext.extend_from_slice(&wire_routing.to_bytes());
        if let Some(nonce) = prev_nonce {
            plaintext.extend_from_slice(&nonce);
        }
        plaintext.extend_from_slice(&current);

        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);
        current = AeadEngine::new(key).encrypt_with_nonce(&nonce, &plaintext)?;
        prev_nonce = Some(nonce);
    }

    let header = PacketHeader {
        session_id: *session_id,
        outer_nonce: prev_nonce.unwrap_or([0u8; NONCE_SIZE]),
        layers_peeled: 0,
        hop_count: hop_count as u8,
    };

    let mut packet = Vec::with_capacity(PACKET_SIZE);
    packet.extend_from_slice(&header.to_bytes());
    packet.extend_from_slice(&current);
    debug_assert_eq!(packet.len(), PACKET_SIZE);

    Ok(packet)
}

/// Peel one layer of an onion packet.
///
/// On a forward layer the returned packet is re-padded to the constant wire
/// size with fresh random fill, so an observer cannot link incoming and
/// outgoing bytes.
///
/// # Errors
///
/// - [`OnionError::InvalidSize`] if the packet is not exactly 1024 bytes
/// - [`OnionError::DecryptionFailed`] if the layer does not authenticate
/// - [`OnionError::MalformedRouting`] for structural violations
/// - [`OnionError::PaddingInvalid`] if the exit frame fails validation
pub fn peel_layer(packet: &[u8], key: &SecretKey) -> Result<PeeledPacket> {
    if packet.len() != PACKET_SIZE {
        return Err(OnionError::InvalidSize {
            expected: PACKET_SIZE,
            actual: packet.len(),
        });
    }

    let header = PacketHeader::from_bytes(&packet[..HEADER_SIZE])?;
    let depth = usize::from(header.layers_peeled);
    let ct_len = ciphertext_len(depth);
    let ciphertext = &packet[HEADER_SIZE..HEADER_SIZE + ct_len];

    let plaintext = AeadEngine::new(key)
        .decrypt(&header.outer_nonce, ciphertext)
        .map_err(|e| match e {
            CryptoError::AuthenticationFailed | CryptoError::BadNonce { .. } => {
                OnionError::DecryptionFailed
            }
            other => OnionError::Crypto(other),
        })?;

    let routing = LayerRoutingInfo::from_bytes(&plaintext[..ROUTING_INFO_SIZE])?;
    if routing.session_id != header.session_id {
        return Err(OnionError::MalformedRouting(
            "layer session id does not match header".to_string(),
        ));
    }
    let rest = &plaintext[ROUTING_INFO_SIZE..];

    if routing.is_exit() {
        let payload = padding::unpad(rest).map_err(|_| OnionError::PaddingInvalid)?;
        return Ok(PeeledPacket {
            outer_nonce: header.outer_nonce,
            routing,
            action: PeelAction::Exit { payload },
        });
    }

    if rest.len() < NONCE_SIZE {
        return Err(OnionError::MalformedRouting(
            "forward layer truncated before inner nonce".to_string(),
        ));
    }
    let mut next_nonce = [0u8; NONCE_SIZE];
    next_nonce.copy_from_slice(&rest[..NONCE_SIZE]);
    let inner = &rest[NONCE_SIZE..];

    let fill_len = INNER_PACKET_SIZE - inner.len();
    if fill_len != usize::from(routing.padding_length) {
        return Err(OnionError::MalformedRouting(format!(
            "padding length {} does not match layer geometry {fill_len}",
            routing.padding_length
        )));
    }

    let next_header = PacketHeader {
        session_id: header.session_id,
        outer_nonce: next_nonce,
        layers_peeled: header.layers_peeled + 1,
        hop_count: header.hop_count,
    };

    let mut outgoing = Vec::with_capacity(PACKET_SIZE);
    outgoing.extend_from_slice(&next_header.to_bytes());
    outgoing.extend_from_slice(inner);
    let mut fill = vec![0u8; fill_len];
    OsRng.fill_bytes(&mut fill);
    outgoing.extend_from_slice(&fill);
    debug_assert_eq!(outgoing.len(), PACKET_SIZE);

    let next_address = unpack_address(&routing.next_hop_address);
    let next_port = routing.next_hop_port;

    Ok(PeeledPacket {
        outer_nonce: header.outer_nonce,
        routing,
        action: PeelAction::Forward {
            packet: outgoing,
            next_address,
            next_port,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_path(
        hop_count: usize,
        session_id: &SessionId,
    ) -> (Vec<SecretKey>, Vec<LayerRoutingInfo>) {
        // peel-order keys: index 0 = entry (outermost), last = exit.
        let peel_keys: Vec<SecretKey> = (0..hop_count).map(|_| SecretKey::generate()).collect();

        // Innermost-first routing: index 0 = exit.
        let mut routing = Vec::with_capacity(hop_count);
        for layer_index in 0..hop_count {
            if layer_index == 0 {
                routing.push(LayerRoutingInfo::exit(0, *session_id));
            } else {
                let inner = layer_index - 1;
                routing.push(LayerRoutingInfo::to_hop(
                    format!("10.0.{inner}.1").parse().expect("addr"),
                    8000 + inner as u16,
                    0,
                    *session_id,
                ));
            }
        }
        (peel_keys, routing)
    }

    fn build_test_packet(hop_count: usize, payload: &[u8]) -> (Vec<u8>, Vec<SecretKey>, SessionId) {
        let session_id = generate_session_id();
        let (peel_keys, routing) = test_path(hop_count, &session_id);
        let path: Vec<(&SecretKey, &LayerRoutingInfo)> = routing
            .iter()
            .enumerate()
            .map(|(layer_index, info)| {
                (&peel_keys[hop_count - 1 - layer_index], info)
            })
            .collect();
        let packet =
            build_onion_packet(payload, &path, &session_id, 1_000_000).expect("build packet");
        (packet, peel_keys, session_id)
    }

    #[test]
    fn test_address_roundtrip_ipv4() {
        let addr: IpAddr = "192.168.1.42".parse().expect("addr");
        assert_eq!(unpack_address(&pack_address(addr)), addr);
    }

    #[test]
    fn test_address_roundtrip_ipv6() {
        let addr: IpAddr = "2001:db8::1".parse().expect("addr");
        assert_eq!(unpack_address(&pack_address(addr)), addr);

        let loopback: IpAddr = "::1".parse().expect("addr");
        assert_eq!(unpack_address(&pack_address(loopback)), loopback);
    }

    #[test]
    fn test_header_roundtrip() {
        let header = PacketHeader {
            session_id: [0xAA; 32],
            outer_nonce: [0xBB; 12],
            layers_peeled: 1,
            hop_count: 5,
        };
        let parsed = PacketHeader::from_bytes(&header.to_bytes()).expect("parse");
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_header_rejects_bad_fields() {
        let mut bytes = PacketHeader {
            session_id: [0u8; 32],
            outer_nonce: [0u8; 12],
            layers_peeled: 0,
            hop_count: 3,
        }
        .to_bytes();

        bytes[46] = 1;
        assert!(PacketHeader::from_bytes(&bytes).is_err());
        bytes[46] = 0;

        bytes[45] = 8; // hop count above max
        assert!(PacketHeader::from_bytes(&bytes).is_err());
        bytes[45] = 3;

        bytes[44] = 3; // peel depth == hop count
        assert!(PacketHeader::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_routing_info_roundtrip() {
        let info = LayerRoutingInfo {
            next_hop_address: pack_address("10.1.2.3".parse().expect("addr")),
            next_hop_port: 9000,
            sequence_number: 42,
            session_id: [0xCC; 32],
            timestamp: 1_700_000_000,
            padding_length: 184,
        };
        let parsed = LayerRoutingInfo::from_bytes(&info.to_bytes()).expect("parse");
        assert_eq!(parsed, info);
        assert_eq!(parsed.next_hop(), Some(("10.1.2.3".parse().expect("addr"), 9000)));
    }

    #[test]
    fn test_exit_routing_info() {
        let info = LayerRoutingInfo::exit(7, [1u8; 32]);
        assert!(info.is_exit());
        assert!(info.next_hop().is_none());
        let parsed = LayerRoutingInfo::from_bytes(&info.to_bytes()).expect("parse");
        assert!(parsed.is_exit());
    }

    #[test]
    fn test_max_payload_size_shrinks_with_hops() {
        assert!(max_payload_size(3) > max_payload_size(5));
        assert!(max_payload_size(5) > max_payload_size(7));
        assert!(max_payload_size(MAX_HOPS) > 0);
    }

    #[test]
    fn test_build_packet_is_constant_size() {
        for hop_count in [3, 5, 7] {
            let (packet, _, _) = build_test_packet(hop_count, b"payload");
            assert_eq!(packet.len(), PACKET_SIZE);
        }
    }

    #[test]
    fn test_build_rejects_bad_hop_counts() {
        let session_id = generate_session_id();
        let (keys, routing) = test_path(3, &session_id);
        let short: Vec<(&SecretKey, &LayerRoutingInfo)> =
            vec![(&keys[0], &routing[0]), (&keys[1], &routing[1])];
        assert!(matches!(
            build_onion_packet(b"x", &short, &session_id, 0),
            Err(OnionError::InvalidHopCount { count: 2, .. })
        ));
    }

    #[test]
    fn test_build_rejects_oversized_payload() {
        let session_id = generate_session_id();
        let (keys, routing) = test_path(3, &session_id);
        let path: Vec<(&SecretKey, &LayerRoutingInfo)> = routing
            .iter()
            .enumerate()
            .map(|(i, info)| (&keys[2 - i], info))
            .collect();

        let oversized = vec![0u8; max_payload_size(3) + 1];
        assert!(matches!(
            build_onion_packet(&oversized, &path, &session_id, 0),
            Err(OnionError::PayloadTooLarge { .. })
        ));

        let exact = vec![0u8; max_payload_size(3)];
        assert!(build_onion_packet(&exact, &path, &session_id, 0).is_ok());
    }

    #[test]
    fn test_full_peel_roundtrip_three_hops() {
        let payload = b"Hello from the anonymous sender!";
        let (packet, peel_keys, _) = build_test_packet(3, payload);

        let first = peel_layer(&packet, &peel_keys[0]).expect("peel entry");
        let PeelAction::Forward { packet: p2, next_port, .. } = first.action else {
            panic!("entry layer must forward");
        };
        assert_eq!(p2.len(), PACKET_SIZE);
        assert_eq!(next_port, 8001);

        let second = peel_layer(&p2, &peel_keys[1]).expect("peel relay");
        let PeelAction::Forward { packet: p3, next_port, .. } = second.action else {
            panic!("relay layer must forward");
        };
        assert_eq!(p3.len(), PACKET_SIZE);
        assert_eq!(next_port, 8000);

        let last = peel_layer(&p3, &peel_keys[2]).expect("peel exit");
        let PeelAction::Exit { payload: recovered } = last.action else {
            panic!("exit layer must deliver");
        };
        assert_eq!(recovered, payload);
    }

    #[test]
    fn test_full_peel_roundtrip_all_hop_counts() {
        for hop_count in MIN_HOPS..=MAX_HOPS {
            let payload = b"multi-hop payload";
            let (mut packet, peel_keys, _) = build_test_packet(hop_count, payload);

            for (i, key) in peel_keys.iter().enumerate() {
                assert_eq!(packet.len(), PACKET_SIZE);
                let peeled = peel_layer(&packet, key).expect("peel");
                match peeled.action {
                    PeelAction::Forward { packet: next, .. } => {
                        assert!(i < hop_count - 1, "forward at exit position");
                        packet = next;
                    }
                    PeelAction::Exit { payload: recovered } => {
                        assert_eq!(i, hop_count - 1, "early exit");
                        assert_eq!(recovered, payload);
                    }
                }
            }
        }
    }

    #[test]
    fn test_peel_depth_advances() {
        let (packet, peel_keys, _) = build_test_packet(3, b"depth");
        let header = PacketHeader::from_bytes(&packet[..HEADER_SIZE]).expect("header");
        assert_eq!(header.layers_peeled, 0);
        assert_eq!(header.hop_count, 3);

        let peeled = peel_layer(&packet, &peel_keys[0]).expect("peel");
        let PeelAction::Forward { packet: next, .. } = peeled.action else {
            panic!("must forward");
        };
        let next_header = PacketHeader::from_bytes(&next[..HEADER_SIZE]).expect("header");
        assert_eq!(next_header.layers_peeled, 1);
        assert_eq!(next_header.hop_count, 3);
    }

    #[test]
    fn test_routing_timestamp_propagates() {
        let session_id = generate_session_id();
        let (keys, routing) = test_path(3, &session_id);
        let path: Vec<(&SecretKey, &LayerRoutingInfo)> = routing
            .iter()
            .enumerate()
            .map(|(i, info)| (&keys[2 - i], info))
            .collect();
        let packet =
            build_onion_packet(b"ts", &path, &session_id, 1_234_567).expect("build");

        let peeled = peel_layer(&packet, &keys[0]).expect("peel");
        assert_eq!(peeled.routing.timestamp, 1_234_567);
    }

    #[test]
    fn test_wrong_size_rejected() {
        let key = SecretKey::generate();
        assert!(matches!(
            peel_layer(&[0u8; 100], &key),
            Err(OnionError::InvalidSize { actual: 100, .. })
        ));
    }

    #[test]
    fn test_wrong_key_fails_decryption() {
        let (packet, _, _) = build_test_packet(3, b"secret");
        let wrong_key = SecretKey::generate();
        assert!(matches!(
            peel_layer(&packet, &wrong_key),
            Err(OnionError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let (mut packet, peel_keys, _) = build_test_packet(3, b"secret");
        packet[PACKET_SIZE / 2] ^= 0x01;
        assert!(matches!(
            peel_layer(&packet, &peel_keys[0]),
            Err(OnionError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_session_id_mismatch_rejected() {
        // Rewriting the header session id breaks the in-layer binding even
        // before signature of tampering shows in the AEAD (the nonce and
        // ciphertext are untouched, but the decrypted routing no longer
        // matches the header).
        let (mut packet, peel_keys, _) = build_test_packet(3, b"secret");
        packet[0] ^= 0xFF;
        let result = peel_layer(&packet, &peel_keys[0]);
        assert!(matches!(result, Err(OnionError::MalformedRouting(_))));
    }

    #[test]
    fn test_forwarded_bytes_unlinkable() {
        // Peeling the same packet twice yields different outgoing bytes
        // (fresh random fill), while both decrypt identically downstream.
        let (packet, peel_keys, _) = build_test_packet(3, b"unlinkable");
        let a = peel_layer(&packet, &peel_keys[0]).expect("peel");
        let b = peel_layer(&packet, &peel_keys[0]).expect("peel");
        let (PeelAction::Forward { packet: pa, .. }, PeelAction::Forward { packet: pb, .. }) =
            (a.action, b.action)
        else {
            panic!("must forward");
        };
        assert_ne!(pa, pb);

        let da = peel_layer(&pa, &peel_keys[1]).expect("peel a");
        let db = peel_layer(&pb, &peel_keys[1]).expect("peel b");
        let (PeelAction::Forward { packet: ia, .. }, PeelAction::Forward { packet: ib, .. }) =
            (da.action, db.action)
        else {
            panic!("must forward");
        };
        // The ciphertext region is identical; only the fill differs.
        let ct_end = HEADER_SIZE + ciphertext_len(2);
        assert_eq!(ia[..ct_end], ib[..ct_end]);
    }
}
