//! Path selection over the node pool.
//!
//! Path selection *is* the anonymity layer: a predictable or attacker-biased
//! path defeats every cipher downstream. Selection therefore combines
//! uniform random sampling with hard constraints:
//!
//! - the first hop must advertise `entry`, the last `exit`, the middles
//!   `relay`;
//! - every hop must clear the reputation threshold;
//! - with subnet diversity on (the default), no two hops may share a `/24`
//!   (IPv4) or `/48` (IPv6) prefix.
//!
//! Layer keys are generated independently per hop from the OS RNG — never
//! derived from a shared master — so compromising one layer's key reveals
//! nothing about the others.

use std::collections::HashSet;

use rand::seq::SliceRandom;

use anemochory_crypto::SecretKey;
use anemochory_types::{
    NodeCapability, NodeId, NodeInfo, NodePool, SessionId, MAX_HOPS, MIN_HOPS,
};

use crate::packet::LayerRoutingInfo;
use crate::{OnionError, Result};

/// A selected path with per-hop key material and routing.
///
/// `nodes[0]` is the entry, `nodes[n-1]` the exit. `layer_keys[i]` and
/// `routing_info[i]` belong to `nodes[i]`.
pub struct RoutingPath {
    /// Hops in forwarding order.
    pub nodes: Vec<NodeInfo>,
    /// Independent AEAD key per hop.
    pub layer_keys: Vec<SecretKey>,
    /// Routing info per hop; the last entry is the exit marker.
    pub routing_info: Vec<LayerRoutingInfo>,
}

impl RoutingPath {
    /// Number of hops.
    pub fn hop_count(&self) -> usize {
        self.nodes.len()
    }

    /// The first hop.
    pub fn entry_node(&self) -> &NodeInfo {
        &self.nodes[0]
    }

    /// The last hop.
    pub fn exit_node(&self) -> &NodeInfo {
        &self.nodes[self.nodes.len() - 1]
    }

    /// The innermost-first `(key, routing)` list the packet builder wants.
    pub fn build_packet_path(&self) -> Vec<(&SecretKey, &LayerRoutingInfo)> {
        self.layer_keys
            .iter()
            .zip(self.routing_info.iter())
            .rev()
            .collect()
    }
}

impl std::fmt::Debug for RoutingPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingPath")
            .field("hop_count", &self.hop_count())
            .finish_non_exhaustive()
    }
}

/// Samples diverse paths from a node pool.
pub struct PathSelector<'a> {
    pool: &'a NodePool,
    hop_count: usize,
    min_reputation: f64,
    enforce_subnet_diversity: bool,
}

impl<'a> PathSelector<'a> {
    /// Create a selector for paths of `hop_count` hops.
    ///
    /// # Errors
    ///
    /// Returns [`OnionError::InvalidHopCount`] outside 3..=7.
    pub fn new(pool: &'a NodePool, hop_count: usize) -> Result<Self> {
        if !(MIN_HOPS..=MAX_HOPS).contains(&hop_count) {
            return Err(OnionError::InvalidHopCount {
                count: hop_count,
                min: MIN_HOPS,
                max: MAX_HOPS,
            });
        }
        Ok(Self {
            pool,
            hop_count,
            min_reputation: 0.0,
            enforce_subnet_diversity: true,
        })
    }

    /// Require a minimum reputation for every hop.
    pub fn min_reputation(mut self, min_reputation: f64) -> Self {
        self.min_reputation = min_reputation;
        self
    }

    /// Toggle subnet-diversity enforcement (on by default).
    pub fn enforce_subnet_diversity(mut self, enforce: bool) -> Self {
        self.enforce_subnet_diversity = enforce;
        self
    }

    /// Select a path, never touching the excluded node ids.
    ///
    /// # Errors
    ///
    /// - [`OnionError::InsufficientNodes`] if no entry or exit candidate
    ///   exists at all;
    /// - [`OnionError::PathConstraint`] if relay or diversity constraints
    ///   cannot be satisfied.
    pub fn select_path(&self, exclude_ids: &HashSet<NodeId>, session_id: &SessionId) -> Result<RoutingPath> {
        let mut rng = rand::thread_rng();
        let no_subnets = HashSet::new();

        let mut chosen: Vec<NodeInfo> = Vec::with_capacity(self.hop_count);
        let mut used_ids: HashSet<NodeId> = exclude_ids.clone();
        let mut used_subnets: HashSet<String> = HashSet::new();

        // Entry hop.
        let entries = self.pool.filter(
            Some(NodeCapability::Entry),
            self.min_reputation,
            &used_ids,
            &no_subnets,
        );
        if entries.is_empty() {
            return Err(OnionError::InsufficientNodes("entry".to_string()));
        }
        let entry = (*entries.choose(&mut rng).expect("non-empty")).clone();
        self.record(&entry, &mut used_ids, &mut used_subnets);
        chosen.push(entry);

        // Exit hop, excluding everything chosen so far.
        let exits = self.pool.filter(
            Some(NodeCapability::Exit),
            self.min_reputation,
            &used_ids,
            &no_subnets,
        );
        if exits.is_empty() {
            return Err(OnionError::InsufficientNodes("exit".to_string()));
        }
        let diverse_exits: Vec<&&NodeInfo> = exits
            .iter()
            .filter(|n| !self.subnet_clash(n, &used_subnets))
            .collect();
        if diverse_exits.is_empty() {
            return Err(OnionError::PathConstraint(
                "no exit candidate outside the used subnets".to_string(),
            ));
        }
        let exit = (**diverse_exits.choose(&mut rng).expect("non-empty")).clone();
        self.record(&exit, &mut used_ids, &mut used_subnets);

        // Middle relays, sampled without replacement with subnet rejection.
        let mut middles: Vec<NodeInfo> = Vec::with_capacity(self.hop_count - 2);
        for position in 1..self.hop_count - 1 {
            let relays = self.pool.filter(
                Some(NodeCapability::Relay),
                self.min_reputation,
                &used_ids,
                &no_subnets,
            );
            let eligible: Vec<&&NodeInfo> = relays
                .iter()
                .filter(|n| !self.subnet_clash(n, &used_subnets))
                .collect();
            let Some(relay) = eligible.choose(&mut rng) else {
                return Err(OnionError::PathConstraint(format!(
                    "no relay candidate for hop {position} under subnet constraints"
                )));
            };
            let relay = (**relay).clone();
            self.record(&relay, &mut used_ids, &mut used_subnets);
            middles.push(relay);
        }

        chosen.extend(middles);
        chosen.push(exit);

        // Independent layer key per hop.
        let layer_keys: Vec<SecretKey> =
            (0..self.hop_count).map(|_| SecretKey::generate()).collect();

        // Routing: hop i points at hop i+1; the exit layer is zeroed.
        let mut routing_info = Vec::with_capacity(self.hop_count);
        for i in 0..self.hop_count - 1 {
            let next = &chosen[i + 1];
            routing_info.push(LayerRoutingInfo::to_hop(
                next.address,
                next.port,
                0,
                *session_id,
            ));
        }
        routing_info.push(LayerRoutingInfo::exit(0, *session_id));

        tracing::debug!(
            hops = self.hop_count,
            entry = %hex::encode(chosen[0].node_id),
            "path selected"
        );

        Ok(RoutingPath {
            nodes: chosen,
            layer_keys,
            routing_info,
        })
    }

    fn subnet_clash(&self, node: &NodeInfo, used_subnets: &HashSet<String>) -> bool {
        self.enforce_subnet_diversity && used_subnets.contains(&node.subnet_prefix())
    }

    fn record(
        &self,
        node: &NodeInfo,
        used_ids: &mut HashSet<NodeId>,
        used_subnets: &mut HashSet<String>,
    ) {
        used_ids.insert(node.node_id);
        used_subnets.insert(node.subnet_prefix());
    }
}
