//! Node identity, capabilities, and the routing pool.
//!
//! Every Anemochory node advertises a stable 16-byte identifier, an X25519
//! public key, a network endpoint, a capability set, and a reputation score.
//! The [`NodePool`] is the registry path selection draws from; it supports
//! capability/reputation/subnet filtering and JSON bootstrap persistence.
//!
//! Node identity is public and node compromise is assumed; nothing here is
//! secret. The `/24` (IPv4) and `/48` (IPv6) subnet prefixes exist purely as
//! diversity buckets: nodes sharing a prefix may share an operator.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::net::IpAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::{NodeId, MIN_POOL_SIZE};

/// Error types for node and pool operations.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// A node failed field validation.
    #[error("invalid node: {0}")]
    InvalidNode(String),

    /// Two distinct nodes claimed the same node id.
    #[error("node id conflict: {0} registered with a different public key")]
    IdConflict(String),

    /// Pool file I/O failed.
    #[error("pool I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Pool file was not valid JSON.
    #[error("pool serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience result type for pool operations.
pub type Result<T> = std::result::Result<T, PoolError>;

/// Advertised node capabilities.
///
/// Nodes declare what they can do; malicious nodes will lie, so capability
/// claims gate selection but never substitute for the layered encryption.
///
/// Variants are declared in lexicographic order so that a `BTreeSet`
/// serializes as the sorted lowercase array the bootstrap format requires.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeCapability {
    /// Accepts incoming connections from clients.
    Entry,
    /// Can deliver payloads outside the network.
    Exit,
    /// Sustains >100 Mbps.
    HighBandwidth,
    /// Average RTT under 50 ms.
    LowLatency,
    /// Can forward packets.
    Relay,
}

/// Identity and metadata for a single Anemochory node.
///
/// All fields are attacker-visible. Equality and hashing are defined by
/// `node_id` alone.
#[serde_as]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Stable 16-byte public identifier.
    #[serde_as(as = "serde_with::hex::Hex")]
    pub node_id: NodeId,
    /// Network address (IPv4 or IPv6 literal).
    pub address: IpAddr,
    /// Listening port.
    pub port: u16,
    /// X25519 public key for key exchange.
    #[serde_as(as = "serde_with::hex::Hex")]
    pub public_key: [u8; 32],
    /// Advertised capabilities.
    pub capabilities: BTreeSet<NodeCapability>,
    /// Trust score in `[0.0, 1.0]`.
    pub reputation: f64,
}

impl NodeInfo {
    /// Create a validated node record.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidNode`] if the port is zero or the
    /// reputation falls outside `[0.0, 1.0]`.
    pub fn new(
        node_id: NodeId,
        address: IpAddr,
        port: u16,
        public_key: [u8; 32],
        capabilities: BTreeSet<NodeCapability>,
        reputation: f64,
    ) -> Result<Self> {
        let node = Self {
            node_id,
            address,
            port,
            public_key,
            capabilities,
            reputation,
        };
        node.validate()?;
        Ok(node)
    }

    /// Validate field ranges (also applied to deserialized records).
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(PoolError::InvalidNode("port must be 1-65535".to_string()));
        }
        if !(0.0..=1.0).contains(&self.reputation) {
            return Err(PoolError::InvalidNode(format!(
                "reputation must be 0.0-1.0, got {}",
                self.reputation
            )));
        }
        Ok(())
    }

    /// Diversity bucket for this node: `/24` for IPv4, `/48` for IPv6.
    pub fn subnet_prefix(&self) -> String {
        match self.address {
            IpAddr::V4(v4) => {
                let o = v4.octets();
                format!("{}.{}.{}", o[0], o[1], o[2])
            }
            IpAddr::V6(v6) => {
                let s = v6.segments();
                format!("{:x}:{:x}:{:x}", s[0], s[1], s[2])
            }
        }
    }

    /// Whether this node can forward packets.
    pub fn can_relay(&self) -> bool {
        self.capabilities.contains(&NodeCapability::Relay)
    }

    /// Whether this node can serve as an exit.
    pub fn can_exit(&self) -> bool {
        self.capabilities.contains(&NodeCapability::Exit)
    }
}

impl PartialEq for NodeInfo {
    fn eq(&self, other: &Self) -> bool {
        self.node_id == other.node_id
    }
}

impl Eq for NodeInfo {}

impl std::hash::Hash for NodeInfo {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.node_id.hash(state);
    }
}

/// Registry of known Anemochory nodes.
///
/// A compromised pool is compromised routing; callers bootstrap from
/// multiple sources and verify identities before trusting a pool file.
#[derive(Default)]
pub struct NodePool {
    nodes: HashMap<NodeId, NodeInfo>,
}

/// On-disk pool representation: `{"nodes": [ ... ]}`.
#[derive(Serialize, Deserialize)]
struct PoolFile {
    nodes: Vec<NodeInfo>,
}

impl NodePool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
        }
    }

    /// Add a node, replacing any previous record with the same id.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::IdConflict`] if the id is already registered
    /// under a different public key, or [`PoolError::InvalidNode`] if the
    /// record fails validation.
    pub fn add(&mut self, node: NodeInfo) -> Result<()> {
        node.validate()?;
        if let Some(existing) = self.nodes.get(&node.node_id) {
            if existing.public_key != node.public_key {
                return Err(PoolError::IdConflict(hex::encode(&node.node_id[..8])));
            }
        }
        self.nodes.insert(node.node_id, node);
        Ok(())
    }

    /// Remove a node by id. Unknown ids are ignored.
    pub fn remove(&mut self, node_id: &NodeId) {
        self.nodes.remove(node_id);
    }

    /// Look up a node by id.
    pub fn get(&self, node_id: &NodeId) -> Option<&NodeInfo> {
        self.nodes.get(node_id)
    }

    /// Filter nodes by capability, reputation, and exclusion sets.
    ///
    /// Returns matches sorted by reputation, best first.
    pub fn filter(
        &self,
        capability: Option<NodeCapability>,
        min_reputation: f64,
        exclude_ids: &HashSet<NodeId>,
        exclude_subnets: &HashSet<String>,
    ) -> Vec<&NodeInfo> {
        let mut result: Vec<&NodeInfo> = self
            .nodes
            .values()
            .filter(|n| !exclude_ids.contains(&n.node_id))
            .filter(|n| n.reputation >= min_reputation)
            .filter(|n| capability.map_or(true, |c| n.capabilities.contains(&c)))
            .filter(|n| !exclude_subnets.contains(&n.subnet_prefix()))
            .collect();
        result.sort_by(|a, b| b.reputation.total_cmp(&a.reputation));
        result
    }

    /// Number of registered nodes.
    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether the pool can support diverse path selection.
    pub fn is_viable(&self) -> bool {
        self.size() >= MIN_POOL_SIZE
    }

    /// All registered nodes, in no particular order.
    pub fn all(&self) -> impl Iterator<Item = &NodeInfo> {
        self.nodes.values()
    }

    /// Write the pool to a JSON bootstrap file.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Io`] or [`PoolError::Json`] on failure.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = PoolFile {
            nodes: self.nodes.values().cloned().collect(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load a pool from a JSON bootstrap file, validating every record.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Io`], [`PoolError::Json`], or the validation
    /// errors of [`NodePool::add`].
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let file: PoolFile = serde_json::from_str(&json)?;
        let mut pool = Self::new();
        for node in file.nodes {
            pool.add(node)?;
        }
        Ok(pool)
    }
}

impl std::fmt::Debug for NodePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodePool")
            .field("size", &self.size())
            .field("viable", &self.is_viable())
            .finish()
    }
}
