//! Shared helpers for Anemochory integration tests.

use rand::rngs::OsRng;
use rand::RngCore;

use anemochory_types::{NodeCapability, NodeInfo, NodePool, NODE_ID_SIZE};

/// Build a node with a random identity at the given endpoint.
pub fn make_node(address: &str, port: u16, caps: &[NodeCapability]) -> NodeInfo {
    let mut node_id = [0u8; NODE_ID_SIZE];
    OsRng.fill_bytes(&mut node_id);
    let mut public_key = [0u8; 32];
    OsRng.fill_bytes(&mut public_key);

    NodeInfo::new(
        node_id,
        address.parse().expect("valid address"),
        port,
        public_key,
        caps.iter().copied().collect(),
        0.8,
    )
    .expect("valid node")
}

/// Build a pool of `entries + relays + exits` nodes, each in its own /24.
pub fn diverse_pool(entries: usize, relays: usize, exits: usize) -> NodePool {
    let mut pool = NodePool::new();
    let mut subnet = 0u8;

    for _ in 0..entries {
        pool.add(make_node(
            &format!("10.{subnet}.0.1"),
            8000 + u16::from(subnet),
            &[NodeCapability::Entry, NodeCapability::Relay],
        ))
        .expect("add entry");
        subnet += 1;
    }
    for _ in 0..relays {
        pool.add(make_node(
            &format!("10.{subnet}.0.1"),
            8000 + u16::from(subnet),
            &[NodeCapability::Relay],
        ))
        .expect("add relay");
        subnet += 1;
    }
    for _ in 0..exits {
        pool.add(make_node(
            &format!("10.{subnet}.0.1"),
            8000 + u16::from(subnet),
            &[NodeCapability::Exit, NodeCapability::Relay],
        ))
        .expect("add exit");
        subnet += 1;
    }

    pool
}
