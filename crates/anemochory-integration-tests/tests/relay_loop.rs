//! Integration test: a live three-relay chain over loopback TCP.
//!
//! 1. Bind three relay servers on ephemeral loopback ports
//! 2. Build a pool whose endpoints are those listeners
//! 3. Select a path, register layer keys at each relay
//! 4. Send one onion packet to the entry; watch it exit at the last relay

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use anemochory_client::AnemochoryClient;
use anemochory_crypto::clock::{Clock, SystemClock};
use anemochory_integration_tests::make_node;
use anemochory_onion::packet::{build_onion_packet, generate_session_id};
use anemochory_onion::path::PathSelector;
use anemochory_onion::processor::RelayNode;
use anemochory_transport::sender::PacketSender;
use anemochory_transport::server::{NodeServer, ServerStats};
use anemochory_types::{session_tag, NodeCapability, NodePool};

#[tokio::test]
async fn packet_traverses_three_live_relays() {
    // =========================================================
    // Step 1: Bind listeners first so the pool knows real ports
    // =========================================================
    let mut listeners = Vec::new();
    for _ in 0..3 {
        listeners.push(TcpListener::bind("127.0.0.1:0").await.expect("bind"));
    }
    let ports: Vec<u16> = listeners
        .iter()
        .map(|l| l.local_addr().expect("addr").port())
        .collect();

    // =========================================================
    // Step 2: One entry, one relay, one exit, all on loopback
    // =========================================================
    let mut pool = NodePool::new();
    let caps = [
        vec![NodeCapability::Entry, NodeCapability::Relay],
        vec![NodeCapability::Relay],
        vec![NodeCapability::Exit, NodeCapability::Relay],
    ];
    let nodes: Vec<_> = ports
        .iter()
        .zip(caps.iter())
        .map(|(port, caps)| make_node("127.0.0.1", *port, caps))
        .collect();
    for node in &nodes {
        pool.add(node.clone()).expect("add node");
    }

    // All three share the loopback /24, so diversity must be off.
    let session_id = generate_session_id();
    let selector = PathSelector::new(&pool, 3)
        .expect("selector")
        .enforce_subnet_diversity(false);
    let path = selector
        .select_path(&HashSet::new(), &session_id)
        .expect("path");

    // =========================================================
    // Step 3: One server per path position, keyed for the session
    // =========================================================
    let mut servers = Vec::new();
    for (position, node_info) in path.nodes.iter().enumerate() {
        let mut relay = RelayNode::new(node_info.clone(), Arc::new(SystemClock));
        relay.register_session_key(session_id, path.layer_keys[position].clone());
        servers.push(NodeServer::with_read_timeout(
            relay,
            Duration::from_millis(500),
        ));
    }

    // One candidate per role, so the path order matches the bind order.
    for (position, node_info) in path.nodes.iter().enumerate() {
        assert_eq!(node_info.port, ports[position]);
    }

    let mut shutdowns = Vec::new();
    for (server, listener) in servers.iter().zip(listeners.into_iter()) {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        shutdowns.push(tx);
        tokio::spawn(Arc::clone(server).serve_with_shutdown(listener, async {
            let _ = rx.await;
        }));
    }

    // =========================================================
    // Step 4: Build the onion and hand it to the entry node
    // =========================================================
    let payload = b"Hello from the anonymous sender!";
    let packet = build_onion_packet(
        payload,
        &path.build_packet_path(),
        &session_id,
        SystemClock.now(),
    )
    .expect("build packet");

    let entry = path.entry_node();
    PacketSender::new()
        .send_packet(&packet, &session_tag(&session_id), entry.address, entry.port)
        .await
        .expect("send to entry");

    // The packet crosses two forwarding hops with 5-50 ms jitter each;
    // poll the exit server's counters instead of guessing a sleep.
    let exit_server = &servers[2];
    let mut exited = 0;
    for _ in 0..100 {
        exited = ServerStats::get(&exit_server.stats().packets_exited);
        if exited > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(exited, 1, "payload never reached the exit");

    let exit_stats = exit_server.with_exit_handler(|h| h.stats());
    assert_eq!(exit_stats.handled, 1);

    assert_eq!(
        ServerStats::get(&servers[0].stats().packets_forwarded),
        1,
        "entry did not forward"
    );
    assert_eq!(
        ServerStats::get(&servers[1].stats().packets_forwarded),
        1,
        "relay did not forward"
    );

    for tx in shutdowns {
        let _ = tx.send(());
    }
}

#[tokio::test]
async fn client_send_is_fire_and_forget() {
    // A live entry node that has no key for the client's session: the
    // packet is received and silently dropped, and the client still
    // reports success — delivery is never acknowledged at this layer.
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let entry_port = listener.local_addr().expect("addr").port();

    let entry_identity = make_node(
        "127.0.0.1",
        entry_port,
        &[NodeCapability::Entry, NodeCapability::Relay],
    );
    let server = NodeServer::with_read_timeout(
        RelayNode::new(entry_identity.clone(), Arc::new(SystemClock)),
        Duration::from_millis(500),
    );
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(Arc::clone(&server).serve_with_shutdown(listener, async {
        let _ = rx.await;
    }));

    let mut pool = NodePool::new();
    pool.add(entry_identity).expect("add entry");
    pool.add(make_node("127.0.1.1", 1, &[NodeCapability::Relay]))
        .expect("add relay");
    pool.add(make_node(
        "127.0.2.1",
        1,
        &[NodeCapability::Exit, NodeCapability::Relay],
    ))
    .expect("add exit");

    let client = AnemochoryClient::new(pool).hop_count(3);
    let result = client.send(b"wind-borne").await;

    assert!(result.success, "send failed: {:?}", result.error);
    assert_eq!(result.path_length, 3);
    assert_eq!(result.retries, 0);
    assert_eq!(result.entry_port, entry_port);

    // The entry saw the frame and dropped it without a word.
    let mut received = 0;
    for _ in 0..50 {
        received = ServerStats::get(&server.stats().packets_received);
        if received > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(received, 1);
    assert_eq!(ServerStats::get(&server.stats().packets_forwarded), 0);

    let _ = tx.send(());
}
