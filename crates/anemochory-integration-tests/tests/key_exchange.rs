//! Integration test: ephemeral key agreement end to end.
//!
//! 1. Keypair generation yields unique session ids and public keys
//! 2. Two parties derive the same shared secret and master key
//! 3. The derived master drives a working AEAD channel
//! 4. Session-id bit flips diffuse through the derived key

use std::collections::HashSet;

use anemochory_crypto::aead::AeadEngine;
use anemochory_crypto::forward::generate_session_keypair;
use anemochory_crypto::kdf::{derive_session_master_key, DEFAULT_SESSION_CONTEXT};
use anemochory_crypto::SecretKey;

#[test]
fn keypair_generation_is_unique() {
    let a = generate_session_keypair();
    let b = generate_session_keypair();
    assert_ne!(a.session_id(), b.session_id());
    assert_ne!(a.public_key(), b.public_key());

    let mut session_ids = HashSet::new();
    for _ in 0..100 {
        let kp = generate_session_keypair();
        assert!(
            session_ids.insert(*kp.session_id()),
            "session id collision in 100 draws"
        );
    }
    assert_eq!(session_ids.len(), 100);
}

#[test]
fn alice_and_bob_agree_and_communicate() {
    // =========================================================
    // Step 1: Both parties generate ephemeral keypairs
    // =========================================================
    let alice = generate_session_keypair();
    let bob = generate_session_keypair();

    // =========================================================
    // Step 2: ECDH from both directions yields the same secret
    // =========================================================
    let alice_shared = alice
        .derive_shared_secret(bob.public_key())
        .expect("alice ecdh");
    let bob_shared = bob
        .derive_shared_secret(alice.public_key())
        .expect("bob ecdh");
    assert_eq!(alice_shared.as_bytes(), bob_shared.as_bytes());

    // =========================================================
    // Step 3: Both sides derive the master under Alice's session id
    // =========================================================
    let timestamp = 1_700_000_000;
    let alice_master = derive_session_master_key(
        alice_shared.as_bytes(),
        alice.session_id(),
        DEFAULT_SESSION_CONTEXT,
        timestamp,
    )
    .expect("alice master");
    let bob_master = derive_session_master_key(
        bob_shared.as_bytes(),
        alice.session_id(),
        DEFAULT_SESSION_CONTEXT,
        timestamp,
    )
    .expect("bob master");
    assert_eq!(alice_master.as_bytes(), bob_master.as_bytes());

    // =========================================================
    // Step 4: The shared master drives a working AEAD channel
    // =========================================================
    let alice_engine = AeadEngine::new(&alice_master);
    let bob_engine = AeadEngine::new(&bob_master);

    let (nonce, ciphertext) = alice_engine
        .encrypt(b"secret communication")
        .expect("encrypt");
    let plaintext = bob_engine.decrypt(&nonce, &ciphertext).expect("decrypt");
    assert_eq!(plaintext, b"secret communication");
}

#[test]
fn different_session_ids_produce_unrelated_channels() {
    let alice = generate_session_keypair();
    let bob = generate_session_keypair();

    let shared = alice
        .derive_shared_secret(bob.public_key())
        .expect("ecdh");

    let master_a =
        derive_session_master_key(shared.as_bytes(), alice.session_id(), DEFAULT_SESSION_CONTEXT, 0)
            .expect("master a");
    let master_b =
        derive_session_master_key(shared.as_bytes(), bob.session_id(), DEFAULT_SESSION_CONTEXT, 0)
            .expect("master b");
    assert_ne!(master_a.as_bytes(), master_b.as_bytes());

    // A channel keyed for one session rejects the other's traffic.
    let engine_a = AeadEngine::new(&master_a);
    let engine_b = AeadEngine::new(&master_b);
    let (nonce, ciphertext) = engine_a.encrypt(b"bound to session a").expect("encrypt");
    assert!(engine_b.decrypt(&nonce, &ciphertext).is_err());
}

#[test]
fn session_id_avalanche() {
    let shared = SecretKey::generate();
    let mut session_id = [0x5Au8; 32];

    let base = derive_session_master_key(
        shared.as_bytes(),
        &session_id,
        DEFAULT_SESSION_CONTEXT,
        0,
    )
    .expect("base");

    session_id[17] ^= 0x04;
    let flipped = derive_session_master_key(
        shared.as_bytes(),
        &session_id,
        DEFAULT_SESSION_CONTEXT,
        0,
    )
    .expect("flipped");

    let differing: u32 = base
        .as_bytes()
        .iter()
        .zip(flipped.as_bytes())
        .map(|(a, b)| (a ^ b).count_ones())
        .sum();
    assert!(
        (85..=171).contains(&differing),
        "one flipped session-id bit changed only {differing} of 256 output bits"
    );
}
