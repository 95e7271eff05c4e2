//! Secure session lifecycle.
//!
//! Legal operations per state:
//!
//! | Operation | Created | Initiating | Established | Closed |
//! |---|---|---|---|---|
//! | `initiate_key_exchange` | ✓ | ✗ | ✗ | ✗ |
//! | `complete_key_exchange` | ✗ | ✓ | ✗ | ✗ |
//! | `establish_with_shared_key` | ✓ | ✗ | ✗ | ✗ |
//! | `encrypt` / `decrypt` | ✗ | ✗ | ✓ | ✗ |
//! | `close` | ✓ | ✓ | ✓ | no-op |
//!
//! Establishment derives the session master key from the ECDH shared
//! secret, then hands it to a rotation manager; the replay protector rides
//! alongside. Closing wipes the rotation chain and the ephemeral private
//! key.

use anemochory_crypto::clock::SharedClock;
use anemochory_crypto::forward::{generate_session_keypair, EphemeralKeypair};
use anemochory_crypto::kdf::{derive_session_master_key, DEFAULT_SESSION_CONTEXT};
use anemochory_crypto::replay::{PacketMetadata, ReplayProtector};
use anemochory_crypto::rotation::KeyRotationManager;
use anemochory_types::{SessionId, KEY_SIZE, NONCE_SIZE};

use crate::{Result, SessionError};

/// Where a session is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Fresh session; no key material agreed yet.
    Created,
    /// Our public key is out; waiting for the peer's.
    InitiatingExchange,
    /// Shared keys derived; traffic may flow.
    Established,
    /// Terminated; all key material wiped.
    Closed,
}

/// An encrypted packet with its replay metadata.
#[derive(Clone, Debug)]
pub struct SealedPacket {
    /// AEAD nonce.
    pub nonce: [u8; NONCE_SIZE],
    /// Ciphertext with appended tag.
    pub ciphertext: Vec<u8>,
    /// Freshness metadata to travel alongside the ciphertext.
    pub metadata: PacketMetadata,
}

/// One end of an Anemochory session.
pub struct SecureSession {
    state: SessionState,
    clock: SharedClock,
    keypair: Option<EphemeralKeypair>,
    session_id: SessionId,
    rotation: Option<KeyRotationManager>,
    replay: Option<ReplayProtector>,
    sequence: u64,
}

impl SecureSession {
    /// Create a session with a fresh ephemeral keypair and session id.
    pub fn new(clock: SharedClock) -> Self {
        let keypair = generate_session_keypair();
        let session_id = *keypair.session_id();
        Self::build(clock, keypair, session_id)
    }

    /// Create a responder session bound to the initiator's session id.
    ///
    /// Both ends must derive the master key under the same session id; the
    /// responder adopts the id it received instead of its own.
    pub fn with_session_id(clock: SharedClock, session_id: SessionId) -> Self {
        let keypair = generate_session_keypair();
        Self::build(clock, keypair, session_id)
    }

    fn build(clock: SharedClock, keypair: EphemeralKeypair, session_id: SessionId) -> Self {
        Self {
            state: SessionState::Created,
            clock,
            keypair: Some(keypair),
            session_id,
            rotation: None,
            replay: None,
            sequence: 0,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// This session's identifier.
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Begin the key exchange; returns our ephemeral public key to send.
    ///
    /// # Errors
    ///
    /// [`SessionError::State`] unless the session is `Created`.
    pub fn initiate_key_exchange(&mut self) -> Result<[u8; 32]> {
        self.require_state(SessionState::Created, "initiate_key_exchange")?;
        let public = *self
            .keypair
            .as_ref()
            .ok_or(SessionError::State {
                operation: "initiate_key_exchange",
                state: self.state,
            })?
            .public_key();
        self.state = SessionState::InitiatingExchange;
        Ok(public)
    }

    /// Finish the key exchange with the peer's public key.
    ///
    /// # Errors
    ///
    /// [`SessionError::State`] unless the session is `InitiatingExchange`;
    /// [`SessionError::Crypto`] if the peer key is rejected.
    pub fn complete_key_exchange(&mut self, peer_public: &[u8]) -> Result<()> {
        self.require_state(SessionState::InitiatingExchange, "complete_key_exchange")?;
        let shared = self
            .keypair
            .as_ref()
            .ok_or(SessionError::State {
                operation: "complete_key_exchange",
                state: self.state,
            })?
            .derive_shared_secret(peer_public)?;
        self.establish(shared.as_bytes())
    }

    /// Establish directly from an out-of-band shared secret.
    ///
    /// The secret runs through the same master-key derivation as the
    /// completed-exchange path, so both routes bind the session id
    /// identically.
    ///
    /// # Errors
    ///
    /// [`SessionError::State`] unless the session is `Created`.
    pub fn establish_with_shared_key(&mut self, shared_secret: &[u8; KEY_SIZE]) -> Result<()> {
        self.require_state(SessionState::Created, "establish_with_shared_key")?;
        self.establish(shared_secret)
    }

    fn establish(&mut self, shared_secret: &[u8; KEY_SIZE]) -> Result<()> {
        let master = derive_session_master_key(
            shared_secret,
            &self.session_id,
            DEFAULT_SESSION_CONTEXT,
            self.clock.now(),
        )?;
        self.rotation = Some(KeyRotationManager::new(master.as_bytes(), self.clock.clone())?);
        self.replay = Some(ReplayProtector::new(self.clock.clone()));
        self.state = SessionState::Established;
        tracing::debug!(
            session = %hex::encode(&self.session_id[..8]),
            "session established"
        );
        Ok(())
    }

    /// Encrypt a packet under the session's current key.
    ///
    /// The nonce is recorded in our own replay protector, so a peer
    /// reflecting our packets back at us is caught as a replay.
    ///
    /// # Errors
    ///
    /// [`SessionError::State`] unless established; [`SessionError::Crypto`]
    /// on cipher failure.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<SealedPacket> {
        self.require_state(SessionState::Established, "encrypt")?;
        let rotation = self.rotation.as_mut().ok_or(SessionError::State {
            operation: "encrypt",
            state: self.state,
        })?;
        let (nonce, ciphertext) = rotation.encrypt(plaintext)?;

        let replay = self.replay.as_mut().ok_or(SessionError::State {
            operation: "encrypt",
            state: self.state,
        })?;
        replay.mark_seen(&nonce, &self.session_id);
        let metadata = replay.create_metadata(self.session_id, self.sequence, None);
        self.sequence += 1;

        Ok(SealedPacket {
            nonce,
            ciphertext,
            metadata,
        })
    }

    /// Decrypt a packet: freshness, replay, then the rotation key chain.
    ///
    /// # Errors
    ///
    /// [`SessionError::Expired`] outside the freshness window,
    /// [`SessionError::ReplayDetected`] for repeated nonces,
    /// [`SessionError::Crypto`] if no session key authenticates the
    /// ciphertext, [`SessionError::State`] unless established.
    pub fn decrypt(
        &mut self,
        nonce: &[u8; NONCE_SIZE],
        ciphertext: &[u8],
        metadata: &PacketMetadata,
    ) -> Result<Vec<u8>> {
        self.require_state(SessionState::Established, "decrypt")?;
        let replay = self.replay.as_mut().ok_or(SessionError::State {
            operation: "decrypt",
            state: self.state,
        })?;

        if !replay.validate_freshness(metadata, None) {
            return Err(SessionError::Expired);
        }
        if replay.is_seen(nonce, &self.session_id) {
            return Err(SessionError::ReplayDetected);
        }

        let rotation = self.rotation.as_ref().ok_or(SessionError::State {
            operation: "decrypt",
            state: self.state,
        })?;
        let plaintext = rotation.decrypt(nonce, ciphertext)?;

        let replay = self.replay.as_mut().ok_or(SessionError::State {
            operation: "decrypt",
            state: self.state,
        })?;
        replay.mark_seen(nonce, &self.session_id);
        replay.track_sequence(metadata);

        Ok(plaintext)
    }

    /// Close the session and wipe its key material. Idempotent.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        if let Some(mut rotation) = self.rotation.take() {
            rotation.wipe();
        }
        // Dropping the keypair zeroizes the ephemeral private key.
        self.keypair = None;
        self.replay = None;
        self.state = SessionState::Closed;
        tracing::debug!(
            session = %hex::encode(&self.session_id[..8]),
            "session closed"
        );
    }

    fn require_state(&self, required: SessionState, operation: &'static str) -> Result<()> {
        if self.state == required {
            Ok(())
        } else {
            Err(SessionError::State {
                operation,
                state: self.state,
            })
        }
    }
}

impl Drop for SecureSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anemochory_crypto::clock::ManualClock;
    use anemochory_crypto::replay::DEFAULT_MAX_AGE_SECS;
    use std::sync::Arc;

    const NOW: i64 = 1_700_000_000;

    fn session() -> (SecureSession, Arc<ManualClock>) {
        let clock = ManualClock::new(NOW);
        (SecureSession::new(clock.clone()), clock)
    }

    /// Run the full exchange between two sessions sharing one clock.
    fn established_pair() -> (SecureSession, SecureSession, Arc<ManualClock>) {
        let clock = ManualClock::new(NOW);
        let mut alice = SecureSession::new(clock.clone());
        let mut bob = SecureSession::with_session_id(clock.clone(), *alice.session_id());

        let alice_pub = alice.initiate_key_exchange().expect("alice initiate");
        let bob_pub = bob.initiate_key_exchange().expect("bob initiate");

        alice.complete_key_exchange(&bob_pub).expect("alice complete");
        bob.complete_key_exchange(&alice_pub).expect("bob complete");
        (alice, bob, clock)
    }

    #[test]
    fn test_initial_state() {
        let (session, _) = session();
        assert_eq!(session.state(), SessionState::Created);
        assert_ne!(session.session_id(), &[0u8; 32]);
    }

    #[test]
    fn test_exchange_walks_states() {
        let (mut alice, _) = session();
        let (mut bob, _) = session();

        let _alice_pub = alice.initiate_key_exchange().expect("initiate");
        assert_eq!(alice.state(), SessionState::InitiatingExchange);

        let bob_pub = bob.initiate_key_exchange().expect("initiate");
        alice.complete_key_exchange(&bob_pub).expect("complete");
        assert_eq!(alice.state(), SessionState::Established);
    }

    #[test]
    fn test_establish_with_shared_key() {
        let (mut session, _) = session();
        session
            .establish_with_shared_key(&[0x42u8; KEY_SIZE])
            .expect("establish");
        assert_eq!(session.state(), SessionState::Established);
    }

    #[test]
    fn test_illegal_transitions() {
        // initiate twice
        let (mut s, _) = session();
        s.initiate_key_exchange().expect("first initiate");
        assert!(matches!(
            s.initiate_key_exchange(),
            Err(SessionError::State { .. })
        ));

        // complete without initiating
        let (mut s, _) = session();
        assert!(matches!(
            s.complete_key_exchange(&[1u8; 32]),
            Err(SessionError::State { .. })
        ));

        // establish_with_shared_key after initiating
        let (mut s, _) = session();
        s.initiate_key_exchange().expect("initiate");
        assert!(matches!(
            s.establish_with_shared_key(&[1u8; KEY_SIZE]),
            Err(SessionError::State { .. })
        ));

        // encrypt before establishment
        let (mut s, _) = session();
        assert!(matches!(s.encrypt(b"x"), Err(SessionError::State { .. })));

        // anything after close
        let (mut s, _) = session();
        s.close();
        assert!(matches!(
            s.initiate_key_exchange(),
            Err(SessionError::State { .. })
        ));
        assert!(matches!(s.encrypt(b"x"), Err(SessionError::State { .. })));
    }

    #[test]
    fn test_close_is_idempotent() {
        let (mut s, _) = session();
        s.establish_with_shared_key(&[1u8; KEY_SIZE]).expect("establish");
        s.close();
        assert_eq!(s.state(), SessionState::Closed);
        s.close();
        assert_eq!(s.state(), SessionState::Closed);
    }

    #[test]
    fn test_peer_to_peer_traffic() {
        let (mut alice, mut bob, _) = established_pair();

        let sealed = alice.encrypt(b"secret communication").expect("encrypt");
        let plaintext = bob
            .decrypt(&sealed.nonce, &sealed.ciphertext, &sealed.metadata)
            .expect("decrypt");
        assert_eq!(plaintext, b"secret communication");
    }

    #[test]
    fn test_reflected_packet_rejected() {
        let (mut alice, _bob, _) = established_pair();

        let sealed = alice.encrypt(b"mine").expect("encrypt");
        // Our own nonce bounced back at us must read as a replay.
        assert!(matches!(
            alice.decrypt(&sealed.nonce, &sealed.ciphertext, &sealed.metadata),
            Err(SessionError::ReplayDetected)
        ));
    }

    #[test]
    fn test_inbound_replay_rejected() {
        let (mut alice, mut bob, _) = established_pair();

        let sealed = alice.encrypt(b"once only").expect("encrypt");
        bob.decrypt(&sealed.nonce, &sealed.ciphertext, &sealed.metadata)
            .expect("first decrypt");
        assert!(matches!(
            bob.decrypt(&sealed.nonce, &sealed.ciphertext, &sealed.metadata),
            Err(SessionError::ReplayDetected)
        ));
    }

    #[test]
    fn test_stale_packet_rejected() {
        let (mut alice, mut bob, clock) = established_pair();

        let sealed = alice.encrypt(b"slow packet").expect("encrypt");
        clock.advance(DEFAULT_MAX_AGE_SECS + 6);
        assert!(matches!(
            bob.decrypt(&sealed.nonce, &sealed.ciphertext, &sealed.metadata),
            Err(SessionError::Expired)
        ));
    }

    #[test]
    fn test_sequence_numbers_increment() {
        let (mut alice, _bob, _) = established_pair();
        let first = alice.encrypt(b"a").expect("encrypt");
        let second = alice.encrypt(b"b").expect("encrypt");
        assert_eq!(first.metadata.sequence_number, 0);
        assert_eq!(second.metadata.sequence_number, 1);
    }

    #[test]
    fn test_decrypt_after_close_fails() {
        let (mut alice, mut bob, _) = established_pair();
        let sealed = alice.encrypt(b"late").expect("encrypt");
        bob.close();
        assert!(matches!(
            bob.decrypt(&sealed.nonce, &sealed.ciphertext, &sealed.metadata),
            Err(SessionError::State { .. })
        ));
    }
}
