//! Ephemeral X25519 key agreement (RFC 7748) for forward secrecy.
//!
//! Every session starts from a fresh X25519 keypair and a random 32-byte
//! session id. If a node is compromised after a session ends, past traffic
//! stays secure because the ephemeral private key was wiped at close and
//! never persisted.

use rand::rngs::OsRng;
use rand::RngCore;
use x25519_dalek::{PublicKey, StaticSecret};

use anemochory_types::{SessionId, SESSION_ID_SIZE};

use crate::memwipe::SecretKey;
use crate::{CryptoError, Result};

/// X25519 public key size in raw bytes.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// An ephemeral keypair scoped to one session.
///
/// The private key zeroizes on drop (via `x25519-dalek`); the caller is
/// expected to drop the keypair when the session closes and never persist
/// it.
pub struct EphemeralKeypair {
    secret: StaticSecret,
    public: [u8; PUBLIC_KEY_SIZE],
    session_id: SessionId,
}

impl EphemeralKeypair {
    /// The raw public key to send to the peer.
    pub fn public_key(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.public
    }

    /// The random session id bound to this keypair.
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Perform ECDH with the peer's raw public key.
    ///
    /// Both parties computing this with each other's public keys obtain the
    /// same 32 bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyExchangeFailed`] if the peer key is not 32
    /// bytes or is a low-order point (the shared secret would be all zeros
    /// and attacker-controlled).
    pub fn derive_shared_secret(&self, their_public: &[u8]) -> Result<SecretKey> {
        if their_public.len() != PUBLIC_KEY_SIZE {
            return Err(CryptoError::KeyExchangeFailed(format!(
                "peer public key must be {PUBLIC_KEY_SIZE} bytes, got {}",
                their_public.len()
            )));
        }
        let mut pk_bytes = [0u8; PUBLIC_KEY_SIZE];
        pk_bytes.copy_from_slice(their_public);

        let shared = self.secret.diffie_hellman(&PublicKey::from(pk_bytes));
        if !shared.was_contributory() {
            return Err(CryptoError::KeyExchangeFailed(
                "peer public key is a low-order point".to_string(),
            ));
        }
        Ok(SecretKey::from_bytes(*shared.as_bytes()))
    }
}

impl std::fmt::Debug for EphemeralKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralKeypair")
            .field("session_id", &hex::encode(&self.session_id[..8]))
            .finish_non_exhaustive()
    }
}

/// Generate a fresh ephemeral keypair and session id.
///
/// Every call yields a unique session id and public key with overwhelming
/// probability.
pub fn generate_session_keypair() -> EphemeralKeypair {
    let secret = StaticSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret);

    let mut session_id = [0u8; SESSION_ID_SIZE];
    OsRng.fill_bytes(&mut session_id);

    EphemeralKeypair {
        secret,
        public: public.to_bytes(),
        session_id,
    }
}
