//! Automatic session key rotation.
//!
//! Session keys are derived from an ephemeral master key and ratcheted
//! forward: the initial key comes from `anemochory-initial-session`, and
//! each successor from `anemochory-ratchet-<i>` applied to its predecessor.
//! A key used for millions of packets is millions of opportunities for
//! cryptanalysis, so rotation triggers at 10 000 packets or one hour,
//! whichever comes first.
//!
//! Displaced keys stay in a bounded grace deque for 60 seconds so in-flight
//! packets still decrypt, then fall out and are zeroized.
//!
//! Known limitation: the ratchet is forward-only but not compromise-proof —
//! an attacker holding key N can derive N+1, N+2, and onward. The
//! mitigation is the session boundary itself: every session starts from a
//! fresh ECDH master (see [`crate::forward`]), so a captured chain dies
//! with its session.

use std::collections::VecDeque;

use anemochory_types::{KEY_SIZE, NONCE_SIZE};

use crate::aead::AeadEngine;
use crate::clock::SharedClock;
use crate::kdf::{derive_initial_session_key, derive_ratchet_key};
use crate::memwipe::SecretKey;
use crate::{CryptoError, Result};

/// Rotate after this many packets under one key.
pub const MAX_PACKETS_PER_KEY: u64 = 10_000;

/// Rotate after this many seconds under one key.
pub const MAX_KEY_AGE_SECS: i64 = 3600;

/// Displaced keys remain usable for decryption this long.
pub const GRACE_PERIOD_SECS: i64 = 60;

/// At most this many displaced keys are retained.
pub const MAX_PREVIOUS_KEYS: usize = 3;

/// Rotation bookkeeping for one session.
#[derive(Default)]
pub struct RotationState {
    /// Rotation count: 0 for the initial key, 1 after the first rotation.
    pub current_key_index: u64,
    /// Packets encrypted under the current key.
    pub packets_with_current_key: u64,
    /// Unix timestamp at which the current key was derived.
    pub key_created_at: i64,
    /// Displaced keys with their displacement timestamps, oldest first.
    previous_keys: VecDeque<(SecretKey, i64)>,
}

impl RotationState {
    /// Whether either rotation trigger has fired.
    pub fn should_rotate(&self, now: i64) -> bool {
        self.packets_with_current_key >= MAX_PACKETS_PER_KEY
            || now - self.key_created_at >= MAX_KEY_AGE_SECS
    }

    /// Whether a displaced key is still inside the grace window.
    pub fn in_grace_period(&self, displaced_at: i64, now: i64) -> bool {
        now - displaced_at <= GRACE_PERIOD_SECS
    }

    /// Number of displaced keys currently retained.
    pub fn grace_key_count(&self) -> usize {
        self.previous_keys.len()
    }
}

/// Point-in-time rotation metrics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RotationStats {
    /// Rotations performed so far.
    pub rotation_count: u64,
    /// Packets encrypted under the current key.
    pub packets_with_current_key: u64,
    /// Age of the current key in seconds.
    pub current_key_age_secs: i64,
    /// Displaced keys available for grace-period decryption.
    pub grace_period_keys: usize,
}

/// Manages the ratcheting key chain for one session.
pub struct KeyRotationManager {
    state: RotationState,
    current_key: SecretKey,
    engine: AeadEngine,
    clock: SharedClock,
}

impl KeyRotationManager {
    /// Create a manager over an ephemeral 32-byte master key.
    ///
    /// The master should come from a fresh key exchange, never from
    /// persistent storage.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyDerivationFailed`] if the initial
    /// derivation fails.
    pub fn new(master: &[u8; KEY_SIZE], clock: SharedClock) -> Result<Self> {
        let initial = derive_initial_session_key(master)?;
        let engine = AeadEngine::new(&initial);
        let state = RotationState {
            key_created_at: clock.now(),
            ..RotationState::default()
        };
        Ok(Self {
            state,
            current_key: initial,
            engine,
            clock,
        })
    }

    /// Rotation bookkeeping for inspection.
    pub fn state(&self) -> &RotationState {
        &self.state
    }

    /// Current rotation metrics.
    pub fn stats(&self) -> RotationStats {
        RotationStats {
            rotation_count: self.state.current_key_index,
            packets_with_current_key: self.state.packets_with_current_key,
            current_key_age_secs: self.clock.now() - self.state.key_created_at,
            grace_period_keys: self.state.previous_keys.len(),
        }
    }

    /// Encrypt under the current key, rotating afterwards if a threshold
    /// was reached.
    ///
    /// # Errors
    ///
    /// Propagates AEAD and derivation failures.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<([u8; NONCE_SIZE], Vec<u8>)> {
        let result = self.engine.encrypt(plaintext)?;
        self.state.packets_with_current_key += 1;
        if self.state.should_rotate(self.clock.now()) {
            self.rotate()?;
        }
        Ok(result)
    }

    /// Rotate to the next key in the chain.
    ///
    /// The displaced key enters the grace deque; if that pushes the deque
    /// past capacity, the eldest key falls out and is zeroized on drop.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyDerivationFailed`] if the ratchet step
    /// fails; the current key is left in place in that case.
    pub fn rotate(&mut self) -> Result<()> {
        let now = self.clock.now();
        let next_index = self.state.current_key_index + 1;
        let next_key = derive_ratchet_key(&self.current_key, next_index)?;

        let displaced = std::mem::replace(&mut self.current_key, next_key);
        self.state.previous_keys.push_back((displaced, now));
        if self.state.previous_keys.len() > MAX_PREVIOUS_KEYS {
            self.state.previous_keys.pop_front();
        }

        self.engine = AeadEngine::new(&self.current_key);
        self.state.current_key_index = next_index;
        self.state.packets_with_current_key = 0;
        self.state.key_created_at = now;

        tracing::debug!(key_index = next_index, "session key rotated");
        Ok(())
    }

    /// Decrypt, trying the current key first and then grace-period keys
    /// most recent first.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::AuthenticationFailed`] if no usable key
    /// authenticates the ciphertext; [`CryptoError::BadNonce`] for a
    /// malformed nonce.
    pub fn decrypt(&self, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        match self.engine.decrypt(nonce, ciphertext) {
            Ok(plaintext) => return Ok(plaintext),
            Err(CryptoError::AuthenticationFailed) => {}
            Err(other) => return Err(other),
        }

        let now = self.clock.now();
        for (key, displaced_at) in self.state.previous_keys.iter().rev() {
            if !self.state.in_grace_period(*displaced_at, now) {
                continue;
            }
            if let Ok(plaintext) = AeadEngine::new(key).decrypt(nonce, ciphertext) {
                return Ok(plaintext);
            }
        }

        Err(CryptoError::AuthenticationFailed)
    }

    /// Drop all key material immediately (session close).
    ///
    /// The manager is unusable afterwards; callers drop it right away.
    pub fn wipe(&mut self) {
        self.current_key = SecretKey::from_bytes([0u8; KEY_SIZE]);
        self.state.previous_keys.clear();
        self.engine = AeadEngine::new(&self.current_key);
    }
}
