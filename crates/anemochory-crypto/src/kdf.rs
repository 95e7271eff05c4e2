//! HKDF-SHA256 key derivation.
//!
//! Two families of derivations, all domain-separated by info strings:
//!
//! - **Layer keys**: `anemochory-layer-<i>-of-<N>`. Binding the total layer
//!   count prevents a key derived for an N-layer packet from being misused
//!   at the same index of an M-layer packet.
//! - **Session keys**: `<context>|<hex session_id>|<unix_seconds>` for the
//!   session master, then `anemochory-initial-session` and
//!   `anemochory-ratchet-<i>` along the rotation chain.
//!
//! Every derivation is deterministic: identical inputs produce bit-exact
//! output.

use hkdf::Hkdf;
use sha2::Sha256;

use anemochory_types::{SessionId, KEY_SIZE};

use crate::memwipe::SecretKey;
use crate::{CryptoError, Result};

/// Default context string for session master key derivation.
pub const DEFAULT_SESSION_CONTEXT: &str = "anemochory-session";

/// Info string for the first key in a rotation chain.
const INITIAL_SESSION_INFO: &[u8] = b"anemochory-initial-session";

fn hkdf_expand(salt: Option<&[u8]>, ikm: &[u8], info: &[u8]) -> Result<SecretKey> {
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    let mut okm = [0u8; KEY_SIZE];
    hk.expand(info, &mut okm)
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
    Ok(SecretKey::from_bytes(okm))
}

/// Derive the encryption key for one onion layer.
///
/// # Errors
///
/// Returns [`CryptoError::KeyDerivationFailed`] if `layer_index` is not
/// below `total_layers`.
pub fn derive_layer_key(
    master: &[u8],
    layer_index: usize,
    total_layers: usize,
    salt: Option<&[u8]>,
) -> Result<SecretKey> {
    if layer_index >= total_layers {
        return Err(CryptoError::KeyDerivationFailed(format!(
            "layer index {layer_index} must be below total layers {total_layers}"
        )));
    }
    let info = format!("anemochory-layer-{layer_index}-of-{total_layers}");
    hkdf_expand(salt, master, info.as_bytes())
}

/// Derive a session master key from an ECDH shared secret.
///
/// The info string binds the session id and a unix timestamp, so replaying
/// an observed shared secret with the same session id in a later epoch
/// yields a different key.
pub fn derive_session_master_key(
    shared_secret: &[u8; 32],
    session_id: &SessionId,
    context: &str,
    timestamp: i64,
) -> Result<SecretKey> {
    let info = format!("{context}|{}|{timestamp}", hex::encode(session_id));
    hkdf_expand(None, shared_secret, info.as_bytes())
}

/// Derive the initial session key of a rotation chain from a master key.
pub fn derive_initial_session_key(master: &[u8; KEY_SIZE]) -> Result<SecretKey> {
    hkdf_expand(None, master, INITIAL_SESSION_INFO)
}

/// Ratchet forward: derive key `next_index` from its predecessor.
///
/// The chain is forward-only — key N yields N+1 but never N−1.
pub fn derive_ratchet_key(current: &SecretKey, next_index: u64) -> Result<SecretKey> {
    let info = format!("anemochory-ratchet-{next_index}");
    hkdf_expand(None, current.as_bytes(), info.as_bytes())
}
