//! # anemochory-session
//!
//! The session manager: the glue that turns standalone crypto primitives
//! into a working security stack.
//!
//! ```text
//! EphemeralKeypair ──ECDH──▶ session master ──HKDF──▶ KeyRotationManager
//!                                                          ▲
//!                                                          │
//!                                              ReplayProtector (per session)
//! ```
//!
//! A [`session::SecureSession`] walks the state machine
//! `Created → InitiatingExchange → Established → Closed` and refuses every
//! operation outside its legal state. If any module in the stack fails, the
//! session fails with it.

pub mod session;

pub use session::{SecureSession, SessionState};

/// Error types for session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The operation is illegal in the session's current state.
    #[error("illegal operation {operation} in state {state:?}")]
    State {
        /// The attempted operation.
        operation: &'static str,
        /// The state it was attempted in.
        state: session::SessionState,
    },

    /// An inbound nonce was already seen in this session.
    #[error("replay detected")]
    ReplayDetected,

    /// An inbound packet fell outside the freshness window.
    #[error("packet expired")]
    Expired,

    /// An underlying cryptographic failure.
    #[error("crypto error: {0}")]
    Crypto(#[from] anemochory_crypto::CryptoError),
}

/// Convenience result type for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;
