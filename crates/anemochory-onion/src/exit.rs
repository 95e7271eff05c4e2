//! Exit-side payload handling.
//!
//! When a packet's innermost layer is peeled, the recovered payload lands
//! here. What "exit" means is deployment-specific; this handler validates
//! and echoes, which is enough for loopback deployments and tests. Real
//! deployments wrap it with their own dispatch.

/// Largest payload an exit will accept.
pub const MAX_EXIT_PAYLOAD_SIZE: usize = 64 * 1024;

/// Outcome of handling one exit payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExitResponse {
    /// Whether the payload was accepted.
    pub success: bool,
    /// The handled payload (echoed back).
    pub payload: Vec<u8>,
    /// HTTP-style status code for the dispatch result.
    pub status_code: u16,
    /// Failure description, if any.
    pub error: Option<String>,
}

/// Exit-handling counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExitStats {
    /// Payloads accepted and dispatched.
    pub handled: u64,
    /// Payloads rejected.
    pub failed: u64,
}

/// Accepts exit payloads, enforces the size cap, and echoes them.
#[derive(Debug, Default)]
pub struct ExitHandler {
    stats: ExitStats,
}

impl ExitHandler {
    /// Create a fresh handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current counters.
    pub fn stats(&self) -> ExitStats {
        self.stats
    }

    /// Validate and dispatch one payload.
    pub fn handle_payload(&mut self, payload: &[u8]) -> ExitResponse {
        if payload.is_empty() {
            self.stats.failed += 1;
            return ExitResponse {
                success: false,
                payload: Vec::new(),
                status_code: 400,
                error: Some("empty payload".to_string()),
            };
        }
        if payload.len() > MAX_EXIT_PAYLOAD_SIZE {
            self.stats.failed += 1;
            return ExitResponse {
                success: false,
                payload: Vec::new(),
                status_code: 413,
                error: Some(format!(
                    "payload too large: {} bytes, max {MAX_EXIT_PAYLOAD_SIZE}",
                    payload.len()
                )),
            };
        }

        self.stats.handled += 1;
        tracing::debug!(bytes = payload.len(), "exit payload handled");
        ExitResponse {
            success: true,
            payload: payload.to_vec(),
            status_code: 200,
            error: None,
        }
    }
}
