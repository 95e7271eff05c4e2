//! High-level anonymized send.
//!
//! This is the one API users touch directly; if it is confusing they will
//! bypass anonymization, so it stays small: construct a client over a
//! node pool, call [`AnemochoryClient::send`], read the [`SendResult`].

use std::collections::HashSet;
use std::net::IpAddr;
use std::time::Duration;

use rand::Rng;

use anemochory_crypto::clock::{system_clock, SharedClock};
use anemochory_onion::packet::{build_onion_packet, generate_session_id, max_payload_size};
use anemochory_onion::path::PathSelector;
use anemochory_transport::sender::PacketSender;
use anemochory_types::{session_tag, NodeId, NodePool, DEFAULT_HOP_COUNT};

use crate::{ClientError, Result};

/// Transport attempts beyond the first.
pub const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff between attempts.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(200);

/// Outcome of one send, successful or not.
#[derive(Clone, Debug)]
pub struct SendResult {
    /// Whether the packet reached the entry node.
    pub success: bool,
    /// Hops in the selected path (0 if selection failed).
    pub path_length: usize,
    /// Entry node address, when a path was selected.
    pub entry_address: Option<IpAddr>,
    /// Entry node port, when a path was selected.
    pub entry_port: u16,
    /// Retries consumed (0 = first attempt succeeded).
    pub retries: u32,
    /// Failure description, when unsuccessful.
    pub error: Option<String>,
}

impl SendResult {
    fn failure(error: String) -> Self {
        Self {
            success: false,
            path_length: 0,
            entry_address: None,
            entry_port: 0,
            retries: 0,
            error: Some(error),
        }
    }
}

/// Client for sending anonymized payloads through the relay network.
pub struct AnemochoryClient {
    pool: NodePool,
    hop_count: usize,
    min_reputation: f64,
    our_node_id: Option<NodeId>,
    sender: PacketSender,
    max_retries: u32,
    backoff_base: Duration,
    clock: SharedClock,
}

impl AnemochoryClient {
    /// Create a client over a node pool with default settings
    /// (5 hops, 3 retries).
    pub fn new(pool: NodePool) -> Self {
        Self {
            pool,
            hop_count: DEFAULT_HOP_COUNT,
            min_reputation: 0.0,
            our_node_id: None,
            sender: PacketSender::new(),
            max_retries: MAX_RETRIES,
            backoff_base: DEFAULT_BACKOFF_BASE,
            clock: system_clock(),
        }
    }

    /// Use a specific hop count for all sends.
    pub fn hop_count(mut self, hop_count: usize) -> Self {
        self.hop_count = hop_count;
        self
    }

    /// Require a minimum node reputation on selected paths.
    pub fn min_reputation(mut self, min_reputation: f64) -> Self {
        self.min_reputation = min_reputation;
        self
    }

    /// Exclude our own node id from path selection.
    pub fn our_node_id(mut self, node_id: NodeId) -> Self {
        self.our_node_id = Some(node_id);
        self
    }

    /// Override the retry budget.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Override the backoff base delay.
    pub fn backoff_base(mut self, backoff_base: Duration) -> Self {
        self.backoff_base = backoff_base;
        self
    }

    /// Inject a clock (tests).
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Largest payload this client can send at its configured hop count.
    pub fn max_payload_size(&self) -> usize {
        max_payload_size(self.hop_count)
    }

    /// Send one payload through a freshly selected path.
    ///
    /// Never returns an error: failures are reported in the result. Each
    /// transport failure backs off `base × 2^attempt` plus random jitter
    /// before retrying, up to the retry budget.
    pub async fn send(&self, payload: &[u8]) -> SendResult {
        match self.try_send(payload).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, "send failed");
                SendResult::failure(e.to_string())
            }
        }
    }

    async fn try_send(&self, payload: &[u8]) -> Result<SendResult> {
        if payload.is_empty() {
            return Err(ClientError::EmptyPayload);
        }
        let max = self.max_payload_size();
        if payload.len() > max {
            return Err(ClientError::PayloadTooLarge {
                size: payload.len(),
                max,
            });
        }

        let mut exclude = HashSet::new();
        if let Some(our_id) = self.our_node_id {
            exclude.insert(our_id);
        }

        let session_id = generate_session_id();
        let selector = PathSelector::new(&self.pool, self.hop_count)?
            .min_reputation(self.min_reputation);
        let path = selector.select_path(&exclude, &session_id)?;

        let packet = build_onion_packet(
            payload,
            &path.build_packet_path(),
            &session_id,
            self.clock.now(),
        )?;

        let entry = path.entry_node();
        let tag = session_tag(&session_id);
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            match self
                .sender
                .send_packet(&packet, &tag, entry.address, entry.port)
                .await
            {
                Ok(()) => {
                    tracing::debug!(
                        hops = path.hop_count(),
                        entry = %entry.address,
                        retries = attempt,
                        "payload sent"
                    );
                    return Ok(SendResult {
                        success: true,
                        path_length: path.hop_count(),
                        entry_address: Some(entry.address),
                        entry_port: entry.port,
                        retries: attempt,
                        error: None,
                    });
                }
                Err(e) => {
                    tracing::debug!(attempt, error = %e, "transport attempt failed");
                    last_error = Some(e);
                    if attempt < self.max_retries {
                        tokio::time::sleep(self.backoff_delay(attempt)).await;
                    }
                }
            }
        }

        Ok(SendResult {
            success: false,
            path_length: path.hop_count(),
            entry_address: Some(entry.address),
            entry_port: entry.port,
            retries: self.max_retries,
            error: last_error.map(|e| e.to_string()),
        })
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.backoff_base * 2u32.saturating_pow(attempt);
        let jitter_ms = rand::thread_rng().gen_range(0..=self.backoff_base.as_millis() as u64 / 2);
        base + Duration::from_millis(jitter_ms)
    }
}
