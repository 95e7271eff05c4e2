//! Replay protection: nonce tracking and timestamp freshness.
//!
//! A captured packet replayed minutes later is a correlation probe. Two
//! defenses compose here:
//!
//! - **Freshness**: packet timestamps must fall inside
//!   `[now − max_age − 5, now + 5]`; the ±5 s slack absorbs clock skew.
//! - **Nonce tracking**: a nonce seen twice under the same session id is a
//!   replay. Nonces are tracked per session, with a global cap enforced by
//!   least-recently-inserted eviction across all sessions.
//!
//! Sequence numbers are recorded only as per-session high-water marks.
//! Network reordering is legitimate; strict ordering is not enforced.

use std::collections::{HashMap, HashSet, VecDeque};

use anemochory_types::{SessionId, NONCE_SIZE};

use crate::clock::SharedClock;

/// Default packet freshness window in seconds.
pub const DEFAULT_MAX_AGE_SECS: i64 = 60;

/// Tolerated clock skew in seconds, applied on both window edges.
pub const CLOCK_SKEW_SECS: i64 = 5;

/// Default global cap on tracked nonces across all sessions.
pub const DEFAULT_MAX_TRACKED_NONCES: usize = 100_000;

/// A tracked AEAD nonce.
pub type Nonce = [u8; NONCE_SIZE];

/// Freshness metadata carried alongside a packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketMetadata {
    /// Unix timestamp at packet creation.
    pub timestamp: i64,
    /// Monotonic sequence within the session.
    pub sequence_number: u64,
    /// Session the packet belongs to.
    pub session_id: SessionId,
}

/// Point-in-time replay-tracking metrics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReplayStats {
    /// Sessions with at least one tracked nonce.
    pub active_sessions: usize,
    /// Nonces tracked across all sessions.
    pub tracked_nonces: usize,
}

/// Tracks seen nonces and validates packet freshness.
pub struct ReplayProtector {
    max_age: i64,
    max_tracked: usize,
    clock: SharedClock,
    /// Per-session nonce sets.
    seen: HashMap<SessionId, HashSet<Nonce>>,
    /// Global insertion order for eviction. May hold stale entries for
    /// retired sessions; those are skipped during eviction.
    order: VecDeque<(SessionId, Nonce)>,
    /// Live nonce count (excludes stale order entries).
    tracked: usize,
    /// Highest sequence number observed per session.
    high_water: HashMap<SessionId, u64>,
}

impl ReplayProtector {
    /// Create a protector with the default window and capacity.
    pub fn new(clock: SharedClock) -> Self {
        Self::with_limits(DEFAULT_MAX_AGE_SECS, DEFAULT_MAX_TRACKED_NONCES, clock)
    }

    /// Create a protector with explicit freshness window and nonce cap.
    pub fn with_limits(max_age: i64, max_tracked: usize, clock: SharedClock) -> Self {
        Self {
            max_age,
            max_tracked,
            clock,
            seen: HashMap::new(),
            order: VecDeque::new(),
            tracked: 0,
            high_water: HashMap::new(),
        }
    }

    /// Build metadata for an outbound packet.
    pub fn create_metadata(
        &self,
        session_id: SessionId,
        sequence_number: u64,
        now: Option<i64>,
    ) -> PacketMetadata {
        PacketMetadata {
            timestamp: now.unwrap_or_else(|| self.clock.now()),
            sequence_number,
            session_id,
        }
    }

    /// Whether a packet's timestamp falls inside the freshness window.
    pub fn validate_freshness(&self, metadata: &PacketMetadata, now: Option<i64>) -> bool {
        let now = now.unwrap_or_else(|| self.clock.now());
        let age = now - metadata.timestamp;
        age <= self.max_age + CLOCK_SKEW_SECS && age >= -CLOCK_SKEW_SECS
    }

    /// Whether this nonce was already recorded for this session.
    ///
    /// The same nonce under a different session id is not a replay.
    pub fn is_seen(&self, nonce: &Nonce, session_id: &SessionId) -> bool {
        self.seen
            .get(session_id)
            .is_some_and(|nonces| nonces.contains(nonce))
    }

    /// Record a nonce as seen, evicting the oldest nonces across all
    /// sessions if the global cap is exceeded.
    pub fn mark_seen(&mut self, nonce: &Nonce, session_id: &SessionId) {
        let nonces = self.seen.entry(*session_id).or_default();
        if nonces.insert(*nonce) {
            self.order.push_back((*session_id, *nonce));
            self.tracked += 1;
            self.evict_over_cap();
        }
    }

    /// Record a sequence number; returns whether the packet is acceptable.
    ///
    /// Always true today — only the high-water mark is kept. Gaps and
    /// reordering are legitimate network behavior.
    pub fn track_sequence(&mut self, metadata: &PacketMetadata) -> bool {
        let entry = self.high_water.entry(metadata.session_id).or_insert(0);
        *entry = (*entry).max(metadata.sequence_number);
        true
    }

    /// Highest sequence number observed for a session.
    pub fn high_water_mark(&self, session_id: &SessionId) -> Option<u64> {
        self.high_water.get(session_id).copied()
    }

    /// Drop all state for a finished session.
    pub fn retire_session(&mut self, session_id: &SessionId) {
        if let Some(nonces) = self.seen.remove(session_id) {
            self.tracked -= nonces.len();
        }
        self.high_water.remove(session_id);
        // Stale order entries for the retired session are skipped when the
        // eviction scan reaches them.
    }

    /// Current tracking metrics.
    pub fn stats(&self) -> ReplayStats {
        ReplayStats {
            active_sessions: self.seen.len(),
            tracked_nonces: self.tracked,
        }
    }

    fn evict_over_cap(&mut self) {
        while self.tracked > self.max_tracked {
            let Some((session_id, nonce)) = self.order.pop_front() else {
                break;
            };
            if let Some(nonces) = self.seen.get_mut(&session_id) {
                if nonces.remove(&nonce) {
                    self.tracked -= 1;
                    if nonces.is_empty() {
                        self.seen.remove(&session_id);
                    }
                }
            }
        }
    }
}
