//! Gossip protocol message types and timing constants.
//!
//! All frames exchanged on the session channel are defined here so that
//! every component speaks the same language. Frames travel as JSON with an
//! internal `"type"` tag:
//!
//! ```json
//! { "type": "HEARTBEAT", "peer": { ... } }
//! ```

use serde::{Deserialize, Serialize};

use crate::geometry::Layout;
use crate::state::PeerSnapshot;

// ────────────────────────────────────────────────────────────────────────────
// Constants
// ────────────────────────────────────────────────────────────────────────────

/// How often a peer publishes its own snapshot (milliseconds).
pub const HEARTBEAT_INTERVAL_MS: u64 = 1000;

/// How often the stale-peer sweep runs (milliseconds).
pub const CLEANUP_INTERVAL_MS: u64 = 5000;

/// A peer that has been silent for longer than this is considered dead and
/// becomes ineligible as a leader candidate (milliseconds).
pub const WINDOW_TIMEOUT_MS: u64 = 5000;

/// Number of heartbeat ticks after boot during which no election runs, so
/// concurrently starting peers discover each other before deciding.
pub const GRACE_PERIOD_TICKS: u32 = 3;

// ────────────────────────────────────────────────────────────────────────────
// Messages
// ────────────────────────────────────────────────────────────────────────────

/// Envelope for every frame exchanged between peers on a session channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PeerMessage {
    /// New peer announcement, sent once at boot.
    Hello { peer: PeerSnapshot },
    /// Periodic liveness plus the latest rect.
    Heartbeat { peer: PeerSnapshot },
    /// Graceful departure.
    Goodbye { id: String },
    /// Authoritative layout, broadcast by the leader.
    LayoutUpdate { layout: Layout },
    /// Explicit preemption: receivers step down; the next tick re-elects.
    LeaderClaim { id: String, timestamp: u64 },
    /// Newcomer asking the leader to rebroadcast layout and shared data.
    RequestLayout { id: String },
    /// Last-write-wins entry of the replicated shared map.
    SharedDataUpdate {
        key: String,
        value: serde_json::Value,
    },
}

// ────────────────────────────────────────────────────────────────────────────
// Wire helpers
// ────────────────────────────────────────────────────────────────────────────

/// Encodes a message into its wire frame.
pub fn encode_message(msg: &PeerMessage) -> serde_json::Value {
    serde_json::to_value(msg).expect("message serialisation is infallible")
}

/// Tries to decode a wire frame. Returns `None` when the `"type"` tag is
/// absent or unknown, or the payload does not match the variant schema;
/// such frames are dropped by the transport.
pub fn decode_message(frame: &serde_json::Value) -> Option<PeerMessage> {
    serde_json::from_value(frame.clone()).ok()
}

/// Human-readable label for a message variant (for log lines).
pub fn variant_name(msg: &PeerMessage) -> &'static str {
    match msg {
        PeerMessage::Hello { .. } => "HELLO",
        PeerMessage::Heartbeat { .. } => "HEARTBEAT",
        PeerMessage::Goodbye { .. } => "GOODBYE",
        PeerMessage::LayoutUpdate { .. } => "LAYOUT_UPDATE",
        PeerMessage::LeaderClaim { .. } => "LEADER_CLAIM",
        PeerMessage::RequestLayout { .. } => "REQUEST_LAYOUT",
        PeerMessage::SharedDataUpdate { .. } => "SHARED_DATA_UPDATE",
    }
}
