//! Engine state: the self view, the peer table, and the replicated shared
//! map. This is the single value held by the engine's [`Store`].
//!
//! [`Store`]: crate::store::Store

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::geometry::{Layout, Point, Rect};

/// The gossip view of one peer, as carried by hello and heartbeat frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerSnapshot {
    pub id: String,
    /// Birth time of the peer process, in clock millis. Drives the election.
    pub created_at: u64,
    /// Local reception time of the latest frame from this peer.
    pub last_seen: u64,
    pub rect: Rect,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_screen_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub virtual_rect: Option<Rect>,
    /// Clock millis at which the snapshot was taken by its owner.
    pub timestamp: u64,
}

/// Everything one peer knows. Cheap to clone; replaced wholesale on every
/// store write.
#[derive(Debug, Clone)]
pub struct MeshState {
    /// Own identifier, regenerated on every boot.
    pub window_id: String,
    /// Own birth time in clock millis.
    pub created_at: u64,
    /// Own physical rectangle.
    pub win_rect: Rect,
    /// Latest snapshot per known peer, self included.
    pub peers: HashMap<String, PeerSnapshot>,
    /// Current globally agreed layout, if any has been observed.
    pub layout: Option<Layout>,
    /// Derived: the screen this peer was assigned to.
    pub assigned_screen_id: Option<String>,
    /// Derived: translation from frame coordinates to local content.
    pub viewport_offset: Point,
    /// Derived: own rectangle in frame coordinates.
    pub virtual_rect: Option<Rect>,
    pub is_leader: bool,
    pub leader_id: Option<String>,
    /// Replicated key-value map, last write wins.
    pub shared_data: HashMap<String, serde_json::Value>,
    /// Pinned layout overriding dynamic computation.
    pub static_layout: Option<Layout>,
}

impl MeshState {
    pub fn new(window_id: String, win_rect: Rect, created_at: u64) -> Self {
        Self {
            window_id,
            created_at,
            win_rect,
            peers: HashMap::new(),
            layout: None,
            assigned_screen_id: None,
            viewport_offset: Point::default(),
            virtual_rect: None,
            is_leader: false,
            leader_id: None,
            shared_data: HashMap::new(),
            static_layout: None,
        }
    }

    /// The snapshot this peer gossips about itself.
    pub fn self_snapshot(&self, now: u64) -> PeerSnapshot {
        PeerSnapshot {
            id: self.window_id.clone(),
            created_at: self.created_at,
            last_seen: now,
            rect: self.win_rect,
            assigned_screen_id: self.assigned_screen_id.clone(),
            virtual_rect: self.virtual_rect,
            timestamp: now,
        }
    }

    /// Inserts or refreshes a peer entry, stamping `last_seen` with the local
    /// reception time. Returns `true` when the canvas-relevant fields changed
    /// (a brand-new peer, or a rect that differs from the stored entry), so
    /// callers know whether a layout recomputation is worthwhile.
    pub fn upsert_peer(&mut self, mut snapshot: PeerSnapshot, now: u64) -> bool {
        snapshot.last_seen = now;
        match self.peers.get(&snapshot.id) {
            Some(existing) => {
                let changed = existing.rect != snapshot.rect
                    || existing.virtual_rect != snapshot.virtual_rect;
                self.peers.insert(snapshot.id.clone(), snapshot);
                changed
            }
            None => {
                self.peers.insert(snapshot.id.clone(), snapshot);
                true
            }
        }
    }

    /// Evicts peers whose `last_seen` is older than `timeout_ms`. The self
    /// entry is never evicted. Returns the number of entries removed.
    pub fn prune_stale(&mut self, now: u64, timeout_ms: u64) -> usize {
        let own_id = self.window_id.clone();
        let before = self.peers.len();
        self.peers
            .retain(|id, peer| *id == own_id || now.saturating_sub(peer.last_seen) <= timeout_ms);
        before - self.peers.len()
    }
}
