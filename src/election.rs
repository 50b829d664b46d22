//! Deterministic leader election.
//!
//! The oldest live peer wins: smallest `created_at`, ties broken by
//! lexicographic id. Every peer evaluating the same candidate set reaches
//! the same verdict, so no negotiation round is needed; convergence follows
//! from the peer tables converging.

use crate::state::{MeshState, PeerSnapshot};

/// Picks the leader among `candidates`: smallest `(created_at, id)`.
pub fn elect_leader<'a, I>(candidates: I) -> Option<&'a PeerSnapshot>
where
    I: IntoIterator<Item = &'a PeerSnapshot>,
{
    candidates.into_iter().min_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    })
}

/// Elects over the live candidate set of `state`: every known peer whose
/// `last_seen` is within `timeout_ms` of `now`, with the self entry always
/// eligible.
pub fn elect<'a>(state: &'a MeshState, now: u64, timeout_ms: u64) -> Option<&'a PeerSnapshot> {
    elect_leader(state.peers.values().filter(|peer| {
        peer.id == state.window_id || now.saturating_sub(peer.last_seen) <= timeout_ms
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;

    fn snapshot(id: &str, created_at: u64, last_seen: u64) -> PeerSnapshot {
        PeerSnapshot {
            id: id.into(),
            created_at,
            last_seen,
            rect: Rect::new(0.0, 0.0, 800.0, 600.0),
            assigned_screen_id: None,
            virtual_rect: None,
            timestamp: created_at,
        }
    }

    #[test]
    fn oldest_peer_wins() {
        let peers = vec![
            snapshot("young", 300, 0),
            snapshot("oldest", 100, 0),
            snapshot("middle", 200, 0),
        ];
        assert_eq!(elect_leader(peers.iter()).unwrap().id, "oldest");
    }

    #[test]
    fn ties_break_on_lexicographic_id() {
        let peers = vec![snapshot("b", 100, 0), snapshot("a", 100, 0)];
        assert_eq!(elect_leader(peers.iter()).unwrap().id, "a");
    }

    #[test]
    fn election_is_deterministic_over_permutations() {
        let a = snapshot("a", 50, 0);
        let b = snapshot("b", 50, 0);
        let c = snapshot("c", 10, 0);
        let forward = vec![&a, &b, &c];
        let backward = vec![&c, &b, &a];
        assert_eq!(
            elect_leader(forward).unwrap().id,
            elect_leader(backward).unwrap().id
        );
    }

    #[test]
    fn stale_peers_are_not_candidates() {
        let mut state = MeshState::new("self".into(), Rect::new(0.0, 0.0, 1.0, 1.0), 500);
        let own = state.self_snapshot(10_000);
        state.peers.insert(own.id.clone(), own);
        // Older than self, but silent past the timeout.
        state.peers.insert("dead".into(), snapshot("dead", 0, 2_000));
        let leader = elect(&state, 10_000, 5_000).unwrap();
        assert_eq!(leader.id, "self");
    }

    #[test]
    fn self_is_eligible_even_when_stale() {
        let mut state = MeshState::new("self".into(), Rect::new(0.0, 0.0, 1.0, 1.0), 500);
        let own = state.self_snapshot(0);
        state.peers.insert(own.id.clone(), own);
        let leader = elect(&state, 60_000, 5_000).unwrap();
        assert_eq!(leader.id, "self");
    }

    #[test]
    fn empty_candidate_set_elects_nobody() {
        let state = MeshState::new("self".into(), Rect::default(), 0);
        assert!(elect(&state, 0, 5_000).is_none());
    }
}
