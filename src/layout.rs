//! Layout engine: turns the peer table into the global canvas, and the
//! global canvas into this peer's local view.
//!
//! Both directions are pure functions over their inputs. The world
//! computation orders screens by owning peer id, so recomputing from an
//! unchanged peer table yields a structurally identical layout and receivers
//! can treat rebroadcasts as no-ops.

use std::cmp::Ordering;

use crate::codec::hash32;
use crate::geometry::{Layout, Point, Rect, Screen, Size};
use crate::state::PeerSnapshot;

/// Derived placement of one peer inside the active layout.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LocalView {
    pub assigned_screen_id: Option<String>,
    pub virtual_rect: Option<Rect>,
    pub viewport_offset: Point,
}

/// Builds the global layout from peer snapshots.
///
/// Every peer with a positive-size rect contributes one screen: its virtual
/// rect when it has one, its physical rect otherwise. Returns `None` when no
/// peer qualifies or the assembled layout fails validation (the caller keeps
/// its previous layout in that case).
pub fn world_from_peers<'a, I>(peers: I) -> Option<Layout>
where
    I: IntoIterator<Item = &'a PeerSnapshot>,
{
    let mut screens: Vec<Screen> = peers
        .into_iter()
        .filter(|peer| peer.rect.is_valid_screen())
        .map(|peer| {
            let rect = peer.virtual_rect.unwrap_or(peer.rect);
            Screen::from_rect(peer.id.clone(), rect)
        })
        .collect();
    if screens.is_empty() {
        log::debug!("no screen contributors, keeping previous layout");
        return None;
    }
    screens.sort_by(|a, b| a.id.cmp(&b.id));
    match Layout::from_screens(screens) {
        Ok(layout) => Some(layout),
        Err(err) => {
            log::warn!("computed layout failed validation: {}", err);
            None
        }
    }
}

/// How alike two sizes are, in `[0, 1]` for positive sizes: `1` is an exact
/// match, lower means the width/height deviations are larger relative to the
/// bigger of the two.
fn similarity(target: Size, screen: &Screen) -> f64 {
    let dw = (target.w - screen.w).abs() / target.w.max(screen.w);
    let dh = (target.h - screen.h).abs() / target.h.max(screen.h);
    1.0 - (dw + dh) / 2.0
}

/// Picks the screen this peer belongs to.
///
/// Precedence: the externally supplied override when it names a screen in
/// the layout; otherwise the screen most similar in size to `target`, with
/// equal scores broken by the stable hash of `window_id:screen_id` (lowest
/// hash wins) so repeated recomputes and restarts agree; otherwise the first
/// screen.
pub fn assign_screen<'a>(
    layout: &'a Layout,
    window_id: &str,
    override_id: Option<&str>,
    target: Size,
) -> Option<&'a Screen> {
    if let Some(id) = override_id {
        if let Some(screen) = layout.screens.iter().find(|s| s.id == id) {
            return Some(screen);
        }
    }
    if !target.is_positive() {
        return layout.screens.first();
    }
    layout.screens.iter().max_by(|a, b| {
        similarity(target, a)
            .partial_cmp(&similarity(target, b))
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                let hash_a = hash32(&format!("{}:{}", window_id, a.id));
                let hash_b = hash32(&format!("{}:{}", window_id, b.id));
                hash_b.cmp(&hash_a)
            })
    })
}

/// Projects this peer into the layout: assigned screen, virtual rect, and
/// viewport offset.
pub fn local_view(
    layout: &Layout,
    window_id: &str,
    win_rect: Rect,
    screen_override: Option<&str>,
    position_override: Option<Point>,
    display_size: Option<Size>,
) -> LocalView {
    let target = display_size.unwrap_or_else(|| win_rect.size());
    let Some(screen) = assign_screen(layout, window_id, screen_override, target) else {
        return LocalView::default();
    };
    let relative = position_override
        .unwrap_or_else(|| Point::new(win_rect.x - screen.x, win_rect.y - screen.y));
    let virtual_rect = Rect::new(
        screen.x + relative.x,
        screen.y + relative.y,
        win_rect.w,
        win_rect.h,
    );
    let viewport_offset = Point::new(
        virtual_rect.x - layout.frame.x,
        virtual_rect.y - layout.frame.y,
    );
    LocalView {
        assigned_screen_id: Some(screen.id.clone()),
        virtual_rect: Some(virtual_rect),
        viewport_offset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(id: &str, rect: Rect) -> PeerSnapshot {
        PeerSnapshot {
            id: id.into(),
            created_at: 0,
            last_seen: 0,
            rect,
            assigned_screen_id: None,
            virtual_rect: None,
            timestamp: 0,
        }
    }

    fn two_screen_layout() -> Layout {
        Layout::from_screens(vec![
            Screen::from_rect("big", Rect::new(0.0, 0.0, 1920.0, 1080.0)),
            Screen::from_rect("small", Rect::new(1920.0, 0.0, 800.0, 600.0)),
        ])
        .unwrap()
    }

    #[test]
    fn world_orders_screens_by_peer_id_and_unions_frame() {
        let peers = vec![
            snapshot("z", Rect::new(800.0, 0.0, 800.0, 600.0)),
            snapshot("a", Rect::new(0.0, 0.0, 800.0, 600.0)),
        ];
        let layout = world_from_peers(peers.iter()).unwrap();
        let ids: Vec<&str> = layout.screens.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "z"]);
        assert_eq!(layout.frame, Rect::new(0.0, 0.0, 1600.0, 600.0));
    }

    #[test]
    fn world_skips_zero_size_contributors() {
        let peers = vec![
            snapshot("ok", Rect::new(0.0, 0.0, 800.0, 600.0)),
            snapshot("empty", Rect::new(0.0, 0.0, 0.0, 0.0)),
        ];
        let layout = world_from_peers(peers.iter()).unwrap();
        assert_eq!(layout.screens.len(), 1);
        assert_eq!(layout.screens[0].id, "ok");
    }

    #[test]
    fn world_is_empty_without_contributors() {
        let peers = vec![snapshot("empty", Rect::new(0.0, 0.0, 0.0, -1.0))];
        assert!(world_from_peers(peers.iter()).is_none());
    }

    #[test]
    fn world_prefers_virtual_rects() {
        let mut peer = snapshot("a", Rect::new(5.0, 5.0, 800.0, 600.0));
        peer.virtual_rect = Some(Rect::new(100.0, 0.0, 800.0, 600.0));
        let layout = world_from_peers(std::iter::once(&peer)).unwrap();
        assert_eq!(layout.screens[0].rect(), Rect::new(100.0, 0.0, 800.0, 600.0));
    }

    #[test]
    fn world_is_idempotent_over_equal_input() {
        let peers = vec![
            snapshot("b", Rect::new(800.0, 0.0, 800.0, 600.0)),
            snapshot("a", Rect::new(0.0, 0.0, 800.0, 600.0)),
        ];
        assert_eq!(world_from_peers(peers.iter()), world_from_peers(peers.iter()));
    }

    #[test]
    fn override_beats_similarity() {
        let layout = two_screen_layout();
        let screen =
            assign_screen(&layout, "w", Some("small"), Size::new(1920.0, 1080.0)).unwrap();
        assert_eq!(screen.id, "small");
    }

    #[test]
    fn unknown_override_falls_back_to_similarity() {
        let layout = two_screen_layout();
        let screen =
            assign_screen(&layout, "w", Some("missing"), Size::new(1900.0, 1000.0)).unwrap();
        assert_eq!(screen.id, "big");
    }

    #[test]
    fn closest_size_wins() {
        let layout = two_screen_layout();
        let screen = assign_screen(&layout, "w", None, Size::new(790.0, 610.0)).unwrap();
        assert_eq!(screen.id, "small");
    }

    #[test]
    fn ties_are_stable_across_recomputes() {
        // Two identically sized screens force the hash tie-break.
        let layout = Layout::from_screens(vec![
            Screen::from_rect("one", Rect::new(0.0, 0.0, 800.0, 600.0)),
            Screen::from_rect("two", Rect::new(800.0, 0.0, 800.0, 600.0)),
        ])
        .unwrap();
        let first = assign_screen(&layout, "w", None, Size::new(800.0, 600.0)).unwrap();
        for _ in 0..10 {
            let again = assign_screen(&layout, "w", None, Size::new(800.0, 600.0)).unwrap();
            assert_eq!(first.id, again.id);
        }
    }

    #[test]
    fn local_view_projects_offsets() {
        let layout = Layout::from_screens(vec![
            Screen::from_rect("a", Rect::new(-100.0, 0.0, 800.0, 600.0)),
            Screen::from_rect("b", Rect::new(700.0, 0.0, 800.0, 600.0)),
        ])
        .unwrap();
        let view = local_view(
            &layout,
            "w",
            Rect::new(710.0, 20.0, 800.0, 600.0),
            Some("b"),
            None,
            None,
        );
        assert_eq!(view.assigned_screen_id.as_deref(), Some("b"));
        assert_eq!(view.virtual_rect, Some(Rect::new(710.0, 20.0, 800.0, 600.0)));
        // Offset is relative to the frame origin at (-100, 0).
        assert_eq!(view.viewport_offset, Point::new(810.0, 20.0));
    }

    #[test]
    fn position_override_moves_the_virtual_rect() {
        let layout = two_screen_layout();
        let view = local_view(
            &layout,
            "w",
            Rect::new(0.0, 0.0, 800.0, 600.0),
            Some("small"),
            Some(Point::new(10.0, 20.0)),
            None,
        );
        assert_eq!(view.virtual_rect, Some(Rect::new(1930.0, 20.0, 800.0, 600.0)));
        assert_eq!(view.viewport_offset, Point::new(1930.0, 20.0));
    }
}
