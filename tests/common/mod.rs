#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use viewmesh::{EngineOptions, MeshState, Rect, VirtualClock};

/// Installs a terminal logger once per test binary.
pub fn init_logger() {
    use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};
    let _ = TermLogger::init(
        LevelFilter::Debug,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    );
}

/// Options for one simulated peer. All peers in a scenario must share the
/// same virtual clock so birth times and liveness windows are comparable.
pub fn peer_options(id: &str, rect: Rect, clock: &Arc<VirtualClock>) -> EngineOptions {
    let mut options = EngineOptions::new(rect);
    options.window_id = id.to_string();
    options.clock = clock.clone();
    options
}

/// Side-by-side 800x600 window rects, one per peer index.
pub fn window_rect(index: usize) -> Rect {
    Rect::new(index as f64 * 800.0, 0.0, 800.0, 600.0)
}

/// Lets queued frames and worker turns drain without crossing a tick
/// boundary.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}

/// Screen ids of the active layout, in layout order.
pub fn screen_ids(state: &MeshState) -> Vec<String> {
    state
        .layout
        .as_ref()
        .map(|layout| layout.screens.iter().map(|s| s.id.clone()).collect())
        .unwrap_or_default()
}

/// Structural invariants that must hold in every reachable state: a valid
/// layout whose frame is the union of its screens, and a viewport offset
/// that equals the virtual rect origin relative to the frame origin.
pub fn assert_state_invariants(state: &MeshState) {
    if let Some(layout) = &state.layout {
        layout
            .validate()
            .unwrap_or_else(|err| panic!("{}: layout invariant broken: {}", state.window_id, err));
        if let Some(virtual_rect) = state.virtual_rect {
            assert_eq!(
                state.viewport_offset.x,
                virtual_rect.x - layout.frame.x,
                "{}: viewport x offset",
                state.window_id
            );
            assert_eq!(
                state.viewport_offset.y,
                virtual_rect.y - layout.frame.y,
                "{}: viewport y offset",
                state.window_id
            );
        }
    }
}
