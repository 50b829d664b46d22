//! The per-peer coordination engine.
//!
//! One [`Engine`] per process. It ties together the store, the transport,
//! the protocol handler, the lifecycle ticks, and the layout engine:
//!
//! ```text
//!  ┌────────────────────────────────────────────────────────────────┐
//!  │                        EngineWorker                            │
//!  │                                                                │
//!  │   heartbeat tick ──┐                      ┌── inbound frames   │
//!  │   cleanup tick  ───┤                      │   (from transport) │
//!  │                    ▼                      ▼                    │
//!  │              ┌──────────────────────────────────┐              │
//!  │              │     single select! loop          │              │
//!  │              │  (all state mutation lives here) │              │
//!  │              └────────────────┬─────────────────┘              │
//!  │                    ▲          │                                │
//!  │   public commands ─┘          ▼                                │
//!  │   (update_rect, ...)   Store<MeshState> ──► subscribers        │
//!  └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every mutation, whether it originates from a timer, an inbound frame, or
//! a public call, is applied by the one worker task, so observers always see
//! internally consistent snapshots and no locks are held across callbacks.
//!
//! Boot sequence: announce once (hello), request the current layout, then
//! heartbeat every second. The first [`GRACE_PERIOD_TICKS`] heartbeats run
//! no election, so a burst of simultaneously starting peers discovers each
//! other before anyone assumes leadership.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::codec::session_channel;
use crate::config::BootOptions;
use crate::election;
use crate::geometry::{Layout, Point, Rect, Size};
use crate::layout::{self, LocalView};
use crate::protocol::{
    variant_name, PeerMessage, CLEANUP_INTERVAL_MS, GRACE_PERIOD_TICKS, HEARTBEAT_INTERVAL_MS,
    WINDOW_TIMEOUT_MS,
};
use crate::state::{MeshState, PeerSnapshot};
use crate::store::Store;
use crate::transport::{HandlerGuard, LocalBus, Transport};

// ────────────────────────────────────────────────────────────────────────────
// Options
// ────────────────────────────────────────────────────────────────────────────

/// Construction parameters for one peer.
pub struct EngineOptions {
    /// Own identifier. Defaults to a fresh UUID; never persist or reuse one,
    /// a restarted peer is supposed to look like a brand-new peer.
    pub window_id: String,
    /// Own physical rectangle at boot.
    pub rect: Rect,
    /// Pinned layout overriding all dynamic computation.
    pub static_layout: Option<Layout>,
    /// Seed string whose hash names the session channel (used by
    /// [`Engine::join`]). Empty lands on the default channel.
    pub session_seed: String,
    /// Forces this peer onto the named screen.
    pub screen_id: Option<String>,
    /// Forces the relative position on the assigned screen.
    pub screen_position: Option<Point>,
    /// Physical display size hint for screen-similarity matching.
    pub display_size: Option<Size>,
    /// Timestamp source. Simulations share one virtual clock across peers.
    pub clock: Arc<dyn Clock>,
}

impl EngineOptions {
    pub fn new(rect: Rect) -> Self {
        Self {
            window_id: Uuid::new_v4().to_string(),
            rect,
            static_layout: None,
            session_seed: String::new(),
            screen_id: None,
            screen_position: None,
            display_size: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Builds options from boot configuration.
    pub fn from_boot(boot: &BootOptions, rect: Rect) -> Self {
        let mut options = Self::new(rect);
        if let Some(id) = &boot.window_id {
            options.window_id = id.clone();
        }
        options.static_layout = boot.static_layout();
        options.session_seed = boot.session_seed().to_string();
        options.screen_id = boot.screen_id.clone();
        options.screen_position = boot.screen_position();
        options.display_size = boot.display_size;
        options
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Public façade
// ────────────────────────────────────────────────────────────────────────────

enum Command {
    UpdateRect(Rect),
    SetStaticLayout(Option<Layout>),
    SetSharedData(String, serde_json::Value),
    Dispose,
}

/// Handle to one peer's engine. All methods are cheap and non-blocking; the
/// actual work happens on the worker task.
pub struct Engine {
    store: Arc<Store<MeshState>>,
    window_id: String,
    commands: mpsc::UnboundedSender<Command>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl Engine {
    /// Boots a peer on an already attached transport. Must be called within
    /// a tokio runtime.
    pub fn start(transport: Box<dyn Transport>, options: EngineOptions) -> Self {
        let EngineOptions {
            window_id,
            rect,
            static_layout,
            session_seed: _,
            screen_id,
            screen_position,
            display_size,
            clock,
        } = options;

        let created_at = clock.now_millis();
        let mut state = MeshState::new(window_id.clone(), rect, created_at);
        if let Some(pinned) = static_layout {
            match pinned.validate() {
                Ok(()) => {
                    state.static_layout = Some(pinned.clone());
                    state.layout = Some(pinned);
                }
                Err(err) => {
                    log::warn!("{}: ignoring invalid pinned layout: {}", window_id, err)
                }
            }
        }
        let store = Arc::new(Store::new(state));

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let handler_guard = transport.on_message(Arc::new(move |msg: &PeerMessage| {
            let _ = inbound_tx.send(msg.clone());
        }));
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let worker = EngineWorker {
            store: store.clone(),
            transport,
            clock,
            cancel: cancel.clone(),
            window_id: window_id.clone(),
            screen_override: screen_id,
            position_override: screen_position,
            display_size,
            tick_count: 0,
            _handler_guard: handler_guard,
        };
        let handle = tokio::spawn(worker.run(inbound_rx, command_rx));

        Engine {
            store,
            window_id,
            commands: command_tx,
            cancel,
            worker: Mutex::new(Some(handle)),
            disposed: AtomicBool::new(false),
        }
    }

    /// Boots a peer on `bus`, deriving the channel from the session seed so
    /// peers configured with the same seed find each other.
    pub fn join(bus: &LocalBus, options: EngineOptions) -> Self {
        let channel = session_channel(&options.session_seed);
        let endpoint = bus.attach(&channel);
        Self::start(Box::new(endpoint), options)
    }

    pub fn window_id(&self) -> &str {
        &self.window_id
    }

    /// The reactive state shared with the worker; read via `get()` or
    /// `subscribe()`. Only `shared_data` may be written from outside, and
    /// only through [`Engine::set_shared_data`].
    pub fn store(&self) -> Arc<Store<MeshState>> {
        self.store.clone()
    }

    /// Signals that the physical window rectangle changed.
    pub fn update_rect(&self, rect: Rect) {
        let _ = self.commands.send(Command::UpdateRect(rect));
    }

    /// Installs or clears the pinned layout.
    pub fn set_static_layout(&self, layout: Option<Layout>) {
        let _ = self.commands.send(Command::SetStaticLayout(layout));
    }

    /// Writes a shared-map entry locally and replicates it to all peers.
    /// Concurrent writers of the same key converge on the last delivery.
    pub fn set_shared_data(&self, key: impl Into<String>, value: serde_json::Value) {
        let _ = self
            .commands
            .send(Command::SetSharedData(key.into(), value));
    }

    /// Graceful departure: broadcasts a goodbye, closes the transport, and
    /// stops the worker. Idempotent; later calls no-op.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.commands.send(Command::Dispose);
    }

    /// Stops the worker immediately, without a goodbye. Other peers observe
    /// this as a silent death and evict the entry after the liveness
    /// timeout.
    pub fn abort(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.cancel.cancel();
    }

    /// Disposes and waits for the worker to finish.
    pub async fn shutdown(&self) {
        self.dispose();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.dispose();
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Worker
// ────────────────────────────────────────────────────────────────────────────

struct EngineWorker {
    store: Arc<Store<MeshState>>,
    transport: Box<dyn Transport>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    window_id: String,
    screen_override: Option<String>,
    position_override: Option<Point>,
    display_size: Option<Size>,
    tick_count: u32,
    _handler_guard: HandlerGuard,
}

impl EngineWorker {
    async fn run(
        mut self,
        mut inbound: mpsc::UnboundedReceiver<PeerMessage>,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) {
        // Boot: project a pinned layout if one exists, say hello, and ask
        // whoever leads for the current layout. The announcement is not a
        // heartbeat tick; the grace counter starts with the first tick.
        self.recompute_local_view();
        self.announce();
        self.send(&PeerMessage::RequestLayout {
            id: self.window_id.clone(),
        });

        let beat = Duration::from_millis(HEARTBEAT_INTERVAL_MS);
        let mut heartbeat = interval_at(Instant::now() + beat, beat);
        let sweep = Duration::from_millis(CLEANUP_INTERVAL_MS);
        let mut cleanup = interval_at(Instant::now() + sweep, sweep);
        let cancel = self.cancel.clone();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(command) = commands.recv() => {
                    if self.on_command(command) {
                        break;
                    }
                }
                Some(msg) = inbound.recv() => self.on_message(msg),
                _ = heartbeat.tick() => self.on_heartbeat_tick(),
                _ = cleanup.tick() => self.on_cleanup_tick(),
            }
        }
        log::debug!("{}: engine worker stopped", self.window_id);
    }

    // ── Lifecycle ticks ──────────────────────────────────────────────────

    fn on_heartbeat_tick(&mut self) {
        self.publish_self();
        if self.tick_count < GRACE_PERIOD_TICKS {
            self.tick_count += 1;
            return;
        }
        let state = self.store.get();
        if !state.is_leader && state.layout.is_none() {
            // A throttled leader may not heartbeat towards us in time; keep
            // asking until a layout arrives.
            self.send(&PeerMessage::RequestLayout {
                id: self.window_id.clone(),
            });
        }
        self.run_election();
    }

    fn on_cleanup_tick(&mut self) {
        let now = self.clock.now_millis();
        let mut removed = 0;
        self.store
            .update(|state| removed = state.prune_stale(now, WINDOW_TIMEOUT_MS));
        if removed == 0 {
            return;
        }
        log::debug!("{}: evicted {} stale peer(s)", self.window_id, removed);
        let became_leader = self.run_election();
        let state = self.store.get();
        if !became_leader && state.is_leader && state.static_layout.is_none() {
            self.recompute_world();
        }
    }

    /// Re-runs the election over the live candidate set and applies the
    /// verdict. Returns `true` when this peer just became leader. No-op
    /// during the startup grace period.
    fn run_election(&mut self) -> bool {
        if self.tick_count < GRACE_PERIOD_TICKS {
            return false;
        }
        let now = self.clock.now_millis();
        let state = self.store.get();
        let leader_id = election::elect(&state, now, WINDOW_TIMEOUT_MS).map(|p| p.id.clone());
        if state.leader_id != leader_id {
            let next = leader_id.clone();
            self.store.update(|s| s.leader_id = next);
        }
        let elected_self = leader_id.as_deref() == Some(self.window_id.as_str());
        if elected_self && !state.is_leader {
            log::info!("{}: assuming leadership", self.window_id);
            self.store.update(|s| s.is_leader = true);
            self.send(&PeerMessage::LeaderClaim {
                id: self.window_id.clone(),
                timestamp: now,
            });
            self.recompute_world();
            return true;
        }
        if !elected_self && state.is_leader {
            log::info!(
                "{}: stepping down, leader is now {:?}",
                self.window_id,
                leader_id
            );
            self.store.update(|s| s.is_leader = false);
        }
        false
    }

    // ── Protocol handler ─────────────────────────────────────────────────

    fn on_message(&mut self, msg: PeerMessage) {
        match msg {
            PeerMessage::Hello { peer } | PeerMessage::Heartbeat { peer } => {
                self.on_peer_snapshot(peer)
            }
            PeerMessage::Goodbye { id } => self.on_goodbye(id),
            PeerMessage::LayoutUpdate { layout } => self.on_layout_update(layout),
            PeerMessage::LeaderClaim { id, .. } => self.on_leader_claim(id),
            PeerMessage::RequestLayout { id } => self.on_request_layout(id),
            PeerMessage::SharedDataUpdate { key, value } => {
                self.store.update(|state| {
                    state.shared_data.insert(key, value);
                });
            }
        }
    }

    fn on_peer_snapshot(&mut self, peer: PeerSnapshot) {
        if peer.id == self.window_id {
            // Some transports echo; never let our own frames loop back into
            // the peer table.
            return;
        }
        let now = self.clock.now_millis();
        let mut changed = false;
        self.store
            .update(|state| changed = state.upsert_peer(peer, now));
        if changed && self.store.get().is_leader {
            // A new peer, or a moved window, may alter the frame.
            self.recompute_world();
        }
    }

    fn on_goodbye(&mut self, id: String) {
        if id == self.window_id {
            return;
        }
        let mut removed = false;
        self.store
            .update(|state| removed = state.peers.remove(&id).is_some());
        if !removed {
            return;
        }
        log::info!("{}: peer {} departed", self.window_id, id);
        // Failover without waiting for the next tick: a departed leader
        // leaves its survivors a full candidate set right now.
        let became_leader = self.run_election();
        let state = self.store.get();
        if !became_leader && state.is_leader && state.static_layout.is_none() {
            self.recompute_world();
        }
    }

    fn on_layout_update(&mut self, layout: Layout) {
        let state = self.store.get();
        if state.is_leader {
            // Leaders are the source of truth and ignore inbound layouts.
            return;
        }
        if state.layout.as_ref() == Some(&layout) {
            return;
        }
        if let Err(err) = layout.validate() {
            log::warn!("{}: rejecting inbound layout: {}", self.window_id, err);
            return;
        }
        self.store.update(|s| s.layout = Some(layout));
        self.recompute_local_view();
    }

    fn on_leader_claim(&mut self, id: String) {
        if id == self.window_id {
            return;
        }
        if self.store.get().is_leader {
            log::info!("{}: preempted by leader claim from {}", self.window_id, id);
            self.store.update(|s| s.is_leader = false);
        }
    }

    fn on_request_layout(&mut self, id: String) {
        if id == self.window_id || !self.store.get().is_leader {
            return;
        }
        self.recompute_world();
        // Replay the whole shared map, entry by entry, so the newcomer
        // catches up without a dedicated sync protocol.
        let mut entries: Vec<(String, serde_json::Value)> =
            self.store.get().shared_data.into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        for (key, value) in entries {
            self.send(&PeerMessage::SharedDataUpdate { key, value });
        }
    }

    // ── Commands ─────────────────────────────────────────────────────────

    /// Applies a public command; returns `true` when the worker should stop.
    fn on_command(&mut self, command: Command) -> bool {
        match command {
            Command::UpdateRect(rect) => {
                self.store.update(|state| state.win_rect = rect);
                self.recompute_local_view();
                self.publish_self();
                if self.store.get().is_leader {
                    self.recompute_world();
                }
                false
            }
            Command::SetStaticLayout(layout) => {
                self.store.update(|state| state.static_layout = layout);
                let state = self.store.get();
                if state.is_leader {
                    // Adopts the pin and rebroadcasts it, or recomputes
                    // dynamically when the pin was just cleared.
                    self.recompute_world();
                } else if let Some(pinned) = state.static_layout {
                    match pinned.validate() {
                        Ok(()) => {
                            if state.layout.as_ref() != Some(&pinned) {
                                self.store.update(|s| s.layout = Some(pinned));
                                self.recompute_local_view();
                            }
                        }
                        Err(err) => log::warn!(
                            "{}: ignoring invalid pinned layout: {}",
                            self.window_id,
                            err
                        ),
                    }
                }
                false
            }
            Command::SetSharedData(key, value) => {
                self.store.update(|state| {
                    state.shared_data.insert(key.clone(), value.clone());
                });
                self.send(&PeerMessage::SharedDataUpdate { key, value });
                false
            }
            Command::Dispose => {
                log::info!("{}: disposing", self.window_id);
                self.send(&PeerMessage::Goodbye {
                    id: self.window_id.clone(),
                });
                self.transport.close();
                true
            }
        }
    }

    // ── Layout recomputation ─────────────────────────────────────────────

    /// Leader only: derives the canvas from the peer table (or adopts the
    /// pinned layout) and broadcasts it. Keeps the previous layout when the
    /// result would be invalid or empty.
    fn recompute_world(&mut self) {
        let state = self.store.get();
        if !state.is_leader {
            return;
        }
        let layout = match state.static_layout {
            Some(pinned) => {
                if let Err(err) = pinned.validate() {
                    log::warn!("{}: pinned layout invalid: {}", self.window_id, err);
                    return;
                }
                pinned
            }
            None => match layout::world_from_peers(state.peers.values()) {
                Some(layout) => layout,
                None => return,
            },
        };
        if state.layout.as_ref() != Some(&layout) {
            let fresh = layout.clone();
            self.store.update(|s| s.layout = Some(fresh));
            self.recompute_local_view();
        }
        // Broadcast even when unchanged: layout requests are answered by a
        // rebroadcast, and receivers treat identical layouts as no-ops.
        self.send(&PeerMessage::LayoutUpdate { layout });
    }

    /// Projects this peer into the active layout and commits the derived
    /// placement fields.
    fn recompute_local_view(&mut self) {
        let state = self.store.get();
        let view = match &state.layout {
            Some(layout) => layout::local_view(
                layout,
                &self.window_id,
                state.win_rect,
                self.screen_override.as_deref(),
                self.position_override,
                self.display_size,
            ),
            None => LocalView::default(),
        };
        let current = LocalView {
            assigned_screen_id: state.assigned_screen_id.clone(),
            virtual_rect: state.virtual_rect,
            viewport_offset: state.viewport_offset,
        };
        if view == current {
            return;
        }
        self.store.update(|s| {
            s.assigned_screen_id = view.assigned_screen_id.clone();
            s.virtual_rect = view.virtual_rect;
            s.viewport_offset = view.viewport_offset;
        });
    }

    // ── Outbound helpers ─────────────────────────────────────────────────

    /// Refreshes the self entry and emits a heartbeat.
    fn publish_self(&mut self) {
        let peer = self.refresh_self_entry();
        self.send(&PeerMessage::Heartbeat { peer });
    }

    /// Refreshes the self entry and emits the boot announcement.
    fn announce(&mut self) {
        let peer = self.refresh_self_entry();
        self.send(&PeerMessage::Hello { peer });
    }

    fn refresh_self_entry(&mut self) -> PeerSnapshot {
        let now = self.clock.now_millis();
        let mut snapshot: Option<PeerSnapshot> = None;
        self.store.update(|state| {
            let snap = state.self_snapshot(now);
            state.peers.insert(snap.id.clone(), snap.clone());
            snapshot = Some(snap);
        });
        snapshot.expect("self snapshot always produced")
    }

    /// Fire-and-forget broadcast; failures are logged and the next tick
    /// retries naturally.
    fn send(&self, msg: &PeerMessage) {
        if let Err(err) = self.transport.broadcast(msg) {
            log::warn!(
                "{}: broadcast of {} failed: {}",
                self.window_id,
                variant_name(msg),
                err
            );
        }
    }
}
