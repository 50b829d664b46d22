//! viewmesh: serverless coordination for co-located windows.
//!
//! A set of peers (one per process) gossips over a local broadcast bus,
//! elects a single leader deterministically, and agrees on a shared virtual
//! canvas: the leader unions every peer's rectangle into a global frame and
//! broadcasts it, each follower projects itself into that frame and derives
//! its viewport offset. Peers also replicate an arbitrary key-value map with
//! last-write-wins semantics.
//!
//! ```no_run
//! use viewmesh::{Engine, EngineOptions, LocalBus, Rect};
//!
//! # async fn demo() {
//! let bus = LocalBus::new();
//! let engine = Engine::join(&bus, EngineOptions::new(Rect::new(0.0, 0.0, 1280.0, 720.0)));
//!
//! let store = engine.store();
//! let _sub = store.subscribe(|state| {
//!     println!("offset: {:?}, leader: {:?}", state.viewport_offset, state.leader_id);
//! });
//!
//! engine.set_shared_data("cursor", serde_json::json!({ "x": 10, "y": 20 }));
//! engine.shutdown().await;
//! # }
//! ```
//!
//! There is no server and no persistence: identity is regenerated every
//! boot, liveness is heartbeat-based, and a vanished leader is replaced
//! within one liveness timeout.

pub mod clock;
pub mod codec;
pub mod config;
pub mod election;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod layout;
pub mod protocol;
pub mod state;
pub mod store;
pub mod transport;

pub use clock::{Clock, SystemClock, VirtualClock};
pub use codec::{
    decode_layout, decode_screen_position, encode_layout, encode_screen_position, session_channel,
};
pub use config::BootOptions;
pub use engine::{Engine, EngineOptions};
pub use error::MeshError;
pub use geometry::{Layout, Point, Rect, Screen, Size};
pub use protocol::{
    PeerMessage, CLEANUP_INTERVAL_MS, GRACE_PERIOD_TICKS, HEARTBEAT_INTERVAL_MS, WINDOW_TIMEOUT_MS,
};
pub use state::{MeshState, PeerSnapshot};
pub use store::{Store, Subscription};
pub use transport::{BusEndpoint, LocalBus, Transport};
