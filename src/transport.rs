//! Broadcast transport abstraction plus the in-process bus implementation.
//!
//! A [`Transport`] is a duplex attachment to one session channel: broadcasts
//! reach every *other* attachment on the same channel (never the sender),
//! inbound frames are decoded and fanned out to the registered handlers, and
//! undecodable frames are dropped before they can touch any state.
//!
//! [`LocalBus`] is the concrete medium shipped with the crate: a
//! process-wide hub of named channels for co-located peers. Beyond plain
//! delivery it can model network conditions, which the integration suite
//! leans on heavily:
//!
//! - partition groups (`set_partition`): frames only flow between endpoints
//!   in the same group, so split-brain and heal sequences can be scripted;
//! - inbound frame filters (`set_inbound_filter`): per-endpoint predicates
//!   over raw frames, e.g. "this endpoint never sees heartbeats from A",
//!   mimicking a throttled background peer.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::error::MeshError;
use crate::protocol::{decode_message, encode_message, variant_name, PeerMessage};

/// Inbound message callback. Runs on the sender's thread.
pub type MessageHandler = Arc<dyn Fn(&PeerMessage) + Send + Sync>;

/// Predicate over raw inbound frames; `false` drops the frame.
pub type FrameFilter = Arc<dyn Fn(&serde_json::Value) -> bool + Send + Sync>;

// ────────────────────────────────────────────────────────────────────────────
// Transport trait
// ────────────────────────────────────────────────────────────────────────────

/// Duplex message bus scoped to one session channel.
pub trait Transport: Send + Sync {
    /// Delivers `msg` to every other peer on the channel. Never echoes back
    /// to the sender. Fire-and-forget; failures are reported but delivery is
    /// best-effort either way.
    fn broadcast(&self, msg: &PeerMessage) -> Result<(), MeshError>;

    /// Registers an inbound handler. Every handler receives every decodable
    /// frame; handler panics are isolated. Dropping the guard unregisters.
    fn on_message(&self, handler: MessageHandler) -> HandlerGuard;

    /// Severs the channel and clears handlers. No deliveries afterwards.
    fn close(&self);
}

/// Unregistration guard returned by [`Transport::on_message`].
pub struct HandlerGuard(Option<Box<dyn FnOnce() + Send>>);

impl HandlerGuard {
    pub fn new(unregister: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(unregister)))
    }

    /// Explicitly unregisters; equivalent to dropping the guard.
    pub fn cancel(self) {}
}

impl Drop for HandlerGuard {
    fn drop(&mut self) {
        if let Some(unregister) = self.0.take() {
            unregister();
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// In-process bus
// ────────────────────────────────────────────────────────────────────────────

struct EndpointShared {
    id: u64,
    channel: String,
    partition: AtomicU32,
    closed: AtomicBool,
    handlers: RwLock<Vec<(u64, MessageHandler)>>,
    next_handler_id: AtomicU64,
    filter: RwLock<Option<FrameFilter>>,
}

impl EndpointShared {
    fn dispatch(&self, msg: &PeerMessage) {
        // Snapshot the handler list so a handler may (un)register without
        // holding the lock across callbacks.
        let handlers: Vec<(u64, MessageHandler)> = self.handlers.read().clone();
        for (id, handler) in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(msg))).is_err() {
                log::warn!(
                    "message handler {} on channel {} panicked, continuing",
                    id,
                    self.channel
                );
            }
        }
    }
}

type Registry = Arc<RwLock<Vec<Arc<EndpointShared>>>>;

/// Process-wide broadcast hub with named channels.
#[derive(Clone, Default)]
pub struct LocalBus {
    registry: Registry,
    next_endpoint_id: Arc<AtomicU64>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a new endpoint to `channel`. The endpoint is cheap to clone;
    /// clones share the attachment, so a caller can hand one clone to an
    /// engine and keep another for partition or filter control.
    pub fn attach(&self, channel: &str) -> BusEndpoint {
        let shared = Arc::new(EndpointShared {
            id: self.next_endpoint_id.fetch_add(1, Ordering::Relaxed),
            channel: channel.to_string(),
            partition: AtomicU32::new(0),
            closed: AtomicBool::new(false),
            handlers: RwLock::new(Vec::new()),
            next_handler_id: AtomicU64::new(0),
            filter: RwLock::new(None),
        });
        let mut registry = self.registry.write();
        registry.retain(|endpoint| !endpoint.closed.load(Ordering::SeqCst));
        registry.push(shared.clone());
        BusEndpoint {
            registry: self.registry.clone(),
            shared,
        }
    }
}

/// One attachment to a [`LocalBus`] channel.
#[derive(Clone)]
pub struct BusEndpoint {
    registry: Registry,
    shared: Arc<EndpointShared>,
}

impl BusEndpoint {
    pub fn channel(&self) -> &str {
        &self.shared.channel
    }

    /// Moves this endpoint into a partition group. Frames only flow between
    /// endpoints sharing a group; everyone starts in group 0.
    pub fn set_partition(&self, group: u32) {
        self.shared.partition.store(group, Ordering::SeqCst);
    }

    pub fn partition(&self) -> u32 {
        self.shared.partition.load(Ordering::SeqCst)
    }

    /// Installs or clears a predicate over raw inbound frames for this
    /// endpoint; frames it rejects are silently dropped.
    pub fn set_inbound_filter(&self, filter: Option<FrameFilter>) {
        *self.shared.filter.write() = filter;
    }

    /// Sends a raw frame to the other endpoints on the channel. Frames that
    /// fail to decode at a receiver are dropped there; this is how malformed
    /// traffic is modelled in tests.
    pub fn broadcast_raw(&self, frame: &serde_json::Value) -> Result<(), MeshError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(MeshError::TransportClosed);
        }
        let partition = self.shared.partition.load(Ordering::SeqCst);
        // Collect the targets first so no registry lock is held while
        // handlers run (a handler may broadcast in turn).
        let targets: Vec<Arc<EndpointShared>> = self
            .registry
            .read()
            .iter()
            .filter(|endpoint| {
                endpoint.id != self.shared.id
                    && endpoint.channel == self.shared.channel
                    && !endpoint.closed.load(Ordering::SeqCst)
                    && endpoint.partition.load(Ordering::SeqCst) == partition
            })
            .cloned()
            .collect();
        for endpoint in targets {
            let allowed = endpoint
                .filter
                .read()
                .as_ref()
                .map(|filter| filter(frame))
                .unwrap_or(true);
            if !allowed {
                continue;
            }
            match decode_message(frame) {
                Some(msg) => endpoint.dispatch(&msg),
                None => log::debug!(
                    "dropping undecodable frame on channel {}",
                    endpoint.channel
                ),
            }
        }
        Ok(())
    }
}

impl Transport for BusEndpoint {
    fn broadcast(&self, msg: &PeerMessage) -> Result<(), MeshError> {
        log::trace!(
            "channel {}: broadcasting {}",
            self.shared.channel,
            variant_name(msg)
        );
        self.broadcast_raw(&encode_message(msg))
    }

    fn on_message(&self, handler: MessageHandler) -> HandlerGuard {
        let id = self.shared.next_handler_id.fetch_add(1, Ordering::Relaxed);
        self.shared.handlers.write().push((id, handler));
        let weak: Weak<EndpointShared> = Arc::downgrade(&self.shared);
        HandlerGuard::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.handlers.write().retain(|(hid, _)| *hid != id);
            }
        })
    }

    fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.handlers.write().clear();
        *self.shared.filter.write() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    fn collector(endpoint: &BusEndpoint) -> (Arc<Mutex<Vec<PeerMessage>>>, HandlerGuard) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let guard = endpoint.on_message(Arc::new(move |msg: &PeerMessage| {
            sink.lock().push(msg.clone());
        }));
        (seen, guard)
    }

    fn goodbye(id: &str) -> PeerMessage {
        PeerMessage::Goodbye { id: id.into() }
    }

    #[test]
    fn broadcast_reaches_others_but_never_echoes() {
        let bus = LocalBus::new();
        let a = bus.attach("room");
        let b = bus.attach("room");
        let (seen_a, _ga) = collector(&a);
        let (seen_b, _gb) = collector(&b);
        a.broadcast(&goodbye("a")).unwrap();
        assert!(seen_a.lock().is_empty());
        assert_eq!(*seen_b.lock(), vec![goodbye("a")]);
    }

    #[test]
    fn channels_are_isolated() {
        let bus = LocalBus::new();
        let a = bus.attach("one");
        let b = bus.attach("two");
        let (seen_b, _g) = collector(&b);
        a.broadcast(&goodbye("a")).unwrap();
        assert!(seen_b.lock().is_empty());
    }

    #[test]
    fn partitions_block_cross_group_delivery() {
        let bus = LocalBus::new();
        let a = bus.attach("room");
        let b = bus.attach("room");
        let (seen_b, _g) = collector(&b);
        b.set_partition(1);
        a.broadcast(&goodbye("a")).unwrap();
        assert!(seen_b.lock().is_empty());
        // Healing the partition restores delivery.
        b.set_partition(0);
        a.broadcast(&goodbye("a")).unwrap();
        assert_eq!(seen_b.lock().len(), 1);
    }

    #[test]
    fn malformed_frames_are_dropped_silently() {
        let bus = LocalBus::new();
        let a = bus.attach("room");
        let b = bus.attach("room");
        let (seen_b, _g) = collector(&b);
        a.broadcast_raw(&json!({ "no": "discriminator" })).unwrap();
        a.broadcast_raw(&json!({ "type": "BOGUS" })).unwrap();
        a.broadcast(&goodbye("a")).unwrap();
        assert_eq!(seen_b.lock().len(), 1);
    }

    #[test]
    fn inbound_filter_drops_selected_frames() {
        let bus = LocalBus::new();
        let a = bus.attach("room");
        let b = bus.attach("room");
        let (seen_b, _g) = collector(&b);
        b.set_inbound_filter(Some(Arc::new(|frame: &serde_json::Value| {
            frame["type"] != "GOODBYE"
        })));
        a.broadcast(&goodbye("a")).unwrap();
        a.broadcast(&PeerMessage::RequestLayout { id: "a".into() })
            .unwrap();
        assert_eq!(
            *seen_b.lock(),
            vec![PeerMessage::RequestLayout { id: "a".into() }]
        );
    }

    #[test]
    fn close_stops_both_directions() {
        let bus = LocalBus::new();
        let a = bus.attach("room");
        let b = bus.attach("room");
        let (seen_b, _g) = collector(&b);
        b.close();
        a.broadcast(&goodbye("a")).unwrap();
        assert!(seen_b.lock().is_empty());
        assert!(matches!(
            b.broadcast(&goodbye("b")),
            Err(MeshError::TransportClosed)
        ));
    }

    #[test]
    fn handler_panic_is_isolated() {
        let bus = LocalBus::new();
        let a = bus.attach("room");
        let b = bus.attach("room");
        let _bad = b.on_message(Arc::new(|_msg: &PeerMessage| panic!("handler bug")));
        let (seen_b, _g) = collector(&b);
        a.broadcast(&goodbye("a")).unwrap();
        assert_eq!(seen_b.lock().len(), 1);
    }

    #[test]
    fn dropping_the_guard_unregisters() {
        let bus = LocalBus::new();
        let a = bus.attach("room");
        let b = bus.attach("room");
        let (seen_b, guard) = collector(&b);
        a.broadcast(&goodbye("a")).unwrap();
        drop(guard);
        a.broadcast(&goodbye("a")).unwrap();
        assert_eq!(seen_b.lock().len(), 1);
    }
}
