//! Reactive snapshot container.
//!
//! [`Store`] holds one value and notifies subscribers synchronously, on the
//! writer's thread, every time the value is replaced. Listeners run in
//! subscription order and always observe the exact snapshot that produced
//! their notification. A panicking listener is isolated and logged; the
//! remaining listeners still fire.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;
type ListenerList<T> = Arc<Mutex<Vec<(u64, Listener<T>)>>>;

pub struct Store<T> {
    state: Mutex<T>,
    listeners: ListenerList<T>,
    next_listener_id: AtomicU64,
}

impl<T: Clone> Store<T> {
    pub fn new(initial: T) -> Self {
        Self {
            state: Mutex::new(initial),
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_listener_id: AtomicU64::new(0),
        }
    }

    /// Clone of the current snapshot.
    pub fn get(&self) -> T {
        self.state.lock().clone()
    }

    /// Replaces the snapshot with the closure's result and notifies.
    ///
    /// The closure runs under the state lock and must not call back into the
    /// store.
    pub fn set(&self, next: impl FnOnce(&T) -> T) {
        let fresh = {
            let mut guard = self.state.lock();
            let fresh = next(&*guard);
            *guard = fresh.clone();
            fresh
        };
        self.notify(&fresh);
    }

    /// Hands a copy of the snapshot to the mutator, installs it, notifies.
    ///
    /// The closure runs under the state lock and must not call back into the
    /// store.
    pub fn update(&self, mutate: impl FnOnce(&mut T)) {
        let fresh = {
            let mut guard = self.state.lock();
            mutate(&mut *guard);
            guard.clone()
        };
        self.notify(&fresh);
    }

    /// Registers a listener. Dropping the returned [`Subscription`]
    /// unsubscribes it.
    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Subscription<T> {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, Arc::new(listener)));
        Subscription {
            listeners: Arc::downgrade(&self.listeners),
            id,
        }
    }

    fn notify(&self, snapshot: &T) {
        // Listeners are invoked outside the state lock so they can read the
        // store; the clone keeps the listener list stable while they run.
        let listeners: Vec<(u64, Listener<T>)> = self.listeners.lock().clone();
        for (id, listener) in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(snapshot))).is_err() {
                log::warn!("store listener {} panicked, continuing", id);
            }
        }
    }
}

/// Subscription handle. Unsubscribes on drop.
pub struct Subscription<T> {
    listeners: Weak<Mutex<Vec<(u64, Listener<T>)>>>,
    id: u64,
}

impl<T> Subscription<T> {
    /// Explicitly unsubscribes; equivalent to dropping the handle.
    pub fn cancel(self) {}
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.lock().retain(|(id, _)| *id != self.id);
        }
    }
}
