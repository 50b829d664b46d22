//! Time capability.
//!
//! Every component that needs a timestamp receives an [`Arc<dyn Clock>`] at
//! construction time instead of calling the system clock directly. Production
//! code uses [`SystemClock`]; simulations and tests share one [`VirtualClock`]
//! across all peers so that birth times and liveness windows are comparable
//! and, under a paused tokio runtime, fully deterministic.

use std::time::{SystemTime, UNIX_EPOCH};

/// Millisecond timestamp source.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds. Values only ever grow.
    fn now_millis(&self) -> u64;
}

/// Wall-clock time as milliseconds since the UNIX epoch.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Monotonic clock counting milliseconds since its construction.
///
/// Backed by [`tokio::time::Instant`], so inside a runtime started with
/// paused time it advances in lockstep with `tokio::time::advance` and the
/// auto-advancing test scheduler. Share a single instance (via `Arc`) across
/// every simulated peer; a fresh instance starts back at zero.
#[derive(Debug, Clone)]
pub struct VirtualClock {
    origin: tokio::time::Instant,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for VirtualClock {
    fn now_millis(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_monotonic_enough() {
        let clock = SystemClock;
        let a = clock.now_millis();
        let b = clock.now_millis();
        assert!(b >= a);
    }

    #[tokio::test(start_paused = true)]
    async fn virtual_clock_tracks_paused_time() {
        let clock = VirtualClock::new();
        assert_eq!(clock.now_millis(), 0);
        tokio::time::advance(std::time::Duration::from_millis(1500)).await;
        assert_eq!(clock.now_millis(), 1500);
    }
}
