//! Process-wide shutdown latch
//!
//! A one-way broadcast latch shared by the broadcaster thread, the frame
//! producer and the wall-clock pacer. Tripping it wakes every waiter within
//! bounded time; it never resets.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

struct Inner {
    tripped: Mutex<bool>,
    signal: Condvar,
}

/// Cloneable handle to the shared latch.
#[derive(Clone)]
pub struct ShutdownLatch {
    inner: Arc<Inner>,
}

impl ShutdownLatch {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                tripped: Mutex::new(false),
                signal: Condvar::new(),
            }),
        }
    }

    /// Trip the latch and wake all waiters. Idempotent.
    pub fn trip(&self) {
        let mut tripped = self.inner.tripped.lock();
        if !*tripped {
            *tripped = true;
            self.inner.signal.notify_all();
        }
    }

    pub fn is_tripped(&self) -> bool {
        *self.inner.tripped.lock()
    }

    pub fn is_running(&self) -> bool {
        !self.is_tripped()
    }

    /// Block for up to `timeout`, returning early when the latch trips.
    /// Returns the latch state at wakeup.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut tripped = self.inner.tripped.lock();
        if *tripped {
            return true;
        }
        self.inner.signal.wait_for(&mut tripped, timeout);
        *tripped
    }
}

impl Default for ShutdownLatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_starts_untripped() {
        let latch = ShutdownLatch::new();
        assert!(latch.is_running());
        assert!(!latch.is_tripped());
    }

    #[test]
    fn test_trip_is_idempotent() {
        let latch = ShutdownLatch::new();
        latch.trip();
        latch.trip();
        assert!(latch.is_tripped());
    }

    #[test]
    fn test_wait_times_out_when_untripped() {
        let latch = ShutdownLatch::new();
        let start = Instant::now();
        let tripped = latch.wait_timeout(Duration::from_millis(30));
        assert!(!tripped);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_wait_returns_immediately_when_already_tripped() {
        let latch = ShutdownLatch::new();
        latch.trip();
        let start = Instant::now();
        assert!(latch.wait_timeout(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_trip_wakes_waiter() {
        let latch = ShutdownLatch::new();
        let remote = latch.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote.trip();
        });

        let start = Instant::now();
        let tripped = latch.wait_timeout(Duration::from_secs(5));
        assert!(tripped);
        assert!(start.elapsed() < Duration::from_secs(1));
        handle.join().unwrap();
    }
}
