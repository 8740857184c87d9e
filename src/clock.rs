//! Monotonic time sources for the simulation.
//!
//! Release times are plain `f64` seconds since the clock was created, which
//! keeps the queue arithmetic trivial and lets tests drive time by hand with
//! [`ManualClock`].

use std::sync::Arc;

use parking_lot::Mutex;
use web_time::{Duration, Instant};

/// A monotonic clock reporting seconds since simulation start.
pub trait Clock {
    /// Seconds elapsed since the clock started. Never decreases.
    fn now(&self) -> f64;
}

/// Wall clock backed by [`web_time::Instant`].
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    /// Starts a clock at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same time, so a test can keep one handle and give another
/// to the [`LatencyTransport`](crate::LatencyTransport).
///
/// ```
/// use latency_transport::{Clock, ManualClock};
/// use std::time::Duration;
///
/// let clock = ManualClock::new();
/// let handle = clock.clone();
/// clock.advance(Duration::from_millis(250));
/// assert_eq!(handle.now(), 0.25);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<f64>>,
}

impl ManualClock {
    /// Creates a clock at time zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the clock forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        *self.now.lock() += delta.as_secs_f64();
    }

    /// Moves the clock to `seconds`. Ignored if that would move time backwards.
    pub fn set(&self, seconds: f64) {
        let mut now = self.now.lock();
        if seconds > *now {
            *now = seconds;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        *self.now.lock()
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_starts_at_zero() {
        assert_eq!(ManualClock::new().now(), 0.0);
    }

    #[test]
    fn test_manual_clock_clones_share_time() {
        let clock = ManualClock::new();
        let other = clock.clone();
        clock.advance(Duration::from_millis(500));
        other.advance(Duration::from_millis(500));
        assert_eq!(clock.now(), 1.0);
        assert_eq!(other.now(), 1.0);
    }

    #[test]
    fn test_manual_clock_never_goes_backwards() {
        let clock = ManualClock::new();
        clock.set(2.0);
        clock.set(1.0);
        assert_eq!(clock.now(), 2.0);
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let first = clock.now();
        let second = clock.now();
        assert!(first >= 0.0);
        assert!(second >= first);
    }
}
