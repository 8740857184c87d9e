//! Per-role throughput counters.
//!
//! Each role (client and server) has an active [`StatisticsWindow`] that
//! counts packets and bytes as they are sent or received. When the window is
//! rotated its counts become the readable [`StatisticsSnapshot`] for that role
//! and the active window starts again from zero. With the default
//! [`RotationPolicy`] a snapshot therefore reads as "per second".
//!
//! ```
//! use latency_transport::{format_bytes, Role, RotationPolicy, StatisticsTracker};
//! use std::time::Duration;
//!
//! let mut stats = StatisticsTracker::new(true, RotationPolicy::default());
//! stats.record_sent(Role::Client, 1536);
//! assert!(stats.tick(Duration::from_secs(1)));
//! assert_eq!(stats.snapshot(Role::Client).sent_bytes_formatted(), "1.5 KB");
//! assert_eq!(format_bytes(-2048), "-2 KB");
//! ```

use serde::{Deserialize, Serialize};
use tracing::trace;
use web_time::Duration;

use crate::network::config::RotationPolicy;
use crate::Role;

const UNITS: [&str; 7] = ["B", "KB", "MB", "GB", "TB", "PB", "EB"];

/// Formats a byte count with a binary unit and one decimal place.
///
/// The value is divided by 1024 until it fits the largest unit with a
/// non-zero integral part. Whole numbers print without a decimal and the sign
/// is kept.
///
/// ```
/// use latency_transport::format_bytes;
///
/// assert_eq!(format_bytes(0), "0 B");
/// assert_eq!(format_bytes(1024), "1 KB");
/// assert_eq!(format_bytes(1536), "1.5 KB");
/// assert_eq!(format_bytes(-2048), "-2 KB");
/// ```
#[must_use]
pub fn format_bytes(bytes: i64) -> String {
    if bytes == 0 {
        return format!("0 {}", UNITS[0]);
    }
    let magnitude = bytes.unsigned_abs();
    let mut place = 0;
    let mut scale = 1u64;
    while place + 1 < UNITS.len() && magnitude / scale >= 1024 {
        scale *= 1024;
        place += 1;
    }
    let scaled = (magnitude as f64 / scale as f64 * 10.0).round_ties_even() / 10.0;
    let sign = if bytes < 0 { "-" } else { "" };
    format!("{sign}{scaled} {}", UNITS[place])
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Running counters for one role since the last rotation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsWindow {
    sent_packets: u64,
    sent_bytes: u64,
    received_packets: u64,
    received_bytes: u64,
}

impl StatisticsWindow {
    /// Counts one sent packet of `bytes` bytes.
    pub fn record_sent(&mut self, bytes: usize) {
        self.sent_packets = self.sent_packets.saturating_add(1);
        self.sent_bytes = self.sent_bytes.saturating_add(bytes as u64);
    }

    /// Counts one received packet of `bytes` bytes.
    pub fn record_received(&mut self, bytes: usize) {
        self.received_packets = self.received_packets.saturating_add(1);
        self.received_bytes = self.received_bytes.saturating_add(bytes as u64);
    }

    /// Zeroes all counters.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Packets sent.
    #[must_use]
    pub const fn sent_packets(&self) -> u64 {
        self.sent_packets
    }

    /// Bytes sent.
    #[must_use]
    pub const fn sent_bytes(&self) -> u64 {
        self.sent_bytes
    }

    /// Packets received.
    #[must_use]
    pub const fn received_packets(&self) -> u64 {
        self.received_packets
    }

    /// Bytes received.
    #[must_use]
    pub const fn received_bytes(&self) -> u64 {
        self.received_bytes
    }

    /// Whether nothing has been counted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// The counts of the last finished window for one role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    role: Role,
    window: StatisticsWindow,
}

impl StatisticsSnapshot {
    fn empty(role: Role) -> Self {
        Self {
            role,
            window: StatisticsWindow::default(),
        }
    }

    /// The role these counts belong to.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Packets sent in the window.
    #[must_use]
    pub const fn sent_packets(&self) -> u64 {
        self.window.sent_packets
    }

    /// Bytes sent in the window.
    #[must_use]
    pub const fn sent_bytes(&self) -> u64 {
        self.window.sent_bytes
    }

    /// Packets received in the window.
    #[must_use]
    pub const fn received_packets(&self) -> u64 {
        self.window.received_packets
    }

    /// Bytes received in the window.
    #[must_use]
    pub const fn received_bytes(&self) -> u64 {
        self.window.received_bytes
    }

    /// Bytes sent, formatted with [`format_bytes`].
    #[must_use]
    pub fn sent_bytes_formatted(&self) -> String {
        format_bytes(saturating_i64(self.window.sent_bytes))
    }

    /// Bytes received, formatted with [`format_bytes`].
    #[must_use]
    pub fn received_bytes_formatted(&self) -> String {
        format_bytes(saturating_i64(self.window.received_bytes))
    }

    /// Serializes the snapshot to a JSON string.
    ///
    /// Returns `None` if serialization fails.
    #[cfg(feature = "json")]
    #[must_use]
    pub fn to_json(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }
}

impl std::fmt::Display for StatisticsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: sent {} packets ({}), received {} packets ({})",
            self.role,
            self.window.sent_packets,
            self.sent_bytes_formatted(),
            self.window.received_packets,
            self.received_bytes_formatted()
        )
    }
}

/// Active windows and last snapshots for both roles.
#[derive(Debug, Clone)]
pub struct StatisticsTracker {
    enabled: bool,
    rotation: RotationPolicy,
    elapsed: Duration,
    active: [StatisticsWindow; 2],
    snapshots: [StatisticsSnapshot; 2],
}

impl StatisticsTracker {
    /// Creates a tracker. A disabled tracker ignores records and never
    /// rotates.
    #[must_use]
    pub fn new(enabled: bool, rotation: RotationPolicy) -> Self {
        Self {
            enabled,
            rotation,
            elapsed: Duration::ZERO,
            active: [StatisticsWindow::default(); 2],
            snapshots: [
                StatisticsSnapshot::empty(Role::Client),
                StatisticsSnapshot::empty(Role::Server),
            ],
        }
    }

    /// Whether records are being counted.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Turns counting on or off. Existing counts are kept.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Changes when windows rotate. Accumulated time is kept.
    pub fn set_rotation(&mut self, rotation: RotationPolicy) {
        self.rotation = rotation;
    }

    /// Counts a packet sent by `role`.
    pub fn record_sent(&mut self, role: Role, bytes: usize) {
        if self.enabled {
            self.active[role.index()].record_sent(bytes);
        }
    }

    /// Counts a packet received by `role`.
    pub fn record_received(&mut self, role: Role, bytes: usize) {
        if self.enabled {
            self.active[role.index()].record_received(bytes);
        }
    }

    /// Advances the window timer by `delta` and rotates when it is due.
    ///
    /// Returns whether a rotation happened. At most one rotation happens per
    /// call however large `delta` is.
    pub fn tick(&mut self, delta: Duration) -> bool {
        if !self.enabled {
            return false;
        }
        self.elapsed = self.elapsed.saturating_add(delta);

        let due = match self.rotation {
            RotationPolicy::Interval(interval) => {
                if interval.is_zero() || self.elapsed < interval {
                    false
                } else {
                    let remainder = self.elapsed.as_nanos() % interval.as_nanos();
                    self.elapsed = Duration::from_nanos(u64::try_from(remainder).unwrap_or(0));
                    true
                }
            },
            RotationPolicy::LegacyModulo => {
                if self.elapsed.as_secs_f64() % 60.0 >= 1.0 {
                    self.elapsed = Duration::ZERO;
                    true
                } else {
                    false
                }
            },
        };

        if due {
            self.rotate();
        }
        due
    }

    /// Clears active windows, snapshots and accumulated time.
    pub fn reset(&mut self) {
        self.elapsed = Duration::ZERO;
        for window in &mut self.active {
            window.reset();
        }
        for snapshot in &mut self.snapshots {
            snapshot.window.reset();
        }
    }

    /// The last finished window for `role`.
    #[must_use]
    pub fn snapshot(&self, role: Role) -> StatisticsSnapshot {
        self.snapshots[role.index()]
    }

    /// Counts gathered for `role` since the last rotation.
    #[must_use]
    pub fn active(&self, role: Role) -> &StatisticsWindow {
        &self.active[role.index()]
    }

    fn rotate(&mut self) {
        for role in Role::ALL {
            let window = &mut self.active[role.index()];
            self.snapshots[role.index()].window = *window;
            window.reset();
        }
        trace!(
            client = %self.snapshots[Role::Client.index()],
            server = %self.snapshots[Role::Server.index()],
            "statistics window rotated"
        );
    }
}

impl Default for StatisticsTracker {
    fn default() -> Self {
        Self::new(true, RotationPolicy::default())
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
    fn test_format_bytes_examples() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1), "1 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1024), "1 KB");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(-2048), "-2 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3 GB");
    }

    #[test]
    fn test_format_bytes_rounds_to_one_decimal() {
        // Exact halves go to the even digit.
        assert_eq!(format_bytes(1280), "1.2 KB");
        assert_eq!(format_bytes(3328), "3.2 KB");
        assert_eq!(format_bytes(1792 + 1024), "2.8 KB");
        assert_eq!(format_bytes(-1280), "-1.2 KB");
        assert_eq!(format_bytes(1100), "1.1 KB");
    }

    #[test]
    fn test_format_bytes_extremes() {
        assert_eq!(format_bytes(i64::MIN), "-8 EB");
        assert_eq!(format_bytes(i64::MAX), "8 EB");
    }

    #[test]
    fn test_window_reset() {
        let mut window = StatisticsWindow::default();
        window.record_sent(10);
        window.record_received(20);
        assert!(!window.is_empty());
        window.reset();
        assert!(window.is_empty());
    }

    #[test]
    fn test_rotation_publishes_counts_once() {
        let mut stats = StatisticsTracker::default();
        for size in [10, 20, 30] {
            stats.record_sent(Role::Client, size);
        }
        stats.record_received(Role::Server, 7);

        assert!(!stats.tick(Duration::from_millis(500)));
        assert_eq!(stats.snapshot(Role::Client).sent_packets(), 0);

        assert!(stats.tick(Duration::from_millis(500)));
        let client = stats.snapshot(Role::Client);
        assert_eq!(client.sent_packets(), 3);
        assert_eq!(client.sent_bytes(), 60);
        let server = stats.snapshot(Role::Server);
        assert_eq!(server.received_packets(), 1);
        assert_eq!(server.received_bytes(), 7);
        assert!(stats.active(Role::Client).is_empty());

        // Nothing recorded in the next window.
        assert!(stats.tick(Duration::from_secs(1)));
        assert_eq!(stats.snapshot(Role::Client).sent_packets(), 0);
        assert_eq!(stats.snapshot(Role::Server).received_bytes(), 0);
    }

    #[test]
    fn test_roles_are_counted_independently() {
        let mut stats = StatisticsTracker::default();
        stats.record_sent(Role::Client, 5);
        stats.record_sent(Role::Server, 9);
        stats.record_sent(Role::Server, 1);
        assert!(stats.tick(Duration::from_secs(1)));
        assert_eq!(stats.snapshot(Role::Client).sent_bytes(), 5);
        assert_eq!(stats.snapshot(Role::Server).sent_bytes(), 10);
        assert_eq!(stats.snapshot(Role::Server).sent_packets(), 2);
    }

    #[test]
    fn test_interval_carries_remainder() {
        let mut stats = StatisticsTracker::default();
        assert!(stats.tick(Duration::from_millis(1300)));
        // 300 ms carried over, so 700 ms more completes the next window.
        assert!(!stats.tick(Duration::from_millis(600)));
        assert!(stats.tick(Duration::from_millis(100)));
    }

    #[test]
    fn test_large_delta_rotates_once() {
        let mut stats = StatisticsTracker::default();
        stats.record_sent(Role::Client, 1);
        assert!(stats.tick(Duration::from_secs(5)));
        assert!(!stats.tick(Duration::ZERO));
    }

    #[test]
    fn test_legacy_modulo_rotation() {
        let mut stats = StatisticsTracker::new(true, RotationPolicy::LegacyModulo);
        assert!(!stats.tick(Duration::from_millis(999)));
        assert!(stats.tick(Duration::from_millis(1)));
        // A delta landing between 60 s and 61 s does not rotate.
        assert!(!stats.tick(Duration::from_millis(60_500)));
        assert!(stats.tick(Duration::from_millis(600)));
    }

    #[test]
    fn test_disabled_tracker_ignores_everything() {
        let mut stats = StatisticsTracker::new(false, RotationPolicy::default());
        stats.record_sent(Role::Client, 100);
        stats.record_received(Role::Server, 100);
        assert!(!stats.tick(Duration::from_secs(10)));
        assert!(stats.active(Role::Client).is_empty());
        assert!(stats.active(Role::Server).is_empty());
    }

    #[test]
    fn test_reset_clears_windows_and_snapshots() {
        let mut stats = StatisticsTracker::default();
        stats.record_sent(Role::Client, 10);
        assert!(stats.tick(Duration::from_secs(1)));
        stats.record_sent(Role::Client, 10);
        let _ = stats.tick(Duration::from_millis(400));

        stats.reset();
        assert_eq!(stats.snapshot(Role::Client).sent_packets(), 0);
        assert!(stats.active(Role::Client).is_empty());
        // Accumulated time was cleared too.
        assert!(!stats.tick(Duration::from_millis(700)));
    }

    #[test]
    fn test_snapshot_formatting() {
        let mut stats = StatisticsTracker::default();
        stats.record_received(Role::Client, 2048);
        assert!(stats.tick(Duration::from_secs(1)));
        let snapshot = stats.snapshot(Role::Client);
        assert_eq!(snapshot.role(), Role::Client);
        assert_eq!(snapshot.received_bytes_formatted(), "2 KB");
        assert_eq!(snapshot.sent_bytes_formatted(), "0 B");
        assert_eq!(
            snapshot.to_string(),
            "client: sent 0 packets (0 B), received 1 packets (2 KB)"
        );
    }

    #[cfg(feature = "json")]
    #[test]
    fn test_snapshot_to_json() {
        let mut stats = StatisticsTracker::default();
        stats.record_sent(Role::Server, 42);
        assert!(stats.tick(Duration::from_secs(1)));
        let json = stats.snapshot(Role::Server).to_json().unwrap();
        assert!(json.contains(r#""sent_bytes":42"#));
        assert!(json.contains(r#""role":"Server""#));
    }
}
