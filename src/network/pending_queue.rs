//! Buffer of packets waiting for their release time.
//!
//! Release order is queue order, not timestamp order. The only way a packet
//! gets ahead of another is [`PendingPacketQueue::enqueue`] with
//! `insert_near_end`, which slots it in front of the current tail. Draining
//! stops at the first packet that is not due yet, so a reordered packet with
//! a later release time holds back everything behind it. That stall is part
//! of the out-of-order behaviour being simulated; replacing the queue with a
//! priority queue would make every release strictly time ordered.

use std::collections::VecDeque;

use smallvec::SmallVec;

use crate::{ChannelKind, ConnectionId, Destination, Direction};

/// Packets released by a single drain. Most ticks free only a few.
pub type ReleasedPackets = SmallVec<[PendingPacket; 4]>;

/// An outbound packet held back by the simulation.
///
/// The payload and release time are fixed at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingPacket {
    channel: ChannelKind,
    destination: Destination,
    payload: Box<[u8]>,
    release_at: f64,
}

impl PendingPacket {
    /// Copies `payload` into a new packet due at `release_at` seconds.
    #[must_use]
    pub fn new(
        channel: ChannelKind,
        destination: Destination,
        payload: &[u8],
        release_at: f64,
    ) -> Self {
        Self {
            channel,
            destination,
            payload: payload.into(),
            release_at,
        }
    }

    /// Delivery class of the packet.
    #[inline]
    #[must_use]
    pub const fn channel(&self) -> ChannelKind {
        self.channel
    }

    /// Where the packet is headed.
    #[inline]
    #[must_use]
    pub const fn destination(&self) -> Destination {
        self.destination
    }

    /// Direction of travel.
    #[inline]
    #[must_use]
    pub const fn direction(&self) -> Direction {
        self.destination.direction()
    }

    /// Target client for server traffic.
    #[inline]
    #[must_use]
    pub const fn target(&self) -> Option<ConnectionId> {
        self.destination.target()
    }

    /// The bytes to send.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Seconds since simulation start at which the packet may be released.
    #[inline]
    #[must_use]
    pub const fn release_at(&self) -> f64 {
        self.release_at
    }

    /// Whether the packet may be released at `now`.
    #[inline]
    #[must_use]
    pub fn is_due(&self, now: f64) -> bool {
        self.release_at <= now
    }
}

/// Ordered buffer of [`PendingPacket`]s for one direction and channel.
#[derive(Debug, Clone, Default)]
pub struct PendingPacketQueue {
    packets: VecDeque<PendingPacket>,
}

impl PendingPacketQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a packet.
    ///
    /// With `insert_near_end` and a non-empty queue the packet goes one
    /// position before the tail, swapping order with the most recently queued
    /// packet. Otherwise it is appended.
    pub fn enqueue(&mut self, packet: PendingPacket, insert_near_end: bool) {
        match self.packets.len() {
            len if insert_near_end && len > 0 => self.packets.insert(len - 1, packet),
            _ => self.packets.push_back(packet),
        }
    }

    /// Removes the front packet if it is due at `now`.
    ///
    /// Returns `None` as soon as the front packet is not due, even when
    /// packets further back are.
    pub fn pop_ready(&mut self, now: f64) -> Option<PendingPacket> {
        if self.packets.front()?.is_due(now) {
            self.packets.pop_front()
        } else {
            None
        }
    }

    /// Removes every packet from the front that is due at `now`, stopping at
    /// the first one that is not. Packets are returned front to back.
    pub fn drain_ready(&mut self, now: f64) -> ReleasedPackets {
        let mut released = ReleasedPackets::new();
        while let Some(packet) = self.pop_ready(now) {
            released.push(packet);
        }
        released
    }

    /// The packet that will be released next.
    #[must_use]
    pub fn front(&self) -> Option<&PendingPacket> {
        self.packets.front()
    }

    /// Iterates packets in release order.
    pub fn iter(&self) -> impl Iterator<Item = &PendingPacket> {
        self.packets.iter()
    }

    /// Number of packets waiting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// Whether no packets are waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Discards every waiting packet and returns how many there were.
    pub fn clear(&mut self) -> usize {
        let discarded = self.packets.len();
        self.packets.clear();
        discarded
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

    fn packet(tag: u8, release_at: f64) -> PendingPacket {
        PendingPacket::new(ChannelKind::Unreliable, Destination::Server, &[tag], release_at)
    }

    fn tags(queue: &PendingPacketQueue) -> Vec<u8> {
        queue.iter().map(|p| p.payload()[0]).collect()
    }

    #[test]
    fn test_append_keeps_fifo_order() {
        let mut queue = PendingPacketQueue::new();
        for (i, tag) in [1u8, 2, 3, 4].into_iter().enumerate() {
            queue.enqueue(packet(tag, i as f64 * 0.01), false);
        }
        assert_eq!(tags(&queue), vec![1, 2, 3, 4]);

        let released = queue.drain_ready(1.0);
        let released: Vec<u8> = released.iter().map(|p| p.payload()[0]).collect();
        assert_eq!(released, vec![1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_insert_near_end_on_empty_queue_appends() {
        let mut queue = PendingPacketQueue::new();
        queue.enqueue(packet(1, 0.0), true);
        assert_eq!(tags(&queue), vec![1]);
    }

    #[test]
    fn test_insert_near_end_swaps_with_tail() {
        let mut queue = PendingPacketQueue::new();
        queue.enqueue(packet(1, 0.0), false);
        queue.enqueue(packet(2, 0.0), false);
        queue.enqueue(packet(3, 0.0), true);
        assert_eq!(tags(&queue), vec![1, 3, 2]);
    }

    #[test]
    fn test_repeated_near_end_inserts_never_reach_the_middle() {
        let mut queue = PendingPacketQueue::new();
        queue.enqueue(packet(1, 0.0), false);
        queue.enqueue(packet(2, 0.0), true);
        queue.enqueue(packet(3, 0.0), true);
        queue.enqueue(packet(4, 0.0), true);
        // The first packet stays at the tail; each new one lands just before it.
        assert_eq!(tags(&queue), vec![2, 3, 4, 1]);
    }

    #[test]
    fn test_drain_releases_only_due_prefix() {
        let mut queue = PendingPacketQueue::new();
        queue.enqueue(packet(1, 0.1), false);
        queue.enqueue(packet(2, 0.2), false);
        queue.enqueue(packet(3, 0.3), false);

        assert!(queue.drain_ready(0.05).is_empty());
        let released = queue.drain_ready(0.2);
        assert_eq!(released.len(), 2);
        assert_eq!(tags(&queue), vec![3]);
    }

    #[test]
    fn test_drain_stalls_behind_packet_not_yet_due() {
        let mut queue = PendingPacketQueue::new();
        queue.enqueue(packet(1, 0.5), false);
        queue.enqueue(packet(2, 0.1), false);

        // Packet 2 is due but sits behind packet 1.
        assert!(queue.drain_ready(0.2).is_empty());
        assert_eq!(queue.len(), 2);

        let released = queue.drain_ready(0.5);
        let released: Vec<u8> = released.iter().map(|p| p.payload()[0]).collect();
        assert_eq!(released, vec![1, 2]);
    }

    #[test]
    fn test_release_boundary_is_inclusive() {
        let mut queue = PendingPacketQueue::new();
        queue.enqueue(packet(1, 0.1), false);
        assert!(queue.pop_ready(0.099).is_none());
        assert!(queue.pop_ready(0.1).is_some());
    }

    #[test]
    fn test_pop_ready_on_empty_queue() {
        let mut queue = PendingPacketQueue::new();
        assert!(queue.pop_ready(100.0).is_none());
        assert!(queue.front().is_none());
    }

    #[test]
    fn test_clear_reports_discarded_count() {
        let mut queue = PendingPacketQueue::new();
        queue.enqueue(packet(1, 0.0), false);
        queue.enqueue(packet(2, 0.0), false);
        assert_eq!(queue.clear(), 2);
        assert_eq!(queue.clear(), 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_packet_accessors() {
        let to_client = Destination::Client(ConnectionId::new(5));
        let packet = PendingPacket::new(ChannelKind::Reliable, to_client, &[9, 8, 7], 1.25);
        assert_eq!(packet.channel(), ChannelKind::Reliable);
        assert_eq!(packet.destination(), to_client);
        assert_eq!(packet.direction(), Direction::ServerToClient);
        assert_eq!(packet.target(), Some(ConnectionId::new(5)));
        assert_eq!(packet.payload(), &[9, 8, 7]);
        assert_eq!(packet.release_at(), 1.25);
        assert!(packet.is_due(1.25));
        assert!(!packet.is_due(1.0));
    }
}
