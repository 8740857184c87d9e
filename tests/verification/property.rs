//! Property-based tests for the pending queue, simulation engine and
//! statistics.
//!
//! # Properties Tested
//!
//! ## PendingPacketQueue
//! - Queue order matches a simple list model under any mix of appends and
//!   near-end inserts
//! - A drain releases exactly the longest due prefix
//!
//! ## SimulationEngine
//! - With simulation off, submit is the identity over the wrapped transport
//! - Total reliable loss doubles every delay
//! - Total unreliable loss releases nothing
//! - Without reordering, delivery is FIFO
//! - Every delivered packet was submitted, and none is delivered twice
//!
//! ## StatisticsTracker
//! - One rotation publishes exact sums, the next publishes zero
//! - `format_bytes` keeps the sign and uses the right unit

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use std::time::Duration;

use latency_transport::prelude::*;
use latency_transport::rng::{Pcg32, SeedableRng};
use latency_transport::{
    PendingPacket, PendingPacketQueue, SimulationEngine, StatisticsTracker,
};
use proptest::prelude::*;

use crate::common::{init_tracing, payload_tags, RecordingTransport};

// ============================================================================
// Strategies
// ============================================================================

fn latency_ms_strategy() -> impl Strategy<Value = i64> {
    0i64..=500
}

fn probability_strategy() -> impl Strategy<Value = f64> {
    prop_oneof![Just(0.0), Just(1.0), 0.0f64..=1.0]
}

fn channel_strategy() -> impl Strategy<Value = ChannelKind> {
    prop_oneof![Just(ChannelKind::Reliable), Just(ChannelKind::Unreliable)]
}

fn destination_strategy() -> impl Strategy<Value = Destination> {
    prop_oneof![
        Just(Destination::Server),
        (0u32..4).prop_map(|id| Destination::Client(ConnectionId::new(id))),
    ]
}

fn config(latency_ms: i64, packet_loss: f64, out_of_order: f64) -> SimulationConfig {
    SimulationConfig::builder()
        .latency_ms(latency_ms)
        .packet_loss(packet_loss)
        .out_of_order(out_of_order)
        .build()
        .unwrap()
}

fn engine(config: SimulationConfig, seed: u64) -> SimulationEngine<Pcg32> {
    SimulationEngine::new(config, Pcg32::seed_from_u64(seed)).unwrap()
}

/// Tags a payload with its submission index so deliveries can be traced.
fn tagged(index: usize) -> [u8; 2] {
    (index as u16).to_be_bytes()
}

fn untag(payload: &[u8]) -> usize {
    usize::from(u16::from_be_bytes([payload[0], payload[1]]))
}

// ============================================================================
// PendingPacketQueue Properties
// ============================================================================

proptest! {
    /// Queue order equals a list model where a near-end insert goes before
    /// the last element.
    #[test]
    fn prop_queue_matches_list_model(ops in prop::collection::vec(any::<bool>(), 0..64)) {
        let mut queue = PendingPacketQueue::new();
        let mut model: Vec<usize> = Vec::new();

        for (index, insert_near_end) in ops.into_iter().enumerate() {
            let packet = PendingPacket::new(
                ChannelKind::Unreliable,
                Destination::Server,
                &tagged(index),
                0.0,
            );
            queue.enqueue(packet, insert_near_end);
            if insert_near_end && !model.is_empty() {
                model.insert(model.len() - 1, index);
            } else {
                model.push(index);
            }
        }

        let order: Vec<usize> = queue.iter().map(|p| untag(p.payload())).collect();
        prop_assert_eq!(order, model);
    }

    /// A drain releases the longest prefix of due packets and nothing else.
    #[test]
    fn prop_drain_releases_due_prefix(
        release_times in prop::collection::vec(0u32..100, 0..32),
        now in 0u32..100,
    ) {
        let mut queue = PendingPacketQueue::new();
        for (index, release) in release_times.iter().enumerate() {
            let packet = PendingPacket::new(
                ChannelKind::Reliable,
                Destination::Server,
                &tagged(index),
                f64::from(*release),
            );
            queue.enqueue(packet, false);
        }

        let expected = release_times.iter().take_while(|r| **r <= now).count();
        let released = queue.drain_ready(f64::from(now));

        prop_assert_eq!(released.len(), expected);
        prop_assert_eq!(queue.len(), release_times.len() - expected);
        if let Some(front) = queue.front() {
            prop_assert!(front.release_at() > f64::from(now));
        }
        for (position, packet) in released.iter().enumerate() {
            prop_assert_eq!(untag(packet.payload()), position);
        }
    }
}

// ============================================================================
// SimulationEngine Properties
// ============================================================================

proptest! {
    /// With simulation off every packet is sent at once, in order, unchanged.
    #[test]
    fn prop_disabled_simulation_is_identity(
        packets in prop::collection::vec((channel_strategy(), destination_strategy()), 0..64),
        latency_ms in latency_ms_strategy(),
        packet_loss in probability_strategy(),
        out_of_order in probability_strategy(),
        seed in any::<u64>(),
    ) {
        init_tracing();
        let config = SimulationConfig {
            simulate: false,
            ..config(latency_ms, packet_loss, out_of_order)
        };
        let mut engine = engine(config, seed);
        let mut transport = RecordingTransport::new();

        for (index, (channel, destination)) in packets.iter().enumerate() {
            let outcome = engine
                .submit(&mut transport, 0.0, *channel, *destination, &tagged(index))
                .unwrap();
            prop_assert_eq!(outcome, SubmitOutcome::Sent);
        }

        prop_assert_eq!(engine.total_pending(), 0);
        prop_assert_eq!(transport.sent.len(), packets.len());
        for (index, sent) in transport.sent.iter().enumerate() {
            prop_assert_eq!(untag(&sent.payload), index);
            prop_assert_eq!(sent.channel, packets[index].0);
            prop_assert_eq!(sent.destination, packets[index].1);
        }
    }

    /// Total loss on the reliable channel delays every packet by two
    /// latency periods.
    #[test]
    fn prop_reliable_total_loss_doubles_delay(
        latency_ms in latency_ms_strategy(),
        count in 1usize..32,
        seed in any::<u64>(),
    ) {
        let config = config(latency_ms, 1.0, 0.0);
        let latency = config.latency_secs();
        let mut engine = engine(config, seed);
        let mut transport = RecordingTransport::new();

        for index in 0..count {
            let outcome = engine
                .submit(
                    &mut transport,
                    0.0,
                    ChannelKind::Reliable,
                    Destination::Server,
                    &tagged(index),
                )
                .unwrap();
            match outcome {
                SubmitOutcome::Queued { delay, reordered, .. } => {
                    prop_assert_eq!(delay, 2.0 * latency);
                    prop_assert!(!reordered);
                },
                other => prop_assert!(false, "unexpected outcome {:?}", other),
            }
        }
        prop_assert_eq!(engine.pending(Direction::ClientToServer, ChannelKind::Reliable), count);
    }

    /// Total loss on the unreliable channel never releases a packet.
    #[test]
    fn prop_unreliable_total_loss_releases_nothing(
        destinations in prop::collection::vec(destination_strategy(), 1..32),
        latency_ms in latency_ms_strategy(),
        out_of_order in probability_strategy(),
        seed in any::<u64>(),
    ) {
        let mut engine = engine(config(latency_ms, 1.0, out_of_order), seed);
        let mut transport = RecordingTransport::new();

        for (index, destination) in destinations.iter().enumerate() {
            let outcome = engine
                .submit(&mut transport, 0.0, ChannelKind::Unreliable, *destination, &tagged(index))
                .unwrap();
            prop_assert_eq!(outcome, SubmitOutcome::Dropped);
        }
        for direction in Direction::ALL {
            engine.tick(&mut transport, 1_000.0, direction).unwrap();
        }
        prop_assert!(transport.sent.is_empty());
    }

    /// Without reordering, packets sent at increasing times come out in the
    /// order they went in.
    #[test]
    fn prop_fifo_without_reorder(
        gaps_ms in prop::collection::vec(1u32..50, 1..48),
        channel in channel_strategy(),
        latency_ms in latency_ms_strategy(),
        seed in any::<u64>(),
    ) {
        let mut engine = engine(config(latency_ms, 0.0, 0.0), seed);
        let mut transport = RecordingTransport::new();

        let mut now = 0.0;
        for (index, gap) in gaps_ms.iter().enumerate() {
            now += f64::from(*gap) / 1000.0;
            let _ = engine
                .submit(&mut transport, now, channel, Destination::Server, &tagged(index))
                .unwrap();
            engine.tick(&mut transport, now, Direction::ClientToServer).unwrap();
        }
        engine.tick(&mut transport, now + 1.0, Direction::ClientToServer).unwrap();

        let delivered: Vec<usize> = transport.sent.iter().map(|p| untag(&p.payload)).collect();
        prop_assert_eq!(delivered, (0..gaps_ms.len()).collect::<Vec<_>>());
    }

    /// Whatever the impairments, each delivered packet was submitted exactly
    /// once, and every packet that was queued is eventually delivered.
    #[test]
    fn prop_no_duplicates_and_no_leaks(
        packets in prop::collection::vec((channel_strategy(), destination_strategy()), 0..64),
        latency_ms in latency_ms_strategy(),
        packet_loss in probability_strategy(),
        out_of_order in probability_strategy(),
        seed in any::<u64>(),
    ) {
        let mut engine = engine(config(latency_ms, packet_loss, out_of_order), seed);
        let mut transport = RecordingTransport::new();

        let mut queued = Vec::new();
        for (index, (channel, destination)) in packets.iter().enumerate() {
            let now = index as f64 * 0.005;
            let outcome = engine
                .submit(&mut transport, now, *channel, *destination, &tagged(index))
                .unwrap();
            match outcome {
                SubmitOutcome::Queued { reordered, .. } => {
                    prop_assert!(!(reordered && *channel == ChannelKind::Reliable));
                    queued.push(index);
                },
                SubmitOutcome::Dropped => {
                    prop_assert_eq!(*channel, ChannelKind::Unreliable);
                },
                SubmitOutcome::Sent => prop_assert!(false, "simulation is on"),
            }
        }
        for direction in Direction::ALL {
            engine.tick(&mut transport, 1_000.0, direction).unwrap();
        }

        let mut delivered: Vec<usize> = transport.sent.iter().map(|p| untag(&p.payload)).collect();
        delivered.sort_unstable();
        prop_assert_eq!(delivered, queued);
        prop_assert_eq!(engine.total_pending(), 0);
    }

    /// Delivered packets keep the channel and destination they were
    /// submitted with.
    #[test]
    fn prop_routing_is_preserved(
        packets in prop::collection::vec((channel_strategy(), destination_strategy()), 1..48),
        out_of_order in probability_strategy(),
        seed in any::<u64>(),
    ) {
        let mut engine = engine(config(20, 0.0, out_of_order), seed);
        let mut transport = RecordingTransport::new();
        for (index, (channel, destination)) in packets.iter().enumerate() {
            let _ = engine
                .submit(&mut transport, 0.0, *channel, *destination, &tagged(index))
                .unwrap();
        }
        for direction in Direction::ALL {
            engine.tick(&mut transport, 0.02, direction).unwrap();
        }

        prop_assert_eq!(transport.sent.len(), packets.len());
        for sent in &transport.sent {
            let (channel, destination) = packets[untag(&sent.payload)];
            prop_assert_eq!(sent.channel, channel);
            prop_assert_eq!(sent.destination, destination);
        }
    }
}

// ============================================================================
// Statistics Properties
// ============================================================================

proptest! {
    /// One rotation publishes exact totals; the following window is empty.
    #[test]
    fn prop_statistics_round_trip(
        sent in prop::collection::vec(0usize..2048, 0..64),
        received in prop::collection::vec(0usize..2048, 0..64),
    ) {
        let mut stats = StatisticsTracker::default();
        for size in &sent {
            stats.record_sent(Role::Server, *size);
        }
        for size in &received {
            stats.record_received(Role::Server, *size);
        }
        prop_assert!(stats.tick(Duration::from_secs(1)));

        let snapshot = stats.snapshot(Role::Server);
        prop_assert_eq!(snapshot.sent_packets(), sent.len() as u64);
        prop_assert_eq!(snapshot.sent_bytes(), sent.iter().sum::<usize>() as u64);
        prop_assert_eq!(snapshot.received_packets(), received.len() as u64);
        prop_assert_eq!(snapshot.received_bytes(), received.iter().sum::<usize>() as u64);
        prop_assert_eq!(stats.snapshot(Role::Client).sent_packets(), 0);

        prop_assert!(stats.tick(Duration::from_secs(1)));
        prop_assert_eq!(stats.snapshot(Role::Server).sent_packets(), 0);
        prop_assert_eq!(stats.snapshot(Role::Server).received_bytes(), 0);
    }

    /// Negating the input only adds a minus sign.
    #[test]
    fn prop_format_bytes_is_sign_symmetric(bytes in 1i64..i64::MAX) {
        let positive = format_bytes(bytes);
        let negative = format_bytes(-bytes);
        prop_assert_eq!(negative, format!("-{positive}"));
    }

    /// Values below 1024 stay in bytes; each further factor of 1024 moves up
    /// one unit.
    #[test]
    fn prop_format_bytes_unit_selection(value in 1i64..1024, exponent in 0u32..6) {
        let units = ["B", "KB", "MB", "GB", "TB", "PB"];
        let formatted = format_bytes(value * 1024i64.pow(exponent));
        prop_assert_eq!(formatted, format!("{value} {}", units[exponent as usize]));
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_reorder_on_last_decision_swaps_last_two() {
    // Out-of-order draws happen only for B and C; a seed is searched for
    // which B stays and C is reordered so the expected A, C, B order shows
    // up with a real generator.
    let config = config(0, 0.0, 0.5);
    let seed = (0u64..10_000)
        .find(|seed| {
            let mut rng = Pcg32::seed_from_u64(*seed);
            let mut draw = || latency_transport::rng::Rng::gen::<f64>(&mut rng);
            draw() >= 0.5 && draw() < 0.5
        })
        .expect("some seed splits the draws");

    let mut engine = engine(config, seed);
    let mut transport = RecordingTransport::new();
    for tag in [b'A', b'B', b'C'] {
        let _ = engine
            .submit(&mut transport, 0.0, ChannelKind::Unreliable, Destination::Server, &[tag])
            .unwrap();
    }
    engine.tick(&mut transport, 0.0, Direction::ClientToServer).unwrap();
    assert_eq!(payload_tags(&transport.sent), vec![b'A', b'C', b'B']);
}

#[test]
fn test_end_to_end_release_timing() {
    let mut engine = engine(config(100, 0.0, 0.0), 1);
    let mut transport = RecordingTransport::new();
    let _ = engine
        .submit(&mut transport, 0.0, ChannelKind::Reliable, Destination::Server, &[42])
        .unwrap();

    let mut queue = engine.queue(Direction::ClientToServer, ChannelKind::Reliable).clone();
    assert!(queue.drain_ready(0.05).is_empty());
    let released = queue.drain_ready(0.1);
    assert_eq!(released.len(), 1);
    assert_eq!(released[0].payload(), &[42]);
}
