//! Latency, loss and reordering observed through the wrapped transport.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use std::time::Duration;

use latency_transport::prelude::*;
use latency_transport::rng::{Pcg32, SeedableRng};
use latency_transport::ImpairmentPolicy;

use crate::common::{manual_transport, payload_tags, seeded_config, TransportFailure};

// ============================================================================
// Latency
// ============================================================================

#[test]
fn test_packet_arrives_exactly_at_latency() {
    let (mut transport, clock) = manual_transport(seeded_config(100, 0.0, 0.0));
    transport
        .send_to_server(ChannelKind::Reliable, b"hello")
        .unwrap();

    clock.set(0.05);
    transport.tick_outgoing(Role::Client).unwrap();
    assert!(transport.inner().sent.is_empty());

    clock.set(0.1);
    transport.tick_outgoing(Role::Client).unwrap();
    assert_eq!(transport.inner().sent.len(), 1);
    assert_eq!(transport.inner().sent[0].payload, b"hello");
    assert_eq!(transport.inner().sent[0].channel, ChannelKind::Reliable);
}

#[test]
fn test_zero_latency_still_waits_for_a_tick() {
    let (mut transport, _clock) = manual_transport(seeded_config(0, 0.0, 0.0));
    transport
        .send_to_server(ChannelKind::Unreliable, &[1])
        .unwrap();
    assert!(transport.inner().sent.is_empty());
    transport.tick_outgoing(Role::Client).unwrap();
    assert_eq!(payload_tags(&transport.inner().sent), vec![1]);
}

#[test]
fn test_disabled_simulation_is_a_passthrough() {
    let config = SimulationConfig {
        simulate: false,
        ..seeded_config(500, 1.0, 1.0)
    };
    let (mut transport, _clock) = manual_transport(config);
    for tag in 0..10u8 {
        transport
            .send_to_client(ChannelKind::Unreliable, &[tag], ConnectionId::new(2))
            .unwrap();
    }
    assert_eq!(payload_tags(&transport.inner().sent), (0..10).collect::<Vec<_>>());
    assert_eq!(transport.engine().total_pending(), 0);
}

#[test]
fn test_disabled_simulation_surfaces_transport_errors() {
    let (mut transport, _clock) = manual_transport(SimulationConfig::passthrough());
    transport.inner_mut().send_limit = Some(0);
    let result = transport.send_to_server(ChannelKind::Reliable, &[1]);
    assert_eq!(result, Err(TransportFailure("send limit reached")));
}

#[test]
fn test_latency_change_applies_to_new_packets_only() {
    let (mut transport, clock) = manual_transport(seeded_config(200, 0.0, 0.0));
    transport.send_to_server(ChannelKind::Reliable, &[1]).unwrap();
    transport.set_latency(Duration::from_millis(50)).unwrap();
    transport.send_to_server(ChannelKind::Reliable, &[2]).unwrap();

    // Packet 2 is due first but queue order holds it behind packet 1.
    clock.set(0.1);
    transport.tick_outgoing(Role::Client).unwrap();
    assert!(transport.inner().sent.is_empty());

    clock.set(0.2);
    transport.tick_outgoing(Role::Client).unwrap();
    assert_eq!(payload_tags(&transport.inner().sent), vec![1, 2]);
}

// ============================================================================
// Loss
// ============================================================================

#[test]
fn test_total_unreliable_loss_delivers_nothing() {
    let (mut transport, clock) = manual_transport(seeded_config(10, 1.0, 0.0));
    for tag in 0..50u8 {
        let outcome = transport
            .submit(ChannelKind::Unreliable, Destination::Server, &[tag])
            .unwrap();
        assert_eq!(outcome, SubmitOutcome::Dropped);
    }
    clock.set(10.0);
    transport.tick_outgoing(Role::Client).unwrap();
    assert!(transport.inner().sent.is_empty());
}

#[test]
fn test_total_reliable_loss_delivers_everything_late() {
    let (mut transport, clock) = manual_transport(seeded_config(100, 1.0, 0.0));
    for tag in 0..50u8 {
        transport.send_to_server(ChannelKind::Reliable, &[tag]).unwrap();
    }

    clock.set(0.15);
    transport.tick_outgoing(Role::Client).unwrap();
    assert!(transport.inner().sent.is_empty());

    clock.set(0.2);
    transport.tick_outgoing(Role::Client).unwrap();
    assert_eq!(payload_tags(&transport.inner().sent), (0..50).collect::<Vec<_>>());
}

#[test]
fn test_partial_loss_matches_seeded_policy() {
    let config = seeded_config(0, 0.3, 0.0);
    let (mut transport, _clock) = manual_transport(config.clone());

    // Reproduce the decisions with an identically seeded policy.
    let mut policy = ImpairmentPolicy::new(Pcg32::seed_from_u64(config.seed.unwrap()));
    let expected: Vec<u8> = (0..200u8)
        .filter(|_| !policy.should_drop(config.packet_loss))
        .collect();

    for tag in 0..200u8 {
        transport
            .send_to_server(ChannelKind::Unreliable, &[tag])
            .unwrap();
    }
    transport.tick_outgoing(Role::Client).unwrap();
    assert_eq!(payload_tags(&transport.inner().sent), expected);
    assert!(expected.len() > 100 && expected.len() < 180);
}

// ============================================================================
// Reordering
// ============================================================================

#[test]
fn test_certain_reorder_rotates_first_packet_to_the_back() {
    let (mut transport, _clock) = manual_transport(seeded_config(0, 0.0, 1.0));
    for tag in [b'A', b'B', b'C', b'D'] {
        transport
            .send_to_server(ChannelKind::Unreliable, &[tag])
            .unwrap();
    }
    transport.tick_outgoing(Role::Client).unwrap();
    assert_eq!(
        payload_tags(&transport.inner().sent),
        vec![b'B', b'C', b'D', b'A']
    );
}

#[test]
fn test_reliable_order_survives_reorder_probability() {
    let (mut transport, _clock) = manual_transport(seeded_config(0, 0.0, 1.0));
    for tag in 0..20u8 {
        transport.send_to_server(ChannelKind::Reliable, &[tag]).unwrap();
    }
    transport.tick_outgoing(Role::Client).unwrap();
    assert_eq!(payload_tags(&transport.inner().sent), (0..20).collect::<Vec<_>>());
}

#[test]
fn test_reordered_packet_stalls_the_queue() {
    let (mut transport, clock) = manual_transport(seeded_config(100, 0.0, 1.0));
    transport
        .send_to_server(ChannelKind::Unreliable, &[1])
        .unwrap();
    clock.set(0.05);
    transport
        .send_to_server(ChannelKind::Unreliable, &[2])
        .unwrap();

    // Packet 1 is due but packet 2 now sits in front of it.
    clock.set(0.12);
    assert_eq!(transport.tick_outgoing(Role::Client).unwrap(), 0);

    clock.set(0.2);
    assert_eq!(transport.tick_outgoing(Role::Client).unwrap(), 2);
    assert_eq!(payload_tags(&transport.inner().sent), vec![2, 1]);
}

#[test]
fn test_channels_and_directions_are_independent() {
    let (mut transport, _clock) = manual_transport(seeded_config(0, 0.0, 1.0));
    let peer = ConnectionId::new(8);
    transport.send_to_server(ChannelKind::Unreliable, &[1]).unwrap();
    transport.send_to_client(ChannelKind::Unreliable, &[2], peer).unwrap();
    transport.send_to_server(ChannelKind::Reliable, &[3]).unwrap();

    // Each queue held a single packet, so nothing could be reordered.
    transport.tick_outgoing(Role::Server).unwrap();
    transport.tick_outgoing(Role::Client).unwrap();
    assert_eq!(payload_tags(&transport.inner().sent), vec![2, 3, 1]);
    assert_eq!(transport.inner().sent_to(Destination::Client(peer)).len(), 1);
}
