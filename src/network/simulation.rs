//! The impairment engine: four pending queues and the rules that fill and
//! empty them.
//!
//! [`SimulationEngine::submit`] decides the fate of an outbound packet when it
//! is sent; [`SimulationEngine::tick`] hands due packets to the transport.
//! The engine never reads the clock itself, callers pass `now` in seconds.

use tracing::{debug, trace};

use crate::network::config::{validate_latency, validate_probability, SimulationConfig};
use crate::network::pending_queue::{PendingPacket, PendingPacketQueue};
use crate::network::policy::ImpairmentPolicy;
use crate::rng::Rng;
use crate::{ChannelKind, Destination, Direction, LatencyResult, Transport};
use web_time::Duration;

/// What happened to a submitted packet.
#[derive(Debug, Clone, Copy, PartialEq)]
#[must_use = "SubmitOutcome reports whether the packet was sent, queued or dropped"]
pub enum SubmitOutcome {
    /// Simulation is off; the packet went straight to the transport.
    Sent,
    /// The packet is waiting in a pending queue.
    Queued {
        /// Seconds since simulation start at which it becomes due.
        release_at: f64,
        /// Delay that was applied, including any resend penalty.
        delay: f64,
        /// Whether it was placed ahead of the previously queued packet.
        reordered: bool,
    },
    /// An unreliable packet was lost.
    Dropped,
}

/// Owns the pending queues and applies the impairment rules.
#[derive(Debug)]
pub struct SimulationEngine<R> {
    config: SimulationConfig,
    policy: ImpairmentPolicy<R>,
    /// Indexed by `[Direction::index()][ChannelKind::index()]`.
    queues: [[PendingPacketQueue; 2]; 2],
}

impl<R: Rng> SimulationEngine<R> {
    /// Creates an engine after validating `config`.
    ///
    /// `config.seed` is not consulted here; the caller seeds `rng`.
    pub fn new(config: SimulationConfig, rng: R) -> LatencyResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            policy: ImpairmentPolicy::new(rng),
            queues: Default::default(),
        })
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Replaces the configuration. The old one stays on error.
    pub fn set_config(&mut self, config: SimulationConfig) -> LatencyResult<()> {
        config.validate()?;
        debug!(?config, "simulation config replaced");
        self.config = config;
        Ok(())
    }

    /// Turns simulation on or off. Packets already queued still drain.
    pub fn set_simulate(&mut self, simulate: bool) {
        debug!(simulate, "simulation toggled");
        self.config.simulate = simulate;
    }

    /// Sets the one-way latency.
    pub fn set_latency(&mut self, latency: Duration) -> LatencyResult<()> {
        validate_latency(latency.as_secs_f64())?;
        debug!(latency_ms = latency.as_millis() as u64, "latency changed");
        self.config.latency = latency;
        Ok(())
    }

    /// Sets the packet loss probability.
    pub fn set_packet_loss(&mut self, probability: f64) -> LatencyResult<()> {
        validate_probability("packet_loss", probability)?;
        debug!(probability, "packet loss changed");
        self.config.packet_loss = probability;
        Ok(())
    }

    /// Sets the out-of-order probability.
    pub fn set_out_of_order(&mut self, probability: f64) -> LatencyResult<()> {
        validate_probability("out_of_order", probability)?;
        debug!(probability, "out of order changed");
        self.config.out_of_order = probability;
        Ok(())
    }

    /// Replaces the random source behind the impairment decisions.
    pub fn set_rng(&mut self, rng: R) {
        self.policy.set_rng(rng);
    }

    /// Sends or queues a packet according to the current configuration.
    ///
    /// With simulation off the payload is sent at once and transport errors
    /// are returned unchanged. Otherwise the packet is either dropped
    /// (unreliable loss) or queued for release at `now + delay`, where a
    /// "lost" reliable packet gets one extra latency period to stand in for
    /// its resend.
    pub fn submit<T: Transport>(
        &mut self,
        transport: &mut T,
        now: f64,
        channel: ChannelKind,
        destination: Destination,
        payload: &[u8],
    ) -> Result<SubmitOutcome, T::Error> {
        if !self.config.simulate {
            send_now(transport, channel, destination, payload)?;
            return Ok(SubmitOutcome::Sent);
        }

        let latency = self.config.latency_secs();
        let mut delay = latency;
        if self.policy.should_drop(self.config.packet_loss) {
            match channel {
                ChannelKind::Reliable => delay += latency,
                ChannelKind::Unreliable => {
                    trace!(?destination, len = payload.len(), "unreliable packet lost");
                    return Ok(SubmitOutcome::Dropped);
                },
            }
        }

        let release_at = now + delay;
        let direction = destination.direction();
        let reordered = channel == ChannelKind::Unreliable
            && !self.queue(direction, channel).is_empty()
            && self.policy.should_reorder(self.config.out_of_order);

        let queue = self.queue_mut(direction, channel);
        queue.enqueue(
            PendingPacket::new(channel, destination, payload, release_at),
            reordered,
        );
        trace!(
            ?destination,
            %channel,
            release_at,
            reordered,
            pending = queue.len(),
            "packet queued"
        );

        Ok(SubmitOutcome::Queued {
            release_at,
            delay,
            reordered,
        })
    }

    /// Releases every due packet travelling in `direction`, then lets the
    /// transport flush.
    ///
    /// The reliable queue drains before the unreliable one. Returns the number
    /// of packets released. If the transport fails, the error is returned and
    /// packets not yet handed over stay queued.
    pub fn tick<T: Transport>(
        &mut self,
        transport: &mut T,
        now: f64,
        direction: Direction,
    ) -> Result<usize, T::Error> {
        let mut released = 0;
        for channel in ChannelKind::ALL {
            let queue = &mut self.queues[direction.index()][channel.index()];
            while let Some(packet) = queue.pop_ready(now) {
                send_now(transport, packet.channel(), packet.destination(), packet.payload())?;
                released += 1;
            }
        }
        if released > 0 {
            trace!(?direction, released, "released pending packets");
        }
        transport.iterate_outgoing(direction.sender())?;
        Ok(released)
    }

    /// The queue for `direction` and `channel`.
    #[must_use]
    pub fn queue(&self, direction: Direction, channel: ChannelKind) -> &PendingPacketQueue {
        &self.queues[direction.index()][channel.index()]
    }

    /// Number of packets waiting in one queue.
    #[must_use]
    pub fn pending(&self, direction: Direction, channel: ChannelKind) -> usize {
        self.queue(direction, channel).len()
    }

    /// Number of packets waiting across all queues.
    #[must_use]
    pub fn total_pending(&self) -> usize {
        self.queues.iter().flatten().map(PendingPacketQueue::len).sum()
    }

    /// Empties all four queues and returns how many packets were discarded.
    pub fn clear(&mut self) -> usize {
        let discarded: usize = self
            .queues
            .iter_mut()
            .flatten()
            .map(PendingPacketQueue::clear)
            .sum();
        if discarded > 0 {
            debug!(discarded, "pending packets discarded");
        }
        discarded
    }

    fn queue_mut(&mut self, direction: Direction, channel: ChannelKind) -> &mut PendingPacketQueue {
        &mut self.queues[direction.index()][channel.index()]
    }
}

/// Hands a payload to the transport without any simulation.
pub(crate) fn send_now<T: Transport>(
    transport: &mut T,
    channel: ChannelKind,
    destination: Destination,
    payload: &[u8],
) -> Result<(), T::Error> {
    match destination {
        Destination::Server => transport.send_to_server(channel, payload),
        Destination::Client(connection) => transport.send_to_client(channel, payload, connection),
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
    use crate::network::events::{AddressFamily, LocalConnectionState, RemoteConnectionState};
    use crate::rng::{Pcg32, SeedableRng};
    use crate::{ConnectionId, Role, TransportEvent};
    use std::collections::VecDeque;
    use std::fmt;

    #[derive(Debug, PartialEq)]
    struct SendFailed;

    impl fmt::Display for SendFailed {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "send failed")
        }
    }

    impl std::error::Error for SendFailed {}

    /// Records sends; can be told to fail after a number of successful sends.
    #[derive(Default)]
    struct TestTransport {
        sent: Vec<(ChannelKind, Destination, Vec<u8>)>,
        flushes: Vec<Role>,
        fail_after: Option<usize>,
    }

    impl TestTransport {
        fn record(
            &mut self,
            channel: ChannelKind,
            destination: Destination,
            payload: &[u8],
        ) -> Result<(), SendFailed> {
            if self.fail_after.is_some_and(|limit| self.sent.len() >= limit) {
                return Err(SendFailed);
            }
            self.sent.push((channel, destination, payload.to_vec()));
            Ok(())
        }

        fn tags(&self) -> Vec<u8> {
            self.sent.iter().map(|(_, _, p)| p[0]).collect()
        }
    }

    impl Transport for TestTransport {
        type Error = SendFailed;

        fn send_to_server(
            &mut self,
            channel: ChannelKind,
            payload: &[u8],
        ) -> Result<(), SendFailed> {
            self.record(channel, Destination::Server, payload)
        }

        fn send_to_client(
            &mut self,
            channel: ChannelKind,
            payload: &[u8],
            connection: ConnectionId,
        ) -> Result<(), SendFailed> {
            self.record(channel, Destination::Client(connection), payload)
        }

        fn iterate_incoming(&mut self, _role: Role) -> Result<Vec<TransportEvent>, SendFailed> {
            Ok(Vec::new())
        }

        fn iterate_outgoing(&mut self, role: Role) -> Result<(), SendFailed> {
            self.flushes.push(role);
            Ok(())
        }

        fn start_connection(&mut self, _role: Role) -> Result<bool, SendFailed> {
            Ok(true)
        }

        fn stop_connection(&mut self, _role: Role) -> Result<bool, SendFailed> {
            Ok(true)
        }

        fn stop_remote_connection(
            &mut self,
            _c: ConnectionId,
            _i: bool,
        ) -> Result<bool, SendFailed> {
            Ok(true)
        }

        fn local_connection_state(&self, _role: Role) -> LocalConnectionState {
            LocalConnectionState::Started
        }

        fn remote_connection_state(&self, _c: ConnectionId) -> RemoteConnectionState {
            RemoteConnectionState::Started
        }

        fn mtu(&self, _channel: ChannelKind) -> usize {
            1200
        }

        fn set_client_address(&mut self, _address: &str) {}

        fn set_server_bind_address(&mut self, _address: &str, _family: AddressFamily) {}

        fn server_bind_address(&self, _family: AddressFamily) -> Option<String> {
            None
        }

        fn set_port(&mut self, _port: u16) {}

        fn port(&self) -> u16 {
            0
        }
    }

    /// Replays fixed draws in `[0, 1)`; used to pick individual decisions.
    struct ScriptedRng {
        draws: VecDeque<f64>,
    }

    impl ScriptedRng {
        fn new(draws: &[f64]) -> Self {
            Self {
                draws: draws.iter().copied().collect(),
            }
        }
    }

    impl Rng for ScriptedRng {
        fn next_u32(&mut self) -> u32 {
            (self.next_u64() >> 32) as u32
        }

        fn next_u64(&mut self) -> u64 {
            let draw = self.draws.pop_front().expect("script exhausted");
            ((draw * (1u64 << 53) as f64) as u64) << 11
        }
    }

    fn config(latency_ms: i64, loss: f64, reorder: f64) -> SimulationConfig {
        SimulationConfig::builder()
            .latency_ms(latency_ms)
            .packet_loss(loss)
            .out_of_order(reorder)
            .build()
            .unwrap()
    }

    fn engine(config: SimulationConfig) -> SimulationEngine<Pcg32> {
        SimulationEngine::new(config, Pcg32::seed_from_u64(42)).unwrap()
    }

    fn queue_tags(
        engine: &SimulationEngine<impl Rng>,
        direction: Direction,
        channel: ChannelKind,
    ) -> Vec<u8> {
        engine
            .queue(direction, channel)
            .iter()
            .map(|p| p.payload()[0])
            .collect()
    }

    #[test]
    fn test_disabled_simulation_sends_immediately() {
        let mut transport = TestTransport::default();
        let mut engine = engine(SimulationConfig {
            simulate: false,
            ..config(500, 1.0, 1.0)
        });

        for tag in 0..5u8 {
            let outcome = engine
                .submit(&mut transport, 0.0, ChannelKind::Unreliable, Destination::Server, &[tag])
                .unwrap();
            assert_eq!(outcome, SubmitOutcome::Sent);
        }
        assert_eq!(transport.tags(), vec![0, 1, 2, 3, 4]);
        assert_eq!(engine.total_pending(), 0);
    }

    #[test]
    fn test_disabled_simulation_propagates_transport_error() {
        let mut transport = TestTransport {
            fail_after: Some(0),
            ..TestTransport::default()
        };
        let mut engine = engine(SimulationConfig::passthrough());
        let result = engine.submit(
            &mut transport,
            0.0,
            ChannelKind::Reliable,
            Destination::Server,
            &[1],
        );
        assert_eq!(result, Err(SendFailed));
    }

    #[test]
    fn test_packet_released_after_latency() {
        let mut transport = TestTransport::default();
        let mut engine = engine(config(100, 0.0, 0.0));

        let outcome = engine
            .submit(&mut transport, 0.0, ChannelKind::Reliable, Destination::Server, &[7])
            .unwrap();
        assert_eq!(
            outcome,
            SubmitOutcome::Queued {
                release_at: 0.1,
                delay: 0.1,
                reordered: false
            }
        );

        assert_eq!(engine.tick(&mut transport, 0.05, Direction::ClientToServer).unwrap(), 0);
        assert!(transport.sent.is_empty());
        assert_eq!(engine.tick(&mut transport, 0.1, Direction::ClientToServer).unwrap(), 1);
        assert_eq!(transport.tags(), vec![7]);
    }

    #[test]
    fn test_reliable_loss_doubles_delay() {
        let mut transport = TestTransport::default();
        let mut engine = engine(config(100, 1.0, 0.0));

        for tag in 0..20u8 {
            let outcome = engine
                .submit(&mut transport, 0.0, ChannelKind::Reliable, Destination::Server, &[tag])
                .unwrap();
            match outcome {
                SubmitOutcome::Queued { delay, release_at, .. } => {
                    assert_eq!(delay, 0.2);
                    assert_eq!(release_at, 0.2);
                },
                other => panic!("unexpected outcome {:?}", other),
            }
        }
        assert_eq!(engine.pending(Direction::ClientToServer, ChannelKind::Reliable), 20);
    }

    #[test]
    fn test_unreliable_full_loss_never_releases() {
        let mut transport = TestTransport::default();
        let mut engine = engine(config(0, 1.0, 0.0));

        for tag in 0..20u8 {
            let outcome = engine
                .submit(
                    &mut transport,
                    0.0,
                    ChannelKind::Unreliable,
                    Destination::Client(ConnectionId::new(1)),
                    &[tag],
                )
                .unwrap();
            assert_eq!(outcome, SubmitOutcome::Dropped);
        }
        engine.tick(&mut transport, 100.0, Direction::ServerToClient).unwrap();
        assert!(transport.sent.is_empty());
        assert_eq!(engine.total_pending(), 0);
    }

    #[test]
    fn test_reliable_packets_are_never_reordered() {
        let mut transport = TestTransport::default();
        let mut engine = engine(config(0, 0.0, 1.0));
        for tag in 0..4u8 {
            let outcome = engine
                .submit(&mut transport, 0.0, ChannelKind::Reliable, Destination::Server, &[tag])
                .unwrap();
            assert!(matches!(outcome, SubmitOutcome::Queued { reordered: false, .. }));
        }
        assert_eq!(
            queue_tags(&engine, Direction::ClientToServer, ChannelKind::Reliable),
            vec![0, 1, 2, 3]
        );
    }

    #[test]
    fn test_certain_reorder_keeps_first_packet_at_tail() {
        let mut transport = TestTransport::default();
        let mut engine = engine(config(0, 0.0, 1.0));
        for tag in [b'A', b'B', b'C'] {
            let _ = engine
                .submit(&mut transport, 0.0, ChannelKind::Unreliable, Destination::Server, &[tag])
                .unwrap();
        }
        // B goes before A, then C goes before A.
        assert_eq!(
            queue_tags(&engine, Direction::ClientToServer, ChannelKind::Unreliable),
            vec![b'B', b'C', b'A']
        );
    }

    #[test]
    fn test_single_reorder_swaps_with_previous_packet() {
        let mut transport = TestTransport::default();
        let rng = ScriptedRng::new(&[0.9, 0.1]);
        let mut engine = SimulationEngine::new(config(0, 0.0, 0.5), rng).unwrap();

        // A: empty queue, no draw. B: draw 0.9 (stays). C: draw 0.1 (reorders).
        for tag in [b'A', b'B', b'C'] {
            let _ = engine
                .submit(&mut transport, 0.0, ChannelKind::Unreliable, Destination::Server, &[tag])
                .unwrap();
        }
        assert_eq!(
            queue_tags(&engine, Direction::ClientToServer, ChannelKind::Unreliable),
            vec![b'A', b'C', b'B']
        );
    }

    #[test]
    fn test_reorder_stalls_earlier_packet() {
        let mut transport = TestTransport::default();
        let rng = ScriptedRng::new(&[0.0]);
        let mut engine = SimulationEngine::new(config(100, 0.0, 0.5), rng).unwrap();

        let _ = engine
            .submit(&mut transport, 0.0, ChannelKind::Unreliable, Destination::Server, &[1])
            .unwrap();
        // Sent 50ms later but placed ahead of packet 1.
        let _ = engine
            .submit(&mut transport, 0.05, ChannelKind::Unreliable, Destination::Server, &[2])
            .unwrap();

        // Packet 1 is due at 0.1 but packet 2 (due ~0.15) blocks it.
        engine.tick(&mut transport, 0.12, Direction::ClientToServer).unwrap();
        assert!(transport.sent.is_empty());

        engine.tick(&mut transport, 0.2, Direction::ClientToServer).unwrap();
        assert_eq!(transport.tags(), vec![2, 1]);
    }

    #[test]
    fn test_fifo_without_reorder() {
        let mut transport = TestTransport::default();
        let mut engine = engine(config(30, 0.0, 0.0));
        for tag in 0..10u8 {
            let _ = engine
                .submit(
                    &mut transport,
                    f64::from(tag) * 0.01,
                    ChannelKind::Unreliable,
                    Destination::Server,
                    &[tag],
                )
                .unwrap();
        }
        engine.tick(&mut transport, 1.0, Direction::ClientToServer).unwrap();
        assert_eq!(transport.tags(), (0..10).collect::<Vec<u8>>());
    }

    #[test]
    fn test_tick_drains_only_its_direction_and_flushes_sender() {
        let mut transport = TestTransport::default();
        let mut engine = engine(config(0, 0.0, 0.0));
        let to_client = Destination::Client(ConnectionId::new(3));

        let _ = engine
            .submit(&mut transport, 0.0, ChannelKind::Reliable, Destination::Server, &[1])
            .unwrap();
        let _ = engine
            .submit(&mut transport, 0.0, ChannelKind::Reliable, to_client, &[2])
            .unwrap();

        assert_eq!(engine.tick(&mut transport, 0.0, Direction::ServerToClient).unwrap(), 1);
        assert_eq!(transport.sent, vec![(ChannelKind::Reliable, to_client, vec![2])]);
        assert_eq!(transport.flushes, vec![Role::Server]);
        assert_eq!(engine.pending(Direction::ClientToServer, ChannelKind::Reliable), 1);
    }

    #[test]
    fn test_reliable_queue_drains_before_unreliable() {
        let mut transport = TestTransport::default();
        let mut engine = engine(config(0, 0.0, 0.0));
        let _ = engine
            .submit(&mut transport, 0.0, ChannelKind::Unreliable, Destination::Server, &[1])
            .unwrap();
        let _ = engine
            .submit(&mut transport, 0.0, ChannelKind::Reliable, Destination::Server, &[2])
            .unwrap();
        engine.tick(&mut transport, 0.0, Direction::ClientToServer).unwrap();
        assert_eq!(transport.tags(), vec![2, 1]);
    }

    #[test]
    fn test_tick_error_keeps_unsent_packets_queued() {
        let mut transport = TestTransport {
            fail_after: Some(1),
            ..TestTransport::default()
        };
        let mut engine = engine(config(0, 0.0, 0.0));
        for tag in 0..3u8 {
            let _ = engine
                .submit(&mut transport, 0.0, ChannelKind::Reliable, Destination::Server, &[tag])
                .unwrap();
        }
        assert_eq!(engine.tick(&mut transport, 0.0, Direction::ClientToServer), Err(SendFailed));
        assert_eq!(transport.tags(), vec![0]);
        // The failed packet was handed over; the last one is still waiting.
        assert_eq!(engine.pending(Direction::ClientToServer, ChannelKind::Reliable), 1);
        assert!(transport.flushes.is_empty());
    }

    #[test]
    fn test_queued_packets_drain_after_simulation_is_disabled() {
        let mut transport = TestTransport::default();
        let mut engine = engine(config(100, 0.0, 0.0));
        let _ = engine
            .submit(&mut transport, 0.0, ChannelKind::Reliable, Destination::Server, &[1])
            .unwrap();
        engine.set_simulate(false);
        engine.tick(&mut transport, 0.1, Direction::ClientToServer).unwrap();
        assert_eq!(transport.tags(), vec![1]);
    }

    #[test]
    fn test_clear_empties_all_queues() {
        let mut transport = TestTransport::default();
        let mut engine = engine(config(1000, 0.0, 0.0));
        let to_client = Destination::Client(ConnectionId::new(1));
        for channel in ChannelKind::ALL {
            for destination in [Destination::Server, to_client] {
                let _ = engine.submit(&mut transport, 0.0, channel, destination, &[0]).unwrap();
            }
        }
        assert_eq!(engine.total_pending(), 4);
        assert_eq!(engine.clear(), 4);
        assert_eq!(engine.clear(), 0);
        assert_eq!(engine.total_pending(), 0);
    }

    #[test]
    fn test_setters_reject_invalid_values_and_keep_old_ones() {
        let mut engine = engine(config(100, 0.1, 0.2));

        assert!(engine.set_packet_loss(1.5).is_err());
        assert!(engine.set_out_of_order(-0.1).is_err());
        assert!(engine.set_latency(Duration::from_secs(61)).is_err());
        assert_eq!(engine.config().packet_loss, 0.1);
        assert_eq!(engine.config().out_of_order, 0.2);
        assert_eq!(engine.config().latency, Duration::from_millis(100));

        engine.set_packet_loss(0.5).unwrap();
        engine.set_out_of_order(0.0).unwrap();
        engine.set_latency(Duration::from_millis(20)).unwrap();
        assert_eq!(engine.config().packet_loss, 0.5);
        assert_eq!(engine.config().out_of_order, 0.0);
        assert_eq!(engine.config().latency, Duration::from_millis(20));

        let bad = SimulationConfig {
            packet_loss: 2.0,
            ..SimulationConfig::default()
        };
        assert!(engine.set_config(bad).is_err());
        assert_eq!(engine.config().packet_loss, 0.5);
    }

    #[test]
    fn test_set_rng_changes_loss_decisions() {
        let outcomes = |engine: &mut SimulationEngine<Pcg32>| {
            let mut transport = TestTransport::default();
            let dropped: Vec<bool> = (0..64u8)
                .map(|tag| {
                    let outcome = engine
                        .submit(
                            &mut transport,
                            0.0,
                            ChannelKind::Unreliable,
                            Destination::Server,
                            &[tag],
                        )
                        .unwrap();
                    outcome == SubmitOutcome::Dropped
                })
                .collect();
            engine.clear();
            dropped
        };

        let mut engine = engine(config(10, 0.5, 0.0));
        let seeded = outcomes(&mut engine);

        engine.set_rng(Pcg32::seed_from_u64(7));
        let reseeded = outcomes(&mut engine);
        assert_ne!(seeded, reseeded);

        engine.set_rng(Pcg32::seed_from_u64(42));
        assert_eq!(outcomes(&mut engine), seeded);
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let bad = SimulationConfig {
            out_of_order: f64::NAN,
            ..SimulationConfig::default()
        };
        assert!(SimulationEngine::new(bad, Pcg32::seed_from_u64(1)).is_err());
    }
}
