//! The decorator that puts the impairment simulation in front of a transport.

use std::sync::Arc;

use tracing::debug;
use web_time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::network::config::SimulationConfig;
use crate::network::events::{
    AddressFamily, LocalConnectionState, RemoteConnectionState, TransportEvent,
};
use crate::network::observer::{ObserverRegistry, SubscriptionId, TransportObserver};
use crate::network::simulation::{SimulationEngine, SubmitOutcome};
use crate::network::statistics::{StatisticsSnapshot, StatisticsTracker};
use crate::rng::{Pcg32, Rng, SeedableRng};
use crate::{
    ChannelKind, ConnectionId, Destination, LatencyResult, MaybeSendSync, Role, Transport,
};

/// Wraps a [`Transport`] and delays, drops and reorders its outbound packets.
///
/// Outbound packets are held in the simulation until
/// [`tick_outgoing`](Self::tick_outgoing) is called for the sending role at or
/// after their release time. Inbound traffic passes through
/// [`tick_incoming`](Self::tick_incoming) untouched and is only counted.
/// Lifecycle and addressing calls go straight to the wrapped transport.
///
/// `LatencyTransport` implements [`Transport`] itself, so code written against
/// the trait does not need to know the simulation is there.
///
/// # Host loop
///
/// ```ignore
/// loop {
///     for role in Role::ALL {
///         for event in transport.tick_incoming(role)? {
///             // handle event
///         }
///     }
///     // game logic sends through `transport`
///     for role in Role::ALL {
///         transport.tick_outgoing(role)?;
///     }
///     transport.update_statistics(frame_delta);
/// }
/// ```
pub struct LatencyTransport<T, C = SystemClock, R = Pcg32> {
    inner: T,
    engine: SimulationEngine<R>,
    statistics: StatisticsTracker,
    clock: C,
    observers: ObserverRegistry,
}

impl<T: Transport> LatencyTransport<T> {
    /// Wraps `inner` using the wall clock.
    ///
    /// Impairment decisions are seeded from `config.seed`, or from entropy if
    /// no seed is set.
    ///
    /// # Errors
    ///
    /// Returns [`LatencyError::ConfigValueOutOfRange`](crate::LatencyError::ConfigValueOutOfRange)
    /// if `config` is invalid.
    pub fn new(inner: T, config: SimulationConfig) -> LatencyResult<Self> {
        Self::with_clock(inner, config, SystemClock::new())
    }
}

impl<T: Transport, C: Clock> LatencyTransport<T, C> {
    /// Wraps `inner` using `clock` for release times.
    pub fn with_clock(inner: T, config: SimulationConfig, clock: C) -> LatencyResult<Self> {
        let rng = config
            .seed
            .map_or_else(Pcg32::from_entropy, Pcg32::seed_from_u64);
        Self::with_parts(inner, config, clock, rng)
    }
}

impl<T: Transport, C: Clock, R: Rng> LatencyTransport<T, C, R> {
    /// Wraps `inner` with an explicit clock and random source.
    ///
    /// `config.seed` is ignored; `rng` is used as given.
    pub fn with_parts(inner: T, config: SimulationConfig, clock: C, rng: R) -> LatencyResult<Self> {
        let statistics = StatisticsTracker::new(config.show_statistics, config.rotation);
        let engine = SimulationEngine::new(config, rng)?;
        debug!(config = ?engine.config(), "latency transport created");
        Ok(Self {
            inner,
            engine,
            statistics,
            clock,
            observers: ObserverRegistry::default(),
        })
    }

    // ---------------------------------------------------------------------
    // Sending
    // ---------------------------------------------------------------------

    /// Sends a payload through the simulation.
    ///
    /// The packet is counted as sent by the role that owns `destination`'s
    /// direction before loss is applied, so dropped packets still show up in
    /// the sent statistics.
    pub fn submit(
        &mut self,
        channel: ChannelKind,
        destination: Destination,
        payload: &[u8],
    ) -> Result<SubmitOutcome, T::Error> {
        self.statistics
            .record_sent(destination.direction().sender(), payload.len());
        let now = self.clock.now();
        self.engine
            .submit(&mut self.inner, now, channel, destination, payload)
    }

    /// Releases due packets sent by `role` and flushes the wrapped transport
    /// for that role. Returns how many packets were released.
    pub fn tick_outgoing(&mut self, role: Role) -> Result<usize, T::Error> {
        let now = self.clock.now();
        self.engine
            .tick(&mut self.inner, now, role.outgoing_direction())
    }

    /// Polls the wrapped transport for `role`.
    ///
    /// Data events are counted into the role that received them and every
    /// event is passed to the subscribed observers before being returned
    /// unchanged.
    pub fn tick_incoming(&mut self, role: Role) -> Result<Vec<TransportEvent>, T::Error> {
        let events = self.inner.iterate_incoming(role)?;
        for event in &events {
            if let Some((receiver, len)) = event.received() {
                self.statistics.record_received(receiver, len);
            }
            self.observers.notify(event);
        }
        Ok(events)
    }

    /// Advances the statistics timer by one frame. Returns whether the
    /// snapshots were refreshed.
    pub fn update_statistics(&mut self, delta: Duration) -> bool {
        self.statistics.tick(delta)
    }

    // ---------------------------------------------------------------------
    // Configuration
    // ---------------------------------------------------------------------

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &SimulationConfig {
        self.engine.config()
    }

    /// Replaces the configuration, including the statistics settings.
    ///
    /// The random source is not reseeded. On error nothing changes.
    pub fn set_config(&mut self, config: SimulationConfig) -> LatencyResult<()> {
        let show_statistics = config.show_statistics;
        let rotation = config.rotation;
        self.engine.set_config(config)?;
        self.statistics.set_enabled(show_statistics);
        self.statistics.set_rotation(rotation);
        Ok(())
    }

    /// Turns simulation on or off. See [`SimulationEngine::set_simulate`].
    pub fn set_simulate(&mut self, simulate: bool) {
        self.engine.set_simulate(simulate);
    }

    /// Sets the one-way latency.
    pub fn set_latency(&mut self, latency: Duration) -> LatencyResult<()> {
        self.engine.set_latency(latency)
    }

    /// Sets the packet loss probability.
    pub fn set_packet_loss(&mut self, probability: f64) -> LatencyResult<()> {
        self.engine.set_packet_loss(probability)
    }

    /// Sets the out-of-order probability.
    pub fn set_out_of_order(&mut self, probability: f64) -> LatencyResult<()> {
        self.engine.set_out_of_order(probability)
    }

    // ---------------------------------------------------------------------
    // Inspection
    // ---------------------------------------------------------------------

    /// The simulation engine, for queue inspection.
    #[must_use]
    pub fn engine(&self) -> &SimulationEngine<R> {
        &self.engine
    }

    /// The statistics tracker.
    #[must_use]
    pub fn statistics(&self) -> &StatisticsTracker {
        &self.statistics
    }

    /// The last finished statistics window for `role`.
    #[must_use]
    pub fn statistics_snapshot(&self, role: Role) -> StatisticsSnapshot {
        self.statistics.snapshot(role)
    }

    /// The clock used for release times.
    #[must_use]
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// The wrapped transport.
    #[must_use]
    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// The wrapped transport, mutably. Sending through it bypasses the
    /// simulation.
    pub fn inner_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Unwraps the transport. Packets still queued are discarded.
    pub fn into_inner(self) -> T {
        self.inner
    }

    // ---------------------------------------------------------------------
    // Observers
    // ---------------------------------------------------------------------

    /// Registers an observer for events returned by
    /// [`tick_incoming`](Self::tick_incoming).
    pub fn subscribe(&mut self, observer: Arc<dyn TransportObserver>) -> SubscriptionId {
        self.observers.subscribe(observer)
    }

    /// Removes an observer. Returns `false` if `id` was not subscribed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    /// Number of subscribed observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Tears the decorator down ahead of the wrapped transport.
    ///
    /// Observers are removed, statistics reset and all pending packets
    /// discarded before the client and then the server are stopped on the
    /// wrapped transport. Calling it again is harmless.
    pub fn shutdown(&mut self) -> Result<(), T::Error> {
        let observers = self.observers.clear();
        self.statistics.reset();
        let discarded = self.engine.clear();
        debug!(observers, discarded, "latency transport shutting down");
        self.inner.stop_connection(Role::Client)?;
        self.inner.stop_connection(Role::Server)?;
        Ok(())
    }
}

impl<T, C, R> Transport for LatencyTransport<T, C, R>
where
    T: Transport,
    C: Clock + MaybeSendSync,
    R: Rng + MaybeSendSync,
{
    type Error = T::Error;

    fn send_to_server(&mut self, channel: ChannelKind, payload: &[u8]) -> Result<(), T::Error> {
        self.submit(channel, Destination::Server, payload).map(drop)
    }

    fn send_to_client(
        &mut self,
        channel: ChannelKind,
        payload: &[u8],
        connection: ConnectionId,
    ) -> Result<(), T::Error> {
        self.submit(channel, Destination::Client(connection), payload)
            .map(drop)
    }

    fn iterate_incoming(&mut self, role: Role) -> Result<Vec<TransportEvent>, T::Error> {
        self.tick_incoming(role)
    }

    fn iterate_outgoing(&mut self, role: Role) -> Result<(), T::Error> {
        self.tick_outgoing(role).map(drop)
    }

    fn start_connection(&mut self, role: Role) -> Result<bool, T::Error> {
        self.inner.start_connection(role)
    }

    fn stop_connection(&mut self, role: Role) -> Result<bool, T::Error> {
        self.inner.stop_connection(role)
    }

    fn stop_remote_connection(
        &mut self,
        connection: ConnectionId,
        immediately: bool,
    ) -> Result<bool, T::Error> {
        self.inner.stop_remote_connection(connection, immediately)
    }

    fn local_connection_state(&self, role: Role) -> LocalConnectionState {
        self.inner.local_connection_state(role)
    }

    fn remote_connection_state(&self, connection: ConnectionId) -> RemoteConnectionState {
        self.inner.remote_connection_state(connection)
    }

    fn mtu(&self, channel: ChannelKind) -> usize {
        self.inner.mtu(channel)
    }

    fn set_client_address(&mut self, address: &str) {
        self.inner.set_client_address(address);
    }

    fn set_server_bind_address(&mut self, address: &str, family: AddressFamily) {
        self.inner.set_server_bind_address(address, family);
    }

    fn server_bind_address(&self, family: AddressFamily) -> Option<String> {
        self.inner.server_bind_address(family)
    }

    fn set_port(&mut self, port: u16) {
        self.inner.set_port(port);
    }

    fn port(&self) -> u16 {
        self.inner.port()
    }

    fn connection_address(&self, connection: ConnectionId) -> Option<String> {
        self.inner.connection_address(connection)
    }

    fn maximum_clients(&self) -> Option<usize> {
        self.inner.maximum_clients()
    }

    fn set_maximum_clients(&mut self, value: usize) {
        self.inner.set_maximum_clients(value);
    }

    fn timeout(&self, role: Role) -> Option<Duration> {
        self.inner.timeout(role)
    }
}

impl<T: std::fmt::Debug, C: std::fmt::Debug, R: std::fmt::Debug> std::fmt::Debug
    for LatencyTransport<T, C, R>
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LatencyTransport")
            .field("inner", &self.inner)
            .field("engine", &self.engine)
            .field("statistics", &self.statistics)
            .field("clock", &self.clock)
            .field("observers", &self.observers)
            .finish()
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
    use crate::clock::ManualClock;
    use crate::network::observer::CollectingObserver;
    use crate::Direction;
    use std::collections::VecDeque;
    use std::fmt;

    #[derive(Debug)]
    struct StubError;

    impl fmt::Display for StubError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "stub error")
        }
    }

    impl std::error::Error for StubError {}

    #[derive(Debug, Default)]
    struct StubTransport {
        sent: Vec<(Destination, Vec<u8>)>,
        incoming: VecDeque<TransportEvent>,
        calls: Vec<String>,
        port: u16,
        max_clients: Option<usize>,
    }

    impl Transport for StubTransport {
        type Error = StubError;

        fn send_to_server(
            &mut self,
            _channel: ChannelKind,
            payload: &[u8],
        ) -> Result<(), StubError> {
            self.sent.push((Destination::Server, payload.to_vec()));
            Ok(())
        }

        fn send_to_client(
            &mut self,
            _channel: ChannelKind,
            payload: &[u8],
            connection: ConnectionId,
        ) -> Result<(), StubError> {
            self.sent.push((Destination::Client(connection), payload.to_vec()));
            Ok(())
        }

        fn iterate_incoming(&mut self, _role: Role) -> Result<Vec<TransportEvent>, StubError> {
            Ok(self.incoming.drain(..).collect())
        }

        fn iterate_outgoing(&mut self, role: Role) -> Result<(), StubError> {
            self.calls.push(format!("flush {role}"));
            Ok(())
        }

        fn start_connection(&mut self, role: Role) -> Result<bool, StubError> {
            self.calls.push(format!("start {role}"));
            Ok(true)
        }

        fn stop_connection(&mut self, role: Role) -> Result<bool, StubError> {
            self.calls.push(format!("stop {role}"));
            Ok(true)
        }

        fn stop_remote_connection(
            &mut self,
            connection: ConnectionId,
            _i: bool,
        ) -> Result<bool, StubError> {
            self.calls.push(format!("kick {connection}"));
            Ok(true)
        }

        fn local_connection_state(&self, _role: Role) -> LocalConnectionState {
            LocalConnectionState::Started
        }

        fn remote_connection_state(&self, _connection: ConnectionId) -> RemoteConnectionState {
            RemoteConnectionState::Started
        }

        fn mtu(&self, channel: ChannelKind) -> usize {
            match channel {
                ChannelKind::Reliable => 1000,
                ChannelKind::Unreliable => 1200,
            }
        }

        fn set_client_address(&mut self, address: &str) {
            self.calls.push(format!("client address {address}"));
        }

        fn set_server_bind_address(&mut self, address: &str, _family: AddressFamily) {
            self.calls.push(format!("bind {address}"));
        }

        fn server_bind_address(&self, _family: AddressFamily) -> Option<String> {
            Some("0.0.0.0".to_owned())
        }

        fn set_port(&mut self, port: u16) {
            self.port = port;
        }

        fn port(&self) -> u16 {
            self.port
        }

        fn maximum_clients(&self) -> Option<usize> {
            self.max_clients
        }

        fn set_maximum_clients(&mut self, value: usize) {
            self.max_clients = Some(value);
        }
    }

    fn transport(
        config: SimulationConfig,
    ) -> (LatencyTransport<StubTransport, ManualClock>, ManualClock) {
        let clock = ManualClock::new();
        let config = SimulationConfig {
            seed: Some(7),
            ..config
        };
        let transport =
            LatencyTransport::with_clock(StubTransport::default(), config, clock.clone()).unwrap();
        (transport, clock)
    }

    fn delayed(ms: i64) -> SimulationConfig {
        SimulationConfig::builder().latency_ms(ms).build().unwrap()
    }

    #[test]
    fn test_send_is_delayed_until_release_time() {
        let (mut transport, clock) = transport(delayed(100));
        transport
            .send_to_server(ChannelKind::Reliable, &[1, 2, 3])
            .unwrap();

        clock.advance(Duration::from_millis(50));
        assert_eq!(transport.tick_outgoing(Role::Client).unwrap(), 0);
        assert!(transport.inner().sent.is_empty());

        clock.advance(Duration::from_millis(50));
        assert_eq!(transport.tick_outgoing(Role::Client).unwrap(), 1);
        assert_eq!(
            transport.inner().sent,
            vec![(Destination::Server, vec![1, 2, 3])]
        );
    }

    #[test]
    fn test_server_packets_keep_their_target() {
        let (mut transport, _clock) = transport(delayed(0));
        let a = ConnectionId::new(1);
        let b = ConnectionId::new(2);
        transport.send_to_client(ChannelKind::Unreliable, &[1], a).unwrap();
        transport.send_to_client(ChannelKind::Unreliable, &[2], b).unwrap();

        // Client-side tick leaves server traffic alone.
        transport.tick_outgoing(Role::Client).unwrap();
        assert!(transport.inner().sent.is_empty());

        transport.iterate_outgoing(Role::Server).unwrap();
        assert_eq!(
            transport.inner().sent,
            vec![
                (Destination::Client(a), vec![1]),
                (Destination::Client(b), vec![2])
            ]
        );
    }

    #[test]
    fn test_passthrough_config_sends_immediately() {
        let (mut transport, _clock) = transport(SimulationConfig::passthrough());
        transport.send_to_server(ChannelKind::Unreliable, &[5]).unwrap();
        assert_eq!(transport.inner().sent.len(), 1);
        assert_eq!(transport.engine().total_pending(), 0);
    }

    #[test]
    fn test_sent_statistics_include_dropped_packets() {
        let config = SimulationConfig::builder().packet_loss(1.0).build().unwrap();
        let (mut transport, _clock) = transport(config);

        for _ in 0..4 {
            let outcome = transport
                .submit(ChannelKind::Unreliable, Destination::Server, &[0; 10])
                .unwrap();
            assert_eq!(outcome, SubmitOutcome::Dropped);
        }
        assert!(transport.update_statistics(Duration::from_secs(1)));
        let client = transport.statistics_snapshot(Role::Client);
        assert_eq!(client.sent_packets(), 4);
        assert_eq!(client.sent_bytes(), 40);
        assert_eq!(transport.statistics_snapshot(Role::Server).sent_packets(), 0);
    }

    #[test]
    fn test_incoming_events_are_counted_and_observed() {
        let (mut transport, _clock) = transport(delayed(0));
        let observer = Arc::new(CollectingObserver::new());
        let _ = transport.subscribe(observer.clone());

        let events = vec![
            TransportEvent::ClientReceivedData {
                channel: ChannelKind::Reliable,
                payload: vec![0; 100],
            },
            TransportEvent::ServerReceivedData {
                channel: ChannelKind::Unreliable,
                payload: vec![0; 30],
                connection: ConnectionId::new(3),
            },
            TransportEvent::ClientConnectionState(LocalConnectionState::Started),
        ];
        transport.inner_mut().incoming.extend(events.clone());

        let returned = transport.tick_incoming(Role::Client).unwrap();
        assert_eq!(returned, events);
        assert_eq!(observer.events(), events);

        assert!(transport.update_statistics(Duration::from_secs(1)));
        assert_eq!(transport.statistics_snapshot(Role::Client).received_bytes(), 100);
        assert_eq!(transport.statistics_snapshot(Role::Server).received_bytes(), 30);
        assert_eq!(transport.statistics_snapshot(Role::Server).received_packets(), 1);
    }

    #[test]
    fn test_unsubscribed_observer_sees_nothing() {
        let (mut transport, _clock) = transport(delayed(0));
        let observer = Arc::new(CollectingObserver::new());
        let id = transport.subscribe(observer.clone());
        assert!(transport.unsubscribe(id));
        assert_eq!(transport.observer_count(), 0);

        transport
            .inner_mut()
            .incoming
            .push_back(TransportEvent::ServerConnectionState(LocalConnectionState::Started));
        transport.tick_incoming(Role::Server).unwrap();
        assert!(observer.is_empty());
    }

    #[test]
    fn test_shutdown_order_and_idempotence() {
        let (mut transport, _clock) = transport(delayed(500));
        let _ = transport.subscribe(Arc::new(CollectingObserver::new()));
        transport.send_to_server(ChannelKind::Reliable, &[1]).unwrap();
        transport
            .send_to_client(ChannelKind::Unreliable, &[2], ConnectionId::new(1))
            .unwrap();

        transport.shutdown().unwrap();
        assert_eq!(transport.observer_count(), 0);
        assert_eq!(transport.engine().total_pending(), 0);
        assert!(transport.statistics().active(Role::Client).is_empty());
        assert_eq!(transport.inner().calls, vec!["stop client", "stop server"]);

        transport.shutdown().unwrap();
        assert_eq!(transport.engine().total_pending(), 0);
    }

    #[test]
    fn test_statistics_disabled_by_config() {
        let config = SimulationConfig {
            show_statistics: false,
            ..delayed(0)
        };
        let (mut transport, _clock) = transport(config);
        transport.send_to_server(ChannelKind::Reliable, &[1; 8]).unwrap();
        assert!(!transport.update_statistics(Duration::from_secs(1)));
        assert_eq!(transport.statistics_snapshot(Role::Client).sent_packets(), 0);
    }

    #[test]
    fn test_set_config_updates_engine_and_statistics() {
        let (mut transport, _clock) = transport(delayed(0));
        let replacement = SimulationConfig {
            show_statistics: false,
            ..delayed(250)
        };
        transport.set_config(replacement).unwrap();
        assert_eq!(transport.config().latency, Duration::from_millis(250));
        assert!(!transport.statistics().is_enabled());

        let invalid = SimulationConfig {
            packet_loss: -1.0,
            ..SimulationConfig::default()
        };
        assert!(transport.set_config(invalid).is_err());
        assert_eq!(transport.config().latency, Duration::from_millis(250));
    }

    #[test]
    fn test_runtime_setters_validate() {
        let (mut transport, _clock) = transport(delayed(0));
        assert!(transport.set_latency(Duration::from_secs(120)).is_err());
        assert!(transport.set_packet_loss(f64::INFINITY).is_err());
        transport.set_out_of_order(0.25).unwrap();
        transport.set_simulate(false);
        assert_eq!(transport.config().out_of_order, 0.25);
        assert!(!transport.config().simulate);
    }

    #[test]
    fn test_lifecycle_and_configuration_pass_through() {
        let (mut transport, _clock) = transport(delayed(0));
        assert!(transport.start_connection(Role::Server).unwrap());
        assert!(transport
            .stop_remote_connection(ConnectionId::new(4), true)
            .unwrap());
        transport.set_client_address("10.0.0.1");
        transport.set_server_bind_address("::", AddressFamily::Ipv6);
        transport.set_port(7770);
        transport.set_maximum_clients(16);

        assert_eq!(transport.port(), 7770);
        assert_eq!(transport.maximum_clients(), Some(16));
        assert_eq!(transport.mtu(ChannelKind::Reliable), 1000);
        assert_eq!(transport.mtu(ChannelKind::Unreliable), 1200);
        assert_eq!(
            transport.server_bind_address(AddressFamily::Ipv4),
            Some("0.0.0.0".to_owned())
        );
        assert_eq!(
            transport.local_connection_state(Role::Client),
            LocalConnectionState::Started
        );
        assert_eq!(
            transport.remote_connection_state(ConnectionId::new(4)),
            RemoteConnectionState::Started
        );
        assert_eq!(transport.connection_address(ConnectionId::new(4)), None);
        assert_eq!(transport.timeout(Role::Client), None);
        assert_eq!(
            transport.inner().calls,
            vec!["start server", "kick 4", "client address 10.0.0.1", "bind ::"]
        );
    }

    #[test]
    fn test_host_role_pays_latency_per_hop() {
        let (mut transport, clock) = transport(delayed(100));
        // Client sends to the local server; the server answers when it arrives.
        transport.send_to_server(ChannelKind::Reliable, &[1]).unwrap();
        clock.advance(Duration::from_millis(100));
        transport.tick_outgoing(Role::Client).unwrap();
        transport
            .send_to_client(ChannelKind::Reliable, &[2], ConnectionId::new(0))
            .unwrap();

        clock.advance(Duration::from_millis(99));
        transport.tick_outgoing(Role::Server).unwrap();
        assert_eq!(transport.inner().sent.len(), 1);

        clock.advance(Duration::from_millis(50));
        transport.tick_outgoing(Role::Server).unwrap();
        assert_eq!(transport.inner().sent.len(), 2);
        assert_eq!(
            transport.engine().pending(Direction::ServerToClient, ChannelKind::Reliable),
            0
        );
    }

    #[test]
    fn test_seeded_transports_make_identical_decisions() {
        let config = SimulationConfig::builder()
            .packet_loss(0.5)
            .seed(99)
            .build()
            .unwrap();
        let run = || {
            let mut transport = LatencyTransport::with_clock(
                StubTransport::default(),
                config.clone(),
                ManualClock::new(),
            )
            .unwrap();
            (0..64u8)
                .map(|tag| {
                    transport
                        .submit(ChannelKind::Unreliable, Destination::Server, &[tag])
                        .unwrap()
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }
}
