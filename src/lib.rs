//! # Latency Transport
//!
//! A transport decorator for real-time games. [`LatencyTransport`] wraps any
//! [`Transport`] and, while simulation is enabled, holds outbound packets back
//! to add latency, drops a share of them, and lets unreliable packets overtake
//! each other. Everything else (connection lifecycle, addressing, MTU) is
//! forwarded to the wrapped transport untouched. Inbound traffic is never
//! delayed; it is only counted for the per-second throughput statistics.
//!
//! The decorator does not run on its own. The host calls
//! [`tick_outgoing`](LatencyTransport::tick_outgoing) and
//! [`tick_incoming`](LatencyTransport::tick_incoming) once per frame for each
//! role it plays, and [`update_statistics`](LatencyTransport::update_statistics)
//! with the frame delta.
//!
//! ```
//! use latency_transport::{SimulationConfig, ChannelKind};
//! use std::time::Duration;
//!
//! let config = SimulationConfig::builder()
//!     .latency(Duration::from_millis(120))
//!     .packet_loss(0.05)
//!     .out_of_order(0.1)
//!     .seed(42)
//!     .build()
//!     .expect("valid configuration");
//! assert_eq!(config.latency, Duration::from_millis(120));
//! assert_eq!(ChannelKind::try_from(1).ok(), Some(ChannelKind::Unreliable));
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::fmt;

use serde::{Deserialize, Serialize};
use web_time::Duration;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::LatencyError;
pub use network::config::{RotationPolicy, SimulationConfig, SimulationConfigBuilder};
pub use network::events::{
    AddressFamily, LocalConnectionState, RemoteConnectionState, TransportEvent,
};
pub use network::latency_transport::LatencyTransport;
pub use network::observer::{
    CollectingObserver, SubscriptionId, TracingObserver, TransportObserver,
};
pub use network::pending_queue::{PendingPacket, PendingPacketQueue, ReleasedPackets};
pub use network::policy::ImpairmentPolicy;
pub use network::simulation::{SimulationEngine, SubmitOutcome};
pub use network::statistics::{
    format_bytes, StatisticsSnapshot, StatisticsTracker, StatisticsWindow,
};

pub mod clock;
#[doc(hidden)]
pub mod error;
pub mod prelude;
/// Seedable PCG32 random number generator used for impairment decisions.
pub mod rng;
#[doc(hidden)]
pub mod network {
    pub mod config;
    pub mod events;
    pub mod latency_transport;
    pub mod observer;
    pub mod pending_queue;
    pub mod policy;
    pub mod simulation;
    pub mod statistics;
}

// #############
// # CONSTANTS #
// #############

/// Largest one-way latency that may be configured.
pub const MAX_LATENCY: Duration = Duration::from_secs(60);

/// Longest statistics rotation interval that may be configured.
pub const MAX_ROTATION_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// A [`Result`] whose error is a [`LatencyError`].
pub type LatencyResult<T> = Result<T, LatencyError>;

// #############
// #  TYPES    #
// #############

/// Delivery class of a packet.
///
/// Reliable packets are never lost by the simulation (a "lost" reliable
/// packet is delayed by an extra latency period instead) and are never
/// reordered. Unreliable packets can be dropped and can overtake the packet
/// queued just before them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ChannelKind {
    /// Ordered, guaranteed delivery (channel id `0`).
    Reliable = 0,
    /// Best-effort delivery (channel id `1`).
    Unreliable = 1,
}

impl ChannelKind {
    /// Both channel kinds, in the order queues are drained.
    pub const ALL: [Self; 2] = [Self::Reliable, Self::Unreliable];

    /// Returns the raw channel id.
    #[inline]
    #[must_use]
    pub const fn id(self) -> u8 {
        self as u8
    }

    #[inline]
    pub(crate) const fn index(self) -> usize {
        self as usize
    }
}

impl TryFrom<u8> for ChannelKind {
    type Error = LatencyError;

    fn try_from(channel_id: u8) -> Result<Self, Self::Error> {
        match channel_id {
            0 => Ok(Self::Reliable),
            1 => Ok(Self::Unreliable),
            _ => Err(LatencyError::InvalidChannel { channel_id }),
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reliable => write!(f, "reliable"),
            Self::Unreliable => write!(f, "unreliable"),
        }
    }
}

/// Which side of the connection a call is made for.
///
/// A host process plays both roles at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// The local client.
    Client,
    /// The local server.
    Server,
}

impl Role {
    /// Both roles, client first.
    pub const ALL: [Self; 2] = [Self::Client, Self::Server];

    /// The direction of traffic this role sends.
    #[inline]
    #[must_use]
    pub const fn outgoing_direction(self) -> Direction {
        match self {
            Self::Client => Direction::ClientToServer,
            Self::Server => Direction::ServerToClient,
        }
    }

    #[inline]
    pub(crate) const fn index(self) -> usize {
        match self {
            Self::Client => 0,
            Self::Server => 1,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
        }
    }
}

/// Direction of outbound traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Packets sent by the local client.
    ClientToServer,
    /// Packets sent by the local server to its clients.
    ServerToClient,
}

impl Direction {
    /// Both directions.
    pub const ALL: [Self; 2] = [Self::ClientToServer, Self::ServerToClient];

    /// The role that sends traffic in this direction.
    #[inline]
    #[must_use]
    pub const fn sender(self) -> Role {
        match self {
            Self::ClientToServer => Role::Client,
            Self::ServerToClient => Role::Server,
        }
    }

    #[inline]
    pub(crate) const fn index(self) -> usize {
        match self {
            Self::ClientToServer => 0,
            Self::ServerToClient => 1,
        }
    }
}

/// Identifies a remote client on the server side.
///
/// The value is opaque to this crate; it is whatever the wrapped transport
/// hands out.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct ConnectionId(u32);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw value.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the underlying `u32` value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where an outbound packet is headed.
///
/// Carries the direction and, for server traffic, the target connection, so a
/// client packet can never carry a target and a server packet always has one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Destination {
    /// Sent by the local client to the server.
    Server,
    /// Sent by the local server to one client.
    Client(ConnectionId),
}

impl Destination {
    /// The direction a packet with this destination travels.
    #[inline]
    #[must_use]
    pub const fn direction(self) -> Direction {
        match self {
            Self::Server => Direction::ClientToServer,
            Self::Client(_) => Direction::ServerToClient,
        }
    }

    /// The target connection, if the packet goes to a client.
    #[inline]
    #[must_use]
    pub const fn target(self) -> Option<ConnectionId> {
        match self {
            Self::Server => None,
            Self::Client(connection) => Some(connection),
        }
    }
}

// #############
// #  TRAITS   #
// #############

/// Marker for the thread-safety bounds selected by the `sync-send` feature.
#[cfg(feature = "sync-send")]
pub trait MaybeSendSync: Send + Sync {}
#[cfg(feature = "sync-send")]
impl<T: Send + Sync + ?Sized> MaybeSendSync for T {}

/// Marker for the thread-safety bounds selected by the `sync-send` feature.
#[cfg(not(feature = "sync-send"))]
pub trait MaybeSendSync {}
#[cfg(not(feature = "sync-send"))]
impl<T: ?Sized> MaybeSendSync for T {}

/// A packet transport that [`LatencyTransport`] can wrap.
///
/// Sending is immediate from the decorator's point of view; whatever batching
/// the transport does internally is flushed when
/// [`iterate_outgoing`](Transport::iterate_outgoing) is called. Receiving is
/// poll based: [`iterate_incoming`](Transport::iterate_incoming) returns every
/// event (data or connection state change) since the previous call.
///
/// Errors are the transport's own. The decorator never catches, retries or
/// reinterprets them.
pub trait Transport: MaybeSendSync {
    /// Error type of the transport.
    type Error: std::error::Error;

    /// Sends a payload from the local client to the server.
    fn send_to_server(&mut self, channel: ChannelKind, payload: &[u8]) -> Result<(), Self::Error>;

    /// Sends a payload from the local server to one client.
    fn send_to_client(
        &mut self,
        channel: ChannelKind,
        payload: &[u8],
        connection: ConnectionId,
    ) -> Result<(), Self::Error>;

    /// Processes received data and returns the events produced for `role`.
    fn iterate_incoming(&mut self, role: Role) -> Result<Vec<TransportEvent>, Self::Error>;

    /// Flushes data queued for sending by `role`.
    fn iterate_outgoing(&mut self, role: Role) -> Result<(), Self::Error>;

    /// Starts the local client or server. Returns whether it was started.
    fn start_connection(&mut self, role: Role) -> Result<bool, Self::Error>;

    /// Stops the local client or server. Returns whether it was stopped.
    fn stop_connection(&mut self, role: Role) -> Result<bool, Self::Error>;

    /// Disconnects a remote client from the server.
    fn stop_remote_connection(
        &mut self,
        connection: ConnectionId,
        immediately: bool,
    ) -> Result<bool, Self::Error>;

    /// Current state of the local client or server.
    fn local_connection_state(&self, role: Role) -> LocalConnectionState;

    /// Current state of a remote client as seen by the server.
    fn remote_connection_state(&self, connection: ConnectionId) -> RemoteConnectionState;

    /// Largest payload for `channel`, headers already accounted for.
    fn mtu(&self, channel: ChannelKind) -> usize;

    /// Sets the address the client connects to.
    fn set_client_address(&mut self, address: &str);

    /// Sets the address the server binds to.
    fn set_server_bind_address(&mut self, address: &str, family: AddressFamily);

    /// Address the server binds to.
    fn server_bind_address(&self, family: AddressFamily) -> Option<String>;

    /// Sets the port to use.
    fn set_port(&mut self, port: u16);

    /// Port in use.
    fn port(&self) -> u16;

    /// Address of a remote connection, if the transport knows it.
    fn connection_address(&self, _connection: ConnectionId) -> Option<String> {
        None
    }

    /// Maximum number of clients, or `None` if the transport has no limit.
    fn maximum_clients(&self) -> Option<usize> {
        None
    }

    /// Sets the maximum number of clients. Transports without a limit ignore it.
    fn set_maximum_clients(&mut self, _value: usize) {}

    /// Connection timeout for `role`, or `None` if the transport has none.
    fn timeout(&self, _role: Role) -> Option<Duration> {
        None
    }
}

// ###################
// # UNIT TESTS      #
// ###################

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
    fn test_channel_kind_from_id() {
        assert_eq!(ChannelKind::try_from(0), Ok(ChannelKind::Reliable));
        assert_eq!(ChannelKind::try_from(1), Ok(ChannelKind::Unreliable));
        assert_eq!(
            ChannelKind::try_from(2),
            Err(LatencyError::InvalidChannel { channel_id: 2 })
        );
    }

    #[test]
    fn test_channel_kind_id_round_trips() {
        for kind in ChannelKind::ALL {
            assert_eq!(ChannelKind::try_from(kind.id()), Ok(kind));
        }
    }

    #[test]
    fn test_role_direction_mapping() {
        assert_eq!(Role::Client.outgoing_direction(), Direction::ClientToServer);
        assert_eq!(Role::Server.outgoing_direction(), Direction::ServerToClient);
        for role in Role::ALL {
            assert_eq!(role.outgoing_direction().sender(), role);
        }
    }

    #[test]
    fn test_destination_direction_and_target() {
        let to_server = Destination::Server;
        assert_eq!(to_server.direction(), Direction::ClientToServer);
        assert_eq!(to_server.target(), None);

        let to_client = Destination::Client(ConnectionId::new(9));
        assert_eq!(to_client.direction(), Direction::ServerToClient);
        assert_eq!(to_client.target(), Some(ConnectionId::new(9)));
    }

    #[test]
    fn test_connection_id_display() {
        assert_eq!(ConnectionId::new(42).to_string(), "42");
        assert_eq!(ConnectionId::default().as_u32(), 0);
    }

    #[test]
    fn test_display_names() {
        assert_eq!(ChannelKind::Reliable.to_string(), "reliable");
        assert_eq!(ChannelKind::Unreliable.to_string(), "unreliable");
        assert_eq!(Role::Client.to_string(), "client");
        assert_eq!(Role::Server.to_string(), "server");
    }
}
