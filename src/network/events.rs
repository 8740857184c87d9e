//! Events reported by a [`Transport`](crate::Transport) when polled.

use serde::{Deserialize, Serialize};

use crate::{ChannelKind, ConnectionId, Role};

/// State of the local client or server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LocalConnectionState {
    /// Not running.
    #[default]
    Stopped,
    /// Starting up.
    Starting,
    /// Running.
    Started,
    /// Shutting down.
    Stopping,
}

/// State of a remote client as seen by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RemoteConnectionState {
    /// Disconnected.
    #[default]
    Stopped,
    /// Connected.
    Started,
}

/// IP family for the server bind address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressFamily {
    /// IPv4.
    Ipv4,
    /// IPv6.
    Ipv6,
}

/// Something the transport observed since it was last polled.
///
/// Received payloads are owned copies; the transport is free to reuse its
/// buffers once the events have been returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportEvent {
    /// The local client changed state.
    ClientConnectionState(LocalConnectionState),
    /// The local server changed state.
    ServerConnectionState(LocalConnectionState),
    /// A remote client connected or disconnected.
    RemoteConnectionState {
        /// The remote client.
        connection: ConnectionId,
        /// Its new state.
        state: RemoteConnectionState,
    },
    /// The local client received data from the server.
    ClientReceivedData {
        /// Channel the data arrived on.
        channel: ChannelKind,
        /// The received bytes.
        payload: Vec<u8>,
    },
    /// The local server received data from a client.
    ServerReceivedData {
        /// Channel the data arrived on.
        channel: ChannelKind,
        /// The received bytes.
        payload: Vec<u8>,
        /// The client that sent it.
        connection: ConnectionId,
    },
}

impl TransportEvent {
    /// For data events, the role that received the data and its size.
    #[must_use]
    pub fn received(&self) -> Option<(Role, usize)> {
        match self {
            Self::ClientReceivedData { payload, .. } => Some((Role::Client, payload.len())),
            Self::ServerReceivedData { payload, .. } => Some((Role::Server, payload.len())),
            _ => None,
        }
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
    fn test_received_reports_role_and_size() {
        let client = TransportEvent::ClientReceivedData {
            channel: ChannelKind::Reliable,
            payload: vec![0; 12],
        };
        let server = TransportEvent::ServerReceivedData {
            channel: ChannelKind::Unreliable,
            payload: vec![0; 3],
            connection: ConnectionId::new(4),
        };
        assert_eq!(client.received(), Some((Role::Client, 12)));
        assert_eq!(server.received(), Some((Role::Server, 3)));
    }

    #[test]
    fn test_state_events_are_not_data() {
        let events = [
            TransportEvent::ClientConnectionState(LocalConnectionState::Started),
            TransportEvent::ServerConnectionState(LocalConnectionState::Stopping),
            TransportEvent::RemoteConnectionState {
                connection: ConnectionId::new(1),
                state: RemoteConnectionState::Started,
            },
        ];
        assert!(events.iter().all(|event| event.received().is_none()));
    }

    #[test]
    fn test_default_states_are_stopped() {
        assert_eq!(LocalConnectionState::default(), LocalConnectionState::Stopped);
        assert_eq!(RemoteConnectionState::default(), RemoteConnectionState::Stopped);
    }
}
