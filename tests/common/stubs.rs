//! In-memory transport that records everything the decorator hands it.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    dead_code
)]

use std::collections::{HashMap, VecDeque};
use std::fmt;

use latency_transport::prelude::*;

/// One payload delivered to the wrapped transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentPacket {
    pub channel: ChannelKind,
    pub destination: Destination,
    pub payload: Vec<u8>,
}

/// Error returned once the stub has been told to fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFailure(pub &'static str);

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport failure: {}", self.0)
    }
}

impl std::error::Error for TransportFailure {}

/// Transport stub that records sends, flushes and lifecycle calls.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    pub sent: Vec<SentPacket>,
    pub flushes: Vec<Role>,
    pub lifecycle: Vec<String>,
    pub incoming: HashMap<Role, VecDeque<TransportEvent>>,
    /// Sends succeed until this many packets have been recorded.
    pub send_limit: Option<usize>,
    pub fail_stop: bool,
    local_state: HashMap<Role, LocalConnectionState>,
    port: u16,
    client_address: String,
    bind_addresses: HashMap<AddressFamily, String>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an event to be returned by the next poll for `role`.
    pub fn push_incoming(&mut self, role: Role, event: TransportEvent) {
        self.incoming.entry(role).or_default().push_back(event);
    }

    pub fn sent_to(&self, destination: Destination) -> Vec<&SentPacket> {
        self.sent
            .iter()
            .filter(|packet| packet.destination == destination)
            .collect()
    }

    pub fn client_address(&self) -> &str {
        &self.client_address
    }

    fn record(
        &mut self,
        channel: ChannelKind,
        destination: Destination,
        payload: &[u8],
    ) -> Result<(), TransportFailure> {
        if self.send_limit.is_some_and(|limit| self.sent.len() >= limit) {
            return Err(TransportFailure("send limit reached"));
        }
        self.sent.push(SentPacket {
            channel,
            destination,
            payload: payload.to_vec(),
        });
        Ok(())
    }
}

impl Transport for RecordingTransport {
    type Error = TransportFailure;

    fn send_to_server(&mut self, channel: ChannelKind, payload: &[u8]) -> Result<(), Self::Error> {
        self.record(channel, Destination::Server, payload)
    }

    fn send_to_client(
        &mut self,
        channel: ChannelKind,
        payload: &[u8],
        connection: ConnectionId,
    ) -> Result<(), Self::Error> {
        self.record(channel, Destination::Client(connection), payload)
    }

    fn iterate_incoming(&mut self, role: Role) -> Result<Vec<TransportEvent>, Self::Error> {
        Ok(self
            .incoming
            .get_mut(&role)
            .map(|queue| queue.drain(..).collect())
            .unwrap_or_default())
    }

    fn iterate_outgoing(&mut self, role: Role) -> Result<(), Self::Error> {
        self.flushes.push(role);
        Ok(())
    }

    fn start_connection(&mut self, role: Role) -> Result<bool, Self::Error> {
        self.lifecycle.push(format!("start {role}"));
        self.local_state.insert(role, LocalConnectionState::Started);
        Ok(true)
    }

    fn stop_connection(&mut self, role: Role) -> Result<bool, Self::Error> {
        if self.fail_stop {
            return Err(TransportFailure("stop refused"));
        }
        self.lifecycle.push(format!("stop {role}"));
        let was_running = self.local_state.insert(role, LocalConnectionState::Stopped)
            == Some(LocalConnectionState::Started);
        Ok(was_running)
    }

    fn stop_remote_connection(
        &mut self,
        connection: ConnectionId,
        immediately: bool,
    ) -> Result<bool, Self::Error> {
        self.lifecycle
            .push(format!("kick {connection} immediately={immediately}"));
        Ok(true)
    }

    fn local_connection_state(&self, role: Role) -> LocalConnectionState {
        self.local_state.get(&role).copied().unwrap_or_default()
    }

    fn remote_connection_state(&self, _connection: ConnectionId) -> RemoteConnectionState {
        RemoteConnectionState::Started
    }

    fn mtu(&self, _channel: ChannelKind) -> usize {
        1200
    }

    fn set_client_address(&mut self, address: &str) {
        self.client_address = address.to_owned();
    }

    fn set_server_bind_address(&mut self, address: &str, family: AddressFamily) {
        self.bind_addresses.insert(family, address.to_owned());
    }

    fn server_bind_address(&self, family: AddressFamily) -> Option<String> {
        self.bind_addresses.get(&family).cloned()
    }

    fn set_port(&mut self, port: u16) {
        self.port = port;
    }

    fn port(&self) -> u16 {
        self.port
    }
}
