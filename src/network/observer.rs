//! Listeners for transport events forwarded by
//! [`LatencyTransport`](crate::LatencyTransport).
//!
//! Observers are registered with
//! [`LatencyTransport::subscribe`](crate::LatencyTransport::subscribe) and
//! receive every event returned by
//! [`tick_incoming`](crate::LatencyTransport::tick_incoming). Registrations are
//! explicit: the returned [`SubscriptionId`] removes the observer again, and
//! shutdown removes all of them.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::{MaybeSendSync, TransportEvent};

/// Receives transport events.
///
/// With the `sync-send` feature observers must be `Send + Sync`.
///
/// ```
/// use latency_transport::{TransportEvent, TransportObserver};
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// #[derive(Default)]
/// struct DataCounter(AtomicUsize);
///
/// impl TransportObserver for DataCounter {
///     fn on_event(&self, event: &TransportEvent) {
///         if event.received().is_some() {
///             self.0.fetch_add(1, Ordering::Relaxed);
///         }
///     }
/// }
/// ```
pub trait TransportObserver: MaybeSendSync {
    /// Called once per event, in the order the transport reported them.
    fn on_event(&self, event: &TransportEvent);
}

/// Handle returned by a subscription, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subscription#{}", self.0)
    }
}

/// Logs every event through `tracing`.
///
/// Data events are logged at `trace` level with their size; connection state
/// changes at `debug`.
#[derive(Debug, Default, Clone)]
pub struct TracingObserver;

impl TracingObserver {
    /// Creates a new tracing observer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl TransportObserver for TracingObserver {
    fn on_event(&self, event: &TransportEvent) {
        match event {
            TransportEvent::ClientReceivedData { channel, payload } => {
                trace!(role = "client", %channel, len = payload.len(), "data received");
            },
            TransportEvent::ServerReceivedData {
                channel,
                payload,
                connection,
            } => {
                trace!(
                    role = "server",
                    %channel,
                    %connection,
                    len = payload.len(),
                    "data received"
                );
            },
            TransportEvent::ClientConnectionState(state) => {
                debug!(role = "client", ?state, "local connection state changed");
            },
            TransportEvent::ServerConnectionState(state) => {
                debug!(role = "server", ?state, "local connection state changed");
            },
            TransportEvent::RemoteConnectionState { connection, state } => {
                debug!(%connection, ?state, "remote connection state changed");
            },
        }
    }
}

/// Stores every event it sees. Intended for tests.
///
/// ```
/// use latency_transport::{
///     CollectingObserver, LocalConnectionState, TransportEvent, TransportObserver,
/// };
///
/// let observer = CollectingObserver::new();
/// observer.on_event(&TransportEvent::ClientConnectionState(LocalConnectionState::Started));
/// assert_eq!(observer.len(), 1);
/// observer.clear();
/// assert!(observer.is_empty());
/// ```
#[derive(Debug, Default)]
pub struct CollectingObserver {
    events: Mutex<Vec<TransportEvent>>,
}

impl CollectingObserver {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    /// A copy of the events seen so far.
    #[must_use]
    pub fn events(&self) -> Vec<TransportEvent> {
        self.events.lock().clone()
    }

    /// Number of events seen.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether no events have been seen.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Number of data events seen.
    #[must_use]
    pub fn data_events(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| event.received().is_some())
            .count()
    }

    /// Forgets all events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl TransportObserver for CollectingObserver {
    fn on_event(&self, event: &TransportEvent) {
        self.events.lock().push(event.clone());
    }
}

/// The set of subscribed observers.
#[derive(Default)]
pub(crate) struct ObserverRegistry {
    next_id: u64,
    observers: Vec<(SubscriptionId, Arc<dyn TransportObserver>)>,
}

impl ObserverRegistry {
    pub(crate) fn subscribe(&mut self, observer: Arc<dyn TransportObserver>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.observers.push((id, observer));
        debug!(%id, observers = self.observers.len(), "observer subscribed");
        id
    }

    pub(crate) fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(existing, _)| *existing != id);
        let removed = self.observers.len() != before;
        if removed {
            debug!(%id, observers = self.observers.len(), "observer unsubscribed");
        }
        removed
    }

    /// Removes every observer and returns how many there were.
    pub(crate) fn clear(&mut self) -> usize {
        let removed = self.observers.len();
        self.observers.clear();
        removed
    }

    pub(crate) fn len(&self) -> usize {
        self.observers.len()
    }

    pub(crate) fn notify(&self, event: &TransportEvent) {
        for (_, observer) in &self.observers {
            observer.on_event(event);
        }
    }
}

impl fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("num_observers", &self.observers.len())
            .field("next_id", &self.next_id)
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
    use crate::{ChannelKind, ConnectionId, LocalConnectionState};

    fn data_event() -> TransportEvent {
        TransportEvent::ServerReceivedData {
            channel: ChannelKind::Unreliable,
            payload: vec![1, 2, 3],
            connection: ConnectionId::new(9),
        }
    }

    #[test]
    fn test_subscribed_observers_receive_events() {
        let mut registry = ObserverRegistry::default();
        let first = Arc::new(CollectingObserver::new());
        let second = Arc::new(CollectingObserver::new());
        registry.subscribe(first.clone());
        registry.subscribe(second.clone());

        registry.notify(&data_event());
        assert_eq!(first.events(), vec![data_event()]);
        assert_eq!(second.data_events(), 1);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let mut registry = ObserverRegistry::default();
        let observer = Arc::new(CollectingObserver::new());
        let id = registry.subscribe(observer.clone());

        assert!(registry.unsubscribe(id));
        assert!(!registry.unsubscribe(id));
        registry.notify(&data_event());
        assert!(observer.is_empty());
    }

    #[test]
    fn test_ids_are_not_reused() {
        let mut registry = ObserverRegistry::default();
        let a = registry.subscribe(Arc::new(TracingObserver::new()));
        registry.unsubscribe(a);
        let b = registry.subscribe(Arc::new(TracingObserver::new()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_clear_removes_all() {
        let mut registry = ObserverRegistry::default();
        registry.subscribe(Arc::new(TracingObserver::new()));
        registry.subscribe(Arc::new(CollectingObserver::new()));
        assert_eq!(registry.clear(), 2);
        assert_eq!(registry.len(), 0);
        assert_eq!(registry.clear(), 0);
    }

    #[test]
    fn test_tracing_observer_handles_every_event() {
        let observer = TracingObserver::new();
        observer.on_event(&data_event());
        observer.on_event(&TransportEvent::ClientConnectionState(LocalConnectionState::Stopping));
    }

    #[test]
    fn test_collecting_observer_counts_only_data() {
        let observer = CollectingObserver::new();
        observer.on_event(&data_event());
        observer.on_event(&TransportEvent::ServerConnectionState(LocalConnectionState::Started));
        assert_eq!(observer.len(), 2);
        assert_eq!(observer.data_events(), 1);
    }
}
