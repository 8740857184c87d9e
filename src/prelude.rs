//! Convenient re-exports for common usage.
//!
//! ```rust
//! use latency_transport::prelude::*;
//!
//! let config = SimulationConfig::poor_network();
//! assert!(config.validate().is_ok());
//! assert_eq!(Role::Client.outgoing_direction(), Direction::ClientToServer);
//! ```

pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::network::config::{RotationPolicy, SimulationConfig};
pub use crate::network::events::{
    AddressFamily, LocalConnectionState, RemoteConnectionState, TransportEvent,
};
pub use crate::network::latency_transport::LatencyTransport;
pub use crate::network::observer::{SubscriptionId, TransportObserver};
pub use crate::network::simulation::SubmitOutcome;
pub use crate::network::statistics::{format_bytes, StatisticsSnapshot};
pub use crate::{
    ChannelKind, ConnectionId, Destination, Direction, LatencyError, LatencyResult, Role,
    Transport,
};
