//! Common test infrastructure shared across integration tests.
//!
//! This module provides:
//! - `stubs`: an in-memory [`RecordingTransport`](stubs::RecordingTransport)
//! - `test_utils`: log capture, clock and config helpers
//!
//! # Usage
//!
//! ```ignore
//! #[path = "common/mod.rs"]
//! mod common;
//! use common::{init_tracing, RecordingTransport};
//! ```

pub mod stubs;

#[allow(unused_imports)]
pub use stubs::{RecordingTransport, SentPacket, TransportFailure};
#[allow(unused_imports)]
pub use test_utils::{init_tracing, manual_transport, payload_tags, seeded_config};
