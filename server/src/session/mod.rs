//! Session management for connected trackers
//!
//! This module handles:
//! - The identity handshake that opens every connection
//! - The per-connection frame loop with idle eviction
//! - The registry of live sessions keyed by IMEI
//! - Observer hooks fired on connect, packet and disconnect

mod connection;
mod handshake;
mod observer;
mod registry;

pub use connection::{DeviceSession, SessionContext, SessionHandle};
pub use handshake::read_identity;
pub use observer::{SessionObserver, TracingObserver};
pub use registry::SessionRegistry;

#[cfg(test)]
pub(crate) use connection::test_handle;
