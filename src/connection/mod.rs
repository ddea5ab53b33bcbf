//! Connection management for the emulated tracker
//!
//! This module handles:
//! - The TCP connection to the gateway with automatic reconnection
//! - The IMEI handshake
//! - Periodic telemetry with count-ack checking
//! - Answering Codec 12 commands

mod manager;

pub use manager::{ConnectionConfig, ConnectionEvent, ConnectionManager};
