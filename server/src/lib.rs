//! Teltonika tracker gateway
//!
//! Trackers connect over TCP, identify themselves by IMEI and stream AVL
//! telemetry that is forwarded to a webhook. Operators reach a tracker
//! through the HTTP API, which sends a Codec 12 command and waits for the
//! tracker's reply.

pub mod command;
pub mod config;
pub mod error;
pub mod gateway;
pub mod http;
pub mod session;
pub mod telemetry;

#[cfg(test)]
mod test_helpers;
