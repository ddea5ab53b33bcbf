//! Codec 12 command handling for the emulated tracker
//!
//! This module handles:
//! - Answering the SMS/GPRS commands operators send through the gateway
//! - Reporting firmware, position and uptime the way a real unit does

mod responder;

pub use responder::{CommandResponder, UNKNOWN_COMMAND};
