//! Command / reply correlation for the HTTP side
//!
//! This module handles:
//! - One reply slot per tracker, so at most one command is in flight per IMEI
//! - Handing a device-originated message to the command waiting on it
//! - Bounding that wait with a timeout

mod correlator;

pub use correlator::{Reply, ReplyCorrelator, ReplySlot};
