//! trackgate shared protocol types
//!
//! This crate provides the packet model and the Teltonika TCP frame codec
//! used by both the gateway server and the device emulator.

pub mod codec;
mod packet;

use std::time::{SystemTime, UNIX_EPOCH};

pub use codec::{CodecError, DecodeConfig, Decoded, FrameDecoder, IoAlloc};
pub use packet::{AvlRecord, CodecId, IoElement, Message, MessageKind, Packet, Priority};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Wire constants shared by both ends of a tracker connection
pub mod protocol {
    /// Byte the server writes back once it accepts a device identity
    pub const HANDSHAKE_ACK: u8 = 0x01;

    /// Size of the identity length prefix that opens every connection
    pub const IDENTITY_LEN_PREFIX: usize = 2;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ms_is_after_2020() {
        assert!(now_ms() > 1_577_836_800_000);
    }
}
