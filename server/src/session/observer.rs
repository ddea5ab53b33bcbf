//! Observer hooks for session lifecycle events

use tracing::debug;
use trackgate_shared::Packet;

/// Capability handed to every session at construction
///
/// Call points: `on_connect` right after the session is registered,
/// `on_packet` after each decoded frame has been routed, and
/// `on_disconnect` during teardown, before the registry entry is removed.
/// Hooks run on the session task and must not block.
pub trait SessionObserver: Send + Sync {
    fn on_connect(&self, _imei: &str) {}

    fn on_packet(&self, _imei: &str, _packet: &Packet) {}

    fn on_disconnect(&self, _imei: &str) {}
}

/// Observer that only emits debug logs
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl SessionObserver for TracingObserver {
    fn on_connect(&self, imei: &str) {
        debug!("[{}]: session active", imei);
    }

    fn on_packet(&self, imei: &str, packet: &Packet) {
        debug!(
            "[{}]: {:?} packet, {} records, {} messages",
            imei,
            packet.codec_id,
            packet.data.len(),
            packet.messages.len()
        );
    }

    fn on_disconnect(&self, imei: &str) {
        debug!("[{}]: session closing", imei);
    }
}
