//! Telemetry forwarding to the output webhook
//!
//! Delivery is best-effort and at most once: each packet becomes one
//! detached POST, failures are logged and forgotten, and the session that
//! produced the packet never waits on the webhook.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use trackgate_shared::Packet;

const HOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// JSON document posted to the webhook
#[derive(Debug, Clone, Serialize)]
pub struct HookDocument {
    pub deveui: String,
    pub time: String,
    pub frames: HookFrames,
}

#[derive(Debug, Clone, Serialize)]
pub struct HookFrames {
    pub gps: Vec<GpsFrame>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GpsFrame {
    /// Unix seconds, truncated from the device's millisecond timestamp
    pub timestamp: u64,
    pub lat: f64,
    pub lon: f64,
}

/// Build the webhook document for a packet
///
/// Returns `None` when the packet carries no AVL records.
pub fn build_document(imei: &str, packet: &Packet) -> Option<HookDocument> {
    if !packet.has_telemetry() {
        return None;
    }

    let gps = packet
        .data
        .iter()
        .map(|record| GpsFrame {
            timestamp: record.timestamp_ms / 1000,
            lat: record.lat,
            lon: record.lon,
        })
        .collect();

    Some(HookDocument {
        deveui: imei.to_string(),
        time: chrono::Local::now().to_string(),
        frames: HookFrames { gps },
    })
}

/// Fire-and-forget forwarder of telemetry packets
#[derive(Clone)]
pub struct TelemetryDispatcher {
    client: reqwest::Client,
    url: Arc<str>,
}

impl TelemetryDispatcher {
    pub fn new(url: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(HOOK_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: Arc::from(url),
        })
    }

    /// Post the packet's GPS frames to the webhook on a detached task
    ///
    /// Must be called from within a Tokio runtime.
    pub fn dispatch(&self, imei: &str, packet: &Packet) {
        let Some(document) = build_document(imei, packet) else {
            return;
        };

        let client = self.client.clone();
        let url = self.url.clone();
        tokio::spawn(async move {
            match client.post(&*url).json(&document).send().await {
                Ok(res) => info!("packet sent to output hook, status: {}", res.status()),
                Err(e) => error!("http post error ({})", e),
            }
        });
    }
}
