//! Gateway configuration

use clap::Parser;
use std::time::Duration;
use trackgate_shared::DecodeConfig;

/// Command line arguments for the `trackgate` binary
#[derive(Debug, Clone, Parser)]
#[command(name = "trackgate", version, about = "Teltonika tracker gateway with an HTTP command API")]
pub struct Args {
    /// TCP server address trackers connect to
    #[arg(long, env = "TRACKGATE_ADDRESS", default_value = "0.0.0.0:8080")]
    pub address: String,

    /// HTTP server address
    #[arg(long, env = "TRACKGATE_HTTP", default_value = "0.0.0.0:8081")]
    pub http: String,

    /// Webhook that receives telemetry (empty disables forwarding)
    #[arg(long, env = "TRACKGATE_HOOK", default_value = "http://localhost:5000/api/v1/metric")]
    pub hook: String,

    /// Close tracker connections that stay silent this long
    #[arg(long, default_value_t = 900)]
    pub idle_timeout_secs: u64,

    /// How long a command waits for the tracker's reply
    #[arg(long, default_value_t = 90)]
    pub reply_timeout_secs: u64,
}

impl Args {
    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            reply_timeout: Duration::from_secs(self.reply_timeout_secs),
            ..Default::default()
        }
    }
}

/// Runtime tunables shared by the TCP and HTTP sides
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Read deadline refreshed before every socket read
    pub idle_timeout: Duration,
    /// How long a command handler waits for the device reply
    pub reply_timeout: Duration,
    /// Retry delay while another command holds a device's reply slot
    pub acquire_poll_interval: Duration,
    /// Command bodies are cut to this many bytes
    pub max_command_len: usize,
    /// Read size for the handshake
    pub handshake_chunk: usize,
    /// Read size for the frame loop
    pub read_chunk: usize,
    pub decode: DecodeConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(15 * 60),
            reply_timeout: Duration::from_secs(90),
            acquire_poll_interval: Duration::from_millis(100),
            max_command_len: 512,
            handshake_chunk: 100,
            read_chunk: 1300,
            decode: DecodeConfig::default(),
        }
    }
}
