mod command;
mod connection;
mod track;

use clap::Parser;
use connection::{ConnectionConfig, ConnectionEvent, ConnectionManager};
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Emulates a Teltonika tracker talking to a trackgate server
#[derive(Debug, Parser)]
#[command(name = "tracker-sim", version)]
struct Args {
    /// Gateway TCP address
    #[arg(long, default_value = "127.0.0.1:8080")]
    server: String,

    /// IMEI presented in the handshake
    #[arg(long, default_value = "352093086403655")]
    imei: String,

    /// Milliseconds between telemetry packets
    #[arg(long, default_value_t = 10_000, value_parser = clap::value_parser!(u64).range(1..))]
    interval_ms: u64,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();
    let config = ConnectionConfig {
        imei: args.imei,
        server: args.server,
        report_interval: Duration::from_millis(args.interval_ms),
        ..Default::default()
    };

    info!("Tracker emulator starting: {}", config.imei);
    info!("  gateway: {}", config.server);

    let mut conn = ConnectionManager::new(config);

    loop {
        match conn.recv().await {
            Some(ConnectionEvent::Connected { server }) => {
                info!("[{}]: connected to {}", conn.imei(), server);
            }
            Some(ConnectionEvent::Disconnected { reason }) => {
                warn!("[{}]: disconnected ({})", conn.imei(), reason);
            }
            Some(ConnectionEvent::ConnectionFailed { reason }) => {
                error!("[{}]: connection failed ({})", conn.imei(), reason);
            }
            Some(ConnectionEvent::TelemetryAcked { count }) => {
                info!("[{}]: gateway acked {} records", conn.imei(), count);
            }
            Some(ConnectionEvent::CommandAnswered { command, reply }) => {
                info!("[{}]: command '{}' -> '{}'", conn.imei(), command, reply);
            }
            None => {
                error!("Connection manager closed");
                break;
            }
        }
    }
}
