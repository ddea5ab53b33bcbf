//! Connection manager with a persistent gateway connection and automatic reconnection

use crate::command::CommandResponder;
use crate::track::TrackGenerator;
use anyhow::{anyhow, bail, Result};
use bytes::{Buf, BytesMut};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::debug;
use trackgate_shared::{
    codec, now_ms, protocol::HANDSHAKE_ACK, DecodeConfig, MessageKind, Packet,
};

/// Events emitted by the connection manager
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Handshake accepted by the gateway
    Connected { server: String },
    /// Connection lost after it was established
    Disconnected { reason: String },
    /// Connect or handshake attempt failed
    ConnectionFailed { reason: String },
    /// Gateway acknowledged a telemetry packet
    TelemetryAcked { count: u32 },
    /// A command arrived and was answered
    CommandAnswered { command: String, reply: String },
}

/// Configuration for the connection manager
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// IMEI presented in the handshake
    pub imei: String,
    /// Gateway TCP address
    pub server: String,
    /// Period between telemetry packets
    pub report_interval: Duration,
    /// Centre of the synthetic track
    pub home: (f64, f64),
    /// Reconnection delay (initial)
    pub reconnect_delay: Duration,
    /// Maximum reconnection delay
    pub max_reconnect_delay: Duration,
    /// Connection and handshake timeout
    pub connect_timeout: Duration,
    /// Read timeout
    pub read_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            imei: "352093086403655".into(),
            server: "127.0.0.1:8080".into(),
            report_interval: Duration::from_secs(10),
            home: (54.6872, 25.2797),
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(60),
        }
    }
}

/// Keeps one emulated tracker connected to the gateway
pub struct ConnectionManager {
    config: ConnectionConfig,
    event_rx: mpsc::Receiver<ConnectionEvent>,
}

impl ConnectionManager {
    /// Create a new connection manager and start the connection loop
    pub fn new(config: ConnectionConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel::<ConnectionEvent>(100);

        let config_clone = config.clone();
        tokio::spawn(async move {
            connection_loop(config_clone, event_tx).await;
        });

        Self { config, event_rx }
    }

    /// Receive the next connection event
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        self.event_rx.recv().await
    }

    pub fn imei(&self) -> &str {
        &self.config.imei
    }
}

/// Main connection loop with reconnection logic
async fn connection_loop(config: ConnectionConfig, event_tx: mpsc::Sender<ConnectionEvent>) {
    let mut reconnect_delay = config.reconnect_delay;
    let mut track = TrackGenerator::new(config.home.0, config.home.1);
    let responder = CommandResponder::new(config.imei.clone());

    loop {
        match connect(&config).await {
            Ok(stream) => {
                reconnect_delay = config.reconnect_delay;

                let _ = event_tx
                    .send(ConnectionEvent::Connected {
                        server: config.server.clone(),
                    })
                    .await;

                if let Err(reason) =
                    handle_connection(stream, &config, &mut track, &responder, &event_tx).await
                {
                    let _ = event_tx
                        .send(ConnectionEvent::Disconnected {
                            reason: reason.to_string(),
                        })
                        .await;
                }
            }
            Err(reason) => {
                let _ = event_tx
                    .send(ConnectionEvent::ConnectionFailed {
                        reason: reason.to_string(),
                    })
                    .await;
            }
        }

        if event_tx.is_closed() {
            return;
        }

        // Wait before reconnecting
        tokio::time::sleep(reconnect_delay).await;

        // Exponential backoff
        reconnect_delay = std::cmp::min(reconnect_delay * 2, config.max_reconnect_delay);
    }
}

/// Open the TCP connection and complete the identity handshake
async fn connect(config: &ConnectionConfig) -> Result<TcpStream> {
    let mut stream = timeout(config.connect_timeout, TcpStream::connect(&config.server))
        .await
        .map_err(|_| anyhow!("connect timeout"))??;

    let mut hello = (config.imei.len() as u16).to_be_bytes().to_vec();
    hello.extend_from_slice(config.imei.as_bytes());
    stream.write_all(&hello).await?;

    let mut ack = [0u8; 1];
    timeout(config.connect_timeout, stream.read_exact(&mut ack))
        .await
        .map_err(|_| anyhow!("handshake timeout"))??;
    if ack[0] != HANDSHAKE_ACK {
        bail!("handshake rejected ({:#04x})", ack[0]);
    }

    Ok(stream)
}

/// What the gateway can send to a tracker
#[derive(Debug, Clone, PartialEq)]
enum Inbound {
    /// 4-byte record count acknowledging a telemetry packet
    Ack(u32),
    Packet(Packet),
}

/// Pull the next complete item out of `buf`
///
/// A count ack is only expected while telemetry is outstanding. It cannot be
/// mistaken for a frame because a frame always starts with a zero preamble
/// and a count ack never does.
fn next_inbound(buf: &mut BytesMut, pending_acks: &mut VecDeque<u32>) -> Result<Option<Inbound>> {
    if let Some(&expected) = pending_acks.front() {
        if buf.len() < 4 {
            return Ok(None);
        }
        let count = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if count != 0 {
            buf.advance(4);
            pending_acks.pop_front();
            if count != expected {
                bail!("gateway acked {} records, sent {}", count, expected);
            }
            return Ok(Some(Inbound::Ack(count)));
        }
    }

    match codec::decode(buf, DecodeConfig::default())? {
        Some(decoded) => Ok(Some(Inbound::Packet(decoded.packet))),
        None => Ok(None),
    }
}

/// Handle an active connection
async fn handle_connection(
    stream: TcpStream,
    config: &ConnectionConfig,
    track: &mut TrackGenerator,
    responder: &CommandResponder,
    event_tx: &mpsc::Sender<ConnectionEvent>,
) -> Result<()> {
    let (mut reader, mut writer) = stream.into_split();

    let mut buf = BytesMut::with_capacity(4096);
    let mut read_buf = vec![0u8; 4096];
    let mut pending_acks = VecDeque::new();

    let mut report_interval = interval(config.report_interval);
    report_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            // Send telemetry
            _ = report_interval.tick() => {
                let record = track.next_record(now_ms());
                let encoded = codec::encode_packet(&Packet::telemetry(vec![record]))?;
                writer.write_all(&encoded).await?;
                pending_acks.push_back(1);
            }

            // Read incoming data
            result = timeout(config.read_timeout, reader.read(&mut read_buf)) => {
                match result {
                    Ok(Ok(0)) => {
                        return Err(anyhow!("server closed connection"));
                    }
                    Ok(Ok(n)) => {
                        buf.extend_from_slice(&read_buf[..n]);

                        while let Some(inbound) = next_inbound(&mut buf, &mut pending_acks)? {
                            match inbound {
                                Inbound::Ack(count) => {
                                    let _ = event_tx.send(ConnectionEvent::TelemetryAcked { count }).await;
                                }
                                Inbound::Packet(packet) => {
                                    for message in packet.messages.iter().filter(|m| m.kind == MessageKind::Command) {
                                        let reply = responder.respond(&message.text, track.last());
                                        let encoded = codec::encode_packet(&Packet::response(reply.clone()))?;
                                        writer.write_all(&encoded).await?;
                                        let _ = event_tx
                                            .send(ConnectionEvent::CommandAnswered {
                                                command: message.text.clone(),
                                                reply,
                                            })
                                            .await;
                                    }
                                }
                            }
                        }
                    }
                    Ok(Err(e)) => {
                        return Err(anyhow!("read error: {}", e));
                    }
                    Err(_) => {
                        debug!("no data from gateway for {:?}", config.read_timeout);
                    }
                }
            }
        }
    }
}
