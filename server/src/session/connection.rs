//! Individual tracker session handling

use super::handshake::{self, read_some};
use super::observer::SessionObserver;
use super::registry::SessionRegistry;
use crate::command::ReplyCorrelator;
use crate::config::GatewayConfig;
use crate::error::{SendError, SessionError};
use crate::telemetry::TelemetryDispatcher;
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use trackgate_shared::{codec, protocol::HANDSHAKE_ACK, Decoded, FrameDecoder, Packet};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Handle to send frames to a specific tracker
#[derive(Clone, Debug)]
pub struct SessionHandle {
    /// Unique per accepted connection, distinguishes reconnects of one IMEI
    pub id: u64,
    pub imei: String,
    pub addr: SocketAddr,
    pub connected_at: Instant,
    writer: Arc<Mutex<OwnedWriteHalf>>,
}

impl SessionHandle {
    fn new(imei: String, addr: SocketAddr, writer: Arc<Mutex<OwnedWriteHalf>>) -> Self {
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            imei,
            addr,
            connected_at: Instant::now(),
            writer,
        }
    }

    /// Encode a packet and write it to this tracker
    pub async fn send(&self, packet: &Packet) -> Result<(), SendError> {
        let encoded = codec::encode_packet(packet)?;
        self.write(&encoded).await?;
        Ok(())
    }

    /// Write raw bytes to this tracker
    pub async fn write(&self, bytes: &[u8]) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await
    }
}

/// Collaborators every session is constructed with
#[derive(Clone)]
pub struct SessionContext {
    pub config: Arc<GatewayConfig>,
    pub registry: Arc<SessionRegistry>,
    pub correlator: Arc<ReplyCorrelator>,
    /// `None` disables telemetry forwarding
    pub telemetry: Option<TelemetryDispatcher>,
    pub observer: Arc<dyn SessionObserver>,
}

/// One accepted tracker connection
///
/// The session starts out handshaking, becomes active once the IMEI is
/// registered and acknowledged, and is torn down exactly once when
/// [`DeviceSession::run`] returns, whichever step failed.
pub struct DeviceSession {
    addr: SocketAddr,
    reader: OwnedReadHalf,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    ctx: SessionContext,
    /// Set once the handshake completes
    handle: Option<SessionHandle>,
}

impl DeviceSession {
    /// Create a new session from an accepted TCP stream
    pub fn new(stream: TcpStream, addr: SocketAddr, ctx: SessionContext) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            addr,
            reader,
            writer: Arc::new(Mutex::new(writer)),
            ctx,
            handle: None,
        }
    }

    /// Drive the session to completion
    pub async fn run(mut self) {
        info!("[{}]: connected", self.addr);
        let result = self.drive().await;
        self.teardown(result).await;
    }

    async fn drive(&mut self) -> Result<(), SessionError> {
        let config = self.ctx.config.clone();
        let (imei, leftover) =
            handshake::read_identity(&mut self.reader, config.handshake_chunk, config.idle_timeout)
                .await?;

        let handle = SessionHandle::new(imei, self.addr, self.writer.clone());
        if let Some(previous) = self.ctx.registry.register(handle.clone()).await {
            warn!(
                "[{}]: replaces session from {} (still open until it times out)",
                handle.imei, previous.addr
            );
        }
        self.handle = Some(handle.clone());
        self.ctx.observer.on_connect(&handle.imei);
        info!("[{}]: imei - {}", self.addr, handle.imei);

        handle.write(&[HANDSHAKE_ACK]).await?;

        self.serve(&handle, leftover).await
    }

    /// Frame loop: decode, acknowledge, route, repeat until the connection fails
    async fn serve(&mut self, handle: &SessionHandle, leftover: BytesMut) -> Result<(), SessionError> {
        let config = self.ctx.config.clone();
        let mut decoder = FrameDecoder::new(config.decode);
        decoder.extend(&leftover);
        let mut read_buf = vec![0u8; config.read_chunk];

        loop {
            let decoded = match decoder.decode_next()? {
                Some(decoded) => decoded,
                None => {
                    let n = read_some(&mut self.reader, &mut read_buf, config.idle_timeout).await?;
                    if n == 0 {
                        return match decoder.buffer_len() {
                            0 => Ok(()),
                            partial => Err(SessionError::Truncated(partial)),
                        };
                    }
                    decoder.extend(&read_buf[..n]);
                    continue;
                }
            };

            if let Some(response) = &decoded.response {
                handle.write(response).await?;
            }

            self.route(&handle.imei, decoded);
        }
    }

    fn route(&self, imei: &str, decoded: Decoded) {
        info!("[{}]: message: {}", imei, hex::encode(&decoded.frame));
        match serde_json::to_string(&decoded.packet) {
            Ok(json) => info!("[{}]: decoded: {}", imei, json),
            Err(e) => error!("[{}]: decoder result marshaling error ({})", imei, e),
        }

        let packet = decoded.packet;

        if let Some(message) = packet.first_message() {
            if !self.ctx.correlator.deliver(imei, message.clone()) {
                debug!("[{}]: no command waiting, message dropped", imei);
            }
        }

        if packet.has_telemetry() {
            if let Some(telemetry) = &self.ctx.telemetry {
                telemetry.dispatch(imei, &packet);
            }
        }

        self.ctx.observer.on_packet(imei, &packet);
    }

    async fn teardown(self, result: Result<(), SessionError>) {
        let label = match &self.handle {
            Some(handle) => handle.imei.clone(),
            None => self.addr.to_string(),
        };

        if let Err(e) = &result {
            error!("[{}]: {}", label, e);
        }

        if let Some(handle) = &self.handle {
            self.ctx.observer.on_disconnect(&handle.imei);
            self.ctx
                .registry
                .unregister_session(&handle.imei, handle.id)
                .await;
        }

        if let Err(e) = self.writer.lock().await.shutdown().await {
            debug!("[{}]: connection close error ({})", self.addr, e);
        }

        info!("[{}]: disconnected", label);
    }
}

/// Build a handle backed by a real loopback socket; the peer end is returned
/// so the connection stays open for the duration of the test.
#[cfg(test)]
pub(crate) async fn test_handle(imei: &str) -> (SessionHandle, TcpStream) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
    let (stream, peer) = accepted.unwrap();
    let (_reader, writer) = stream.into_split();
    let handle = SessionHandle::new(imei.to_string(), peer, Arc::new(Mutex::new(writer)));
    (handle, client.unwrap())
}
