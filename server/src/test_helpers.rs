//! Shared fixtures for gateway tests

use crate::command::ReplyCorrelator;
use crate::config::GatewayConfig;
use crate::gateway::TcpGateway;
use crate::session::{SessionContext, SessionObserver, SessionRegistry};
use crate::telemetry::TelemetryDispatcher;
use axum::{extract::State, routing::post, Json, Router};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use trackgate_shared::{protocol::HANDSHAKE_ACK, DecodeConfig, FrameDecoder, Packet};

/// Observer that records every hook call as a short string
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// Poll until `event` has been recorded
    pub async fn wait_for(&self, event: &str) {
        for _ in 0..200 {
            if self.events().iter().any(|e| e == event) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("event {:?} not recorded, got {:?}", event, self.events());
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl SessionObserver for RecordingObserver {
    fn on_connect(&self, imei: &str) {
        self.push(format!("connect {imei}"));
    }

    fn on_packet(&self, imei: &str, packet: &Packet) {
        self.push(format!("packet {imei} {:?}", packet.codec_id));
    }

    fn on_disconnect(&self, imei: &str) {
        self.push(format!("disconnect {imei}"));
    }
}

/// Defaults with timeouts short enough for tests
pub fn test_config() -> GatewayConfig {
    GatewayConfig {
        idle_timeout: Duration::from_secs(5),
        reply_timeout: Duration::from_secs(2),
        acquire_poll_interval: Duration::from_millis(10),
        ..Default::default()
    }
}

pub struct TestGateway {
    pub addr: SocketAddr,
    pub gateway: Arc<TcpGateway>,
    pub ctx: SessionContext,
    pub observer: Arc<RecordingObserver>,
}

/// Bind a gateway on a loopback port and start accepting
pub async fn spawn_gateway(config: GatewayConfig) -> TestGateway {
    spawn_gateway_with_hook(config, None).await
}

/// Same as [`spawn_gateway`], forwarding telemetry to `hook` when given
pub async fn spawn_gateway_with_hook(config: GatewayConfig, hook: Option<&str>) -> TestGateway {
    let observer = Arc::new(RecordingObserver::default());
    let ctx = SessionContext {
        correlator: Arc::new(ReplyCorrelator::new(config.acquire_poll_interval)),
        config: Arc::new(config),
        registry: Arc::new(SessionRegistry::new()),
        telemetry: hook.map(|url| TelemetryDispatcher::new(url).unwrap()),
        observer: observer.clone(),
    };

    let gateway = Arc::new(TcpGateway::bind("127.0.0.1:0", ctx.clone()).await.unwrap());
    let addr = gateway.local_addr().unwrap();

    let runner = gateway.clone();
    tokio::spawn(async move { runner.run().await });

    TestGateway {
        addr,
        gateway,
        ctx,
        observer,
    }
}

/// Connect as a tracker and complete the handshake
pub async fn connect_device(addr: SocketAddr, imei: &str) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let mut frame = (imei.len() as u16).to_be_bytes().to_vec();
    frame.extend_from_slice(imei.as_bytes());
    stream.write_all(&frame).await.unwrap();

    let mut ack = [0u8; 1];
    stream.read_exact(&mut ack).await.unwrap();
    assert_eq!(ack[0], HANDSHAKE_ACK);
    stream
}

/// Read one frame the gateway wrote to a device
pub async fn read_packet(stream: &mut TcpStream) -> Packet {
    let mut decoder = FrameDecoder::new(DecodeConfig::default());
    let mut buf = [0u8; 1300];
    loop {
        if let Some(decoded) = decoder.decode_next().unwrap() {
            return decoded.packet;
        }
        let n = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
            .await
            .expect("no frame from gateway")
            .unwrap();
        assert!(n > 0, "gateway closed the connection");
        decoder.extend(&buf[..n]);
    }
}

/// Poll until `imei` is (or is no longer) registered
pub async fn wait_for_registration(registry: &SessionRegistry, imei: &str, present: bool) {
    for _ in 0..200 {
        if registry.get(imei).await.is_some() == present {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{} registered = {} not reached", imei, present);
}

pub type HookBodies = mpsc::UnboundedReceiver<serde_json::Value>;

/// Local webhook on a fresh loopback port
pub async fn spawn_hook() -> (String, HookBodies) {
    serve_hook(TcpListener::bind("127.0.0.1:0").await.unwrap())
}

/// Serve a webhook on `listener` that forwards every POSTed body to a channel
pub fn serve_hook(listener: TcpListener) -> (String, HookBodies) {
    let (tx, rx) = mpsc::unbounded_channel();
    let app = Router::new()
        .route(
            "/api/v1/metric",
            post(
                |State(tx): State<mpsc::UnboundedSender<serde_json::Value>>,
                 Json(body): Json<serde_json::Value>| async move {
                    let _ = tx.send(body);
                },
            ),
        )
        .with_state(tx);

    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await });
    (format!("http://{}/api/v1/metric", addr), rx)
}

/// Next webhook body, failing if none arrives within two seconds
pub async fn next_hook_body(rx: &mut HookBodies) -> serde_json::Value {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("no webhook call")
        .unwrap()
}
