//! HTTP command API
//!
//! - `/cmd?imei=<imei>` (any method): body is the command text. Responds 200
//!   with the tracker's reply, 200 with a timeout notice when the tracker
//!   stays silent, or 400 with the send error.
//! - `GET /list-clients`: one `addr - imei` line per connected tracker.

use crate::command::{Reply, ReplyCorrelator};
use crate::config::GatewayConfig;
use crate::gateway::TrackerHub;
use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{any, get},
    Router,
};
use bytes::BytesMut;
use futures::StreamExt;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use trackgate_shared::Packet;

pub const REPLY_TIMEOUT_TEXT: &str = "tracker response timeout exceeded";

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<dyn TrackerHub>,
    pub correlator: Arc<ReplyCorrelator>,
    pub config: Arc<GatewayConfig>,
}

#[derive(Debug, Deserialize)]
pub struct CommandQuery {
    #[serde(default)]
    pub imei: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/cmd", any(send_command))
        .route("/list-clients", get(list_clients))
        .with_state(state)
}

/// Cut the body to `max_len` bytes and read it as trimmed text
fn command_text(body: &[u8], max_len: usize) -> String {
    let body = &body[..body.len().min(max_len)];
    String::from_utf8_lossy(body).trim().to_string()
}

/// Read at most `max_len` bytes of the request body; the rest is never pulled
async fn read_command(body: Body, max_len: usize) -> Result<String, axum::Error> {
    let mut stream = body.into_data_stream();
    let mut buf = BytesMut::with_capacity(max_len);

    while buf.len() < max_len {
        let Some(chunk) = stream.next().await else {
            break;
        };
        let chunk = chunk?;
        let take = chunk.len().min(max_len - buf.len());
        buf.extend_from_slice(&chunk[..take]);
    }

    Ok(command_text(&buf, max_len))
}

async fn send_command(
    State(state): State<AppState>,
    Query(query): Query<CommandQuery>,
    body: Body,
) -> impl IntoResponse {
    let text = match read_command(body, state.config.max_command_len).await {
        Ok(text) => text,
        Err(e) => {
            error!("[{}]: command body read error ({})", query.imei, e);
            return (StatusCode::BAD_REQUEST, e.to_string());
        }
    };
    let packet = Packet::command(text.clone());

    let mut slot = state.correlator.acquire(&query.imei).await;

    if let Err(e) = state.hub.send_packet(&query.imei, &packet).await {
        error!("[{}]: command '{}' not sent ({})", query.imei, text, e);
        return (StatusCode::BAD_REQUEST, e.to_string());
    }
    info!("command '{}' sent to '{}'", text, query.imei);

    match slot.wait(state.config.reply_timeout).await {
        Reply::Message(message) => (StatusCode::OK, message.text),
        Reply::TimedOut => {
            info!("[{}]: no reply to '{}'", query.imei, text);
            (StatusCode::OK, REPLY_TIMEOUT_TEXT.to_string())
        }
    }
}

async fn list_clients(State(state): State<AppState>) -> String {
    let mut sessions = state.hub.list_sessions().await;
    sessions.sort_by_key(|s| s.connected_at);

    sessions
        .iter()
        .map(|s| format!("{} - {}\n", s.addr, s.imei))
        .collect()
}

/// The HTTP listener with its router
pub struct HttpGateway {
    listener: TcpListener,
    app: Router,
}

impl HttpGateway {
    pub async fn bind(address: &str, state: AppState) -> Result<Self> {
        let listener = TcpListener::bind(address)
            .await
            .with_context(|| format!("http listener create error ({})", address))?;
        Ok(Self {
            listener,
            app: router(state),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(self) -> Result<()> {
        info!("http server listening at {}", self.local_addr()?);
        axum::serve(self.listener, self.app)
            .await
            .context("http server error")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::test_helpers::{connect_device, read_packet, spawn_gateway, test_config, TestGateway};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::time::{Duration, Instant};
    use tokio::io::AsyncWriteExt;
    use tower::ServiceExt;
    use trackgate_shared::codec::encode_packet;

    const IMEI: &str = "352093086403655";

    fn app(gw: &TestGateway) -> Router {
        router(AppState {
            hub: gw.gateway.clone(),
            correlator: gw.ctx.correlator.clone(),
            config: gw.ctx.config.clone(),
        })
    }

    async fn call(app: Router, request: Request<Body>) -> (StatusCode, String) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    fn command(imei: &str, text: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(format!("/cmd?imei={}", imei))
            .body(Body::from(text.to_string()))
            .unwrap()
    }

    #[test]
    fn test_command_text_truncated_and_trimmed() {
        assert_eq!(command_text(b"  getver\n", 512), "getver");
        assert_eq!(command_text(&[b'a'; 600], 512).len(), 512);
        assert_eq!(command_text(b"setdigout 1", 6), "setdig");
    }

    #[tokio::test]
    async fn test_unknown_imei_is_bad_request() {
        let gw = spawn_gateway(test_config()).await;

        let started = Instant::now();
        let (status, body) = call(app(&gw), command("000000000000000", "getver")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("not found"), "body: {body}");
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!gw.ctx.correlator.is_pending("000000000000000"));
    }

    #[tokio::test]
    async fn test_reply_is_returned_verbatim() {
        let gw = spawn_gateway(test_config()).await;
        let mut device = connect_device(gw.addr, IMEI).await;

        let request = tokio::spawn(call(app(&gw), command(IMEI, "getver")));

        let received = read_packet(&mut device).await;
        assert_eq!(received.messages[0].text, "getver");

        let reply = "Ver:03.28.07_R GPS:AXN_5.10_3333 Hw:FMB920";
        device
            .write_all(&encode_packet(&Packet::response(reply)).unwrap())
            .await
            .unwrap();

        let (status, body) = request.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, reply);
    }

    #[tokio::test]
    async fn test_silent_tracker_times_out_and_frees_slot() {
        let config = GatewayConfig {
            reply_timeout: Duration::from_millis(200),
            ..test_config()
        };
        let gw = spawn_gateway(config).await;
        let _device = connect_device(gw.addr, IMEI).await;

        let (status, body) = call(app(&gw), command(IMEI, "getgps")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, REPLY_TIMEOUT_TEXT);
        assert!(gw.ctx.correlator.try_acquire(IMEI).is_some());
    }

    #[tokio::test]
    async fn test_oversized_command_is_truncated() {
        let gw = spawn_gateway(test_config()).await;
        let mut device = connect_device(gw.addr, IMEI).await;

        let long = "x".repeat(700);
        let request = tokio::spawn(call(app(&gw), command(IMEI, &long)));

        let received = read_packet(&mut device).await;
        assert_eq!(received.messages[0].text.len(), 512);

        device
            .write_all(&encode_packet(&Packet::response("OK")).unwrap())
            .await
            .unwrap();
        let (status, _) = request.await.unwrap();
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_body_beyond_default_limit_is_truncated_not_rejected() {
        let gw = spawn_gateway(test_config()).await;

        let request = Request::builder()
            .method("POST")
            .uri("/cmd?imei=000")
            .body(Body::from(vec![b'x'; 3 * 1024 * 1024]))
            .unwrap();
        let (status, body) = call(app(&gw), request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "client with imei '000' not found");
    }

    #[tokio::test]
    async fn test_read_command_stops_at_limit() {
        let chunks: Vec<Result<&'static [u8], std::io::Error>> =
            vec![Ok(&b"get"[..]), Ok(&b"ver and more"[..]), Ok(&b"never read"[..])];
        let body = Body::from_stream(futures::stream::iter(chunks));

        assert_eq!(read_command(body, 6).await.unwrap(), "getver");
    }

    #[tokio::test]
    async fn test_list_clients() {
        let gw = spawn_gateway(test_config()).await;
        let (_, empty) = call(
            app(&gw),
            Request::get("/list-clients").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(empty, "");

        let device = connect_device(gw.addr, IMEI).await;
        let local = device.local_addr().unwrap();

        let (status, body) = call(
            app(&gw),
            Request::get("/list-clients").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, format!("{} - {}\n", local, IMEI));
    }
}
