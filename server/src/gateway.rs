//! TCP gateway: accepts tracker connections and routes packets to them

use crate::error::SendError;
use crate::session::{DeviceSession, SessionContext, SessionHandle};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info};
use trackgate_shared::Packet;

/// What the HTTP side needs from the tracker side
#[async_trait]
pub trait TrackerHub: Send + Sync {
    /// Encode `packet` and write it to the tracker registered as `imei`
    async fn send_packet(&self, imei: &str, packet: &Packet) -> Result<(), SendError>;

    /// All currently registered sessions
    async fn list_sessions(&self) -> Vec<SessionHandle>;
}

/// Listens for trackers and runs one session task per connection
pub struct TcpGateway {
    listener: TcpListener,
    ctx: SessionContext,
}

impl TcpGateway {
    /// Bind the tracker listener
    pub async fn bind(address: &str, ctx: SessionContext) -> Result<Self> {
        let listener = TcpListener::bind(address)
            .await
            .with_context(|| format!("tcp listener create error ({})", address))?;
        Ok(Self { listener, ctx })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the task is dropped
    pub async fn run(&self) -> Result<()> {
        info!("tcp server listening at {}", self.local_addr()?);

        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let session = DeviceSession::new(stream, addr, self.ctx.clone());
                    tokio::spawn(session.run());
                }
                Err(e) => {
                    error!("tcp connection accept error ({})", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

#[async_trait]
impl TrackerHub for TcpGateway {
    async fn send_packet(&self, imei: &str, packet: &Packet) -> Result<(), SendError> {
        let handle = self
            .ctx
            .registry
            .get(imei)
            .await
            .ok_or_else(|| SendError::SessionNotFound(imei.to_string()))?;
        handle.send(packet).await
    }

    async fn list_sessions(&self) -> Vec<SessionHandle> {
        self.ctx.registry.snapshot().await
    }
}
