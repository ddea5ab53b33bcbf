//! Error types for the gateway

use std::time::Duration;
use thiserror::Error;
use trackgate_shared::CodecError;

/// Reasons a device session ends
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("invalid first message (read: {0})")]
    InvalidFirstMessage(String),

    #[error("invalid imei size: declared {declared}, received {received}")]
    InvalidImeiSize { declared: usize, received: usize },

    #[error("empty imei")]
    EmptyImei,

    #[error("no data received for {0:?}")]
    IdleTimeout(Duration),

    #[error("connection closed with {0} bytes of a partial frame buffered")]
    Truncated(usize),

    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    #[error("packet decode error: {0}")]
    Codec(#[from] CodecError),
}

/// Failure to push a packet to a device
#[derive(Error, Debug)]
pub enum SendError {
    #[error("client with imei '{0}' not found")]
    SessionNotFound(String),

    #[error("packet encode error: {0}")]
    Codec(#[from] CodecError),

    #[error("connection write error: {0}")]
    Io(#[from] std::io::Error),
}
