//! Identity handshake
//!
//! A tracker opens the connection with:
//! ```text
//! [ 2 bytes: identity length L (u16, big-endian) ][ L bytes: IMEI text ]
//! ```
//! and waits for a single `0x01` byte before sending frames.

use crate::error::SessionError;
use bytes::{Buf, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;
use trackgate_shared::protocol::IDENTITY_LEN_PREFIX;

/// Read one chunk from the connection, failing if nothing arrives within `idle`
pub(super) async fn read_some<R>(
    reader: &mut R,
    scratch: &mut [u8],
    idle: Duration,
) -> Result<usize, SessionError>
where
    R: AsyncRead + Unpin,
{
    match timeout(idle, reader.read(scratch)).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(SessionError::IdleTimeout(idle)),
    }
}

/// Read the identity frame, looping until the declared length has arrived
///
/// Returns the trimmed IMEI and any bytes the device sent after it.
pub async fn read_identity<R>(
    reader: &mut R,
    chunk: usize,
    idle: Duration,
) -> Result<(String, BytesMut), SessionError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(chunk);
    let mut scratch = vec![0u8; chunk];

    while buf.len() < IDENTITY_LEN_PREFIX {
        let n = read_some(reader, &mut scratch, idle).await?;
        if n == 0 {
            return Err(SessionError::InvalidFirstMessage(hex::encode(&buf)));
        }
        buf.extend_from_slice(&scratch[..n]);
    }

    let declared = u16::from_be_bytes([buf[0], buf[1]]) as usize;
    while buf.len() < IDENTITY_LEN_PREFIX + declared {
        let n = read_some(reader, &mut scratch, idle).await?;
        if n == 0 {
            return Err(SessionError::InvalidImeiSize {
                declared,
                received: buf.len() - IDENTITY_LEN_PREFIX,
            });
        }
        buf.extend_from_slice(&scratch[..n]);
    }

    buf.advance(IDENTITY_LEN_PREFIX);
    let raw = buf.split_to(declared);
    let imei = String::from_utf8_lossy(&raw).trim().to_string();
    if imei.is_empty() {
        return Err(SessionError::EmptyImei);
    }

    Ok((imei, buf))
}
