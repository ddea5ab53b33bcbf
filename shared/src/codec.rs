//! Teltonika TCP frame codec
//!
//! All frames are laid out as:
//! ```text
//! [ 4 bytes: zero preamble ][ 4 bytes: data length N (u32, big-endian) ]
//! [ N bytes: codec id, count, payload, count ][ 4 bytes: CRC-16/IBM of the data ]
//! ```
//!
//! AVL frames (Codec 8 / 8 Extended) must be answered with the number of
//! accepted records as a 4-byte big-endian integer; the decoder hands that
//! answer back as [`Decoded::response`].

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::{AvlRecord, CodecId, IoElement, Message, MessageKind, Packet, Priority};

/// Maximum data field size (64 KiB) to prevent memory exhaustion
pub const MAX_DATA_LEN: u32 = 64 * 1024;

const HEADER_LEN: usize = 8;
const CRC_LEN: usize = 4;
/// Codec id + leading count + trailing count
const MIN_DATA_LEN: u32 = 3;
/// Coordinates travel as degrees * 10^7
const COORD_SCALE: f64 = 10_000_000.0;
/// Value widths with a dedicated IO group
const FIXED_WIDTHS: [usize; 4] = [1, 2, 4, 8];

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("invalid preamble: {0:#010x}")]
    InvalidPreamble(u32),

    #[error("invalid data length: {0} (max: {MAX_DATA_LEN})")]
    InvalidLength(u32),

    #[error("crc mismatch: frame says {expected:#06x}, computed {actual:#06x}")]
    CrcMismatch { expected: u32, actual: u16 },

    #[error("unsupported codec id: {0:#04x}")]
    UnsupportedCodec(u8),

    #[error("frame truncated while reading {0}")]
    Truncated(&'static str),

    #[error("count mismatch: leading {first}, trailing {last}")]
    CountMismatch { first: u8, last: u8 },

    #[error("invalid record priority: {0}")]
    InvalidPriority(u8),

    #[error("invalid message type: {0:#04x}")]
    InvalidMessageType(u8),

    #[error("{0} unexpected bytes after payload")]
    TrailingBytes(usize),

    #[error("packet has nothing to encode")]
    EmptyPacket,

    #[error("too many items for one frame: {0} (max: 255)")]
    TooManyItems(usize),

    #[error("io element {id} with {len} byte value cannot be encoded as {codec:?}")]
    InvalidIoElement { id: u16, len: usize, codec: CodecId },

    #[error("{0:?} frames cannot carry this packet's content")]
    ContentMismatch(CodecId),
}

/// How IO element values are allocated while decoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IoAlloc {
    /// Slice values out of the frame buffer. No copies, but any retained
    /// value keeps the whole frame allocation alive.
    #[default]
    Shared,
    /// Copy each value into its own allocation
    Owned,
}

/// Decoder configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeConfig {
    pub io_alloc: IoAlloc,
}

/// One decoded frame
#[derive(Debug, Clone)]
pub struct Decoded {
    /// Number of stream bytes the frame occupied
    pub consumed: usize,
    /// The raw frame, preamble through CRC
    pub frame: Bytes,
    /// Bytes the device expects echoed back, if any
    pub response: Option<Bytes>,
    pub packet: Packet,
}

/// CRC-16/IBM (reflected polynomial 0xA001, zero init) as used by Teltonika
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Encode a packet into a complete TCP frame
pub fn encode_packet(packet: &Packet) -> Result<Bytes, CodecError> {
    let codec = packet.codec_id;
    let mut data = BytesMut::with_capacity(256);
    data.put_u8(codec.into());

    let count = if codec.is_telemetry() {
        if !packet.messages.is_empty() {
            return Err(CodecError::ContentMismatch(codec));
        }
        let count = item_count(packet.data.len())?;
        data.put_u8(count);
        for record in &packet.data {
            encode_record(codec, record, &mut data)?;
        }
        count
    } else {
        if !packet.data.is_empty() {
            return Err(CodecError::ContentMismatch(codec));
        }
        let count = item_count(packet.messages.len())?;
        data.put_u8(count);
        for message in &packet.messages {
            encode_message(codec, message, &mut data);
        }
        count
    };
    data.put_u8(count);

    if data.len() > MAX_DATA_LEN as usize {
        return Err(CodecError::InvalidLength(data.len() as u32));
    }

    let mut buf = BytesMut::with_capacity(HEADER_LEN + data.len() + CRC_LEN);
    buf.put_u32(0);
    buf.put_u32(data.len() as u32);
    buf.put_slice(&data);
    buf.put_u32(crc16(&data) as u32);

    Ok(buf.freeze())
}

fn item_count(len: usize) -> Result<u8, CodecError> {
    match len {
        0 => Err(CodecError::EmptyPacket),
        n => u8::try_from(n).map_err(|_| CodecError::TooManyItems(n)),
    }
}

fn encode_record(codec: CodecId, record: &AvlRecord, buf: &mut BytesMut) -> Result<(), CodecError> {
    let wide = codec == CodecId::Codec8Ext;

    buf.put_u64(record.timestamp_ms);
    buf.put_u8(record.priority.into());
    buf.put_i32((record.lon * COORD_SCALE).round() as i32);
    buf.put_i32((record.lat * COORD_SCALE).round() as i32);
    buf.put_i16(record.altitude);
    buf.put_u16(record.angle);
    buf.put_u8(record.satellites);
    buf.put_u16(record.speed);

    if !wide {
        let bad = record
            .io
            .iter()
            .find(|e| e.id > u8::MAX as u16 || !FIXED_WIDTHS.contains(&e.value.len()));
        if let Some(e) = bad {
            return Err(CodecError::InvalidIoElement {
                id: e.id,
                len: e.value.len(),
                codec,
            });
        }
        if record.event_id > u8::MAX as u16 || record.io.len() > u8::MAX as usize {
            return Err(CodecError::InvalidIoElement {
                id: record.event_id,
                len: record.io.len(),
                codec,
            });
        }
    }

    put_index(buf, wide, record.event_id);
    put_index(buf, wide, record.io.len() as u16);

    for width in FIXED_WIDTHS {
        let group: Vec<&IoElement> = record.io.iter().filter(|e| e.value.len() == width).collect();
        put_index(buf, wide, group.len() as u16);
        for element in group {
            put_index(buf, wide, element.id);
            buf.put_slice(&element.value);
        }
    }

    if wide {
        let group: Vec<&IoElement> = record
            .io
            .iter()
            .filter(|e| !FIXED_WIDTHS.contains(&e.value.len()))
            .collect();
        buf.put_u16(group.len() as u16);
        for element in group {
            buf.put_u16(element.id);
            buf.put_u16(element.value.len() as u16);
            buf.put_slice(&element.value);
        }
    }

    Ok(())
}

fn put_index(buf: &mut BytesMut, wide: bool, value: u16) {
    if wide {
        buf.put_u16(value);
    } else {
        buf.put_u8(value as u8);
    }
}

fn encode_message(codec: CodecId, message: &Message, buf: &mut BytesMut) {
    buf.put_u8(message.kind.into());
    let text = message.text.as_bytes();
    if codec == CodecId::Codec13 {
        buf.put_u32(text.len() as u32 + 4);
        buf.put_u32(message.timestamp.unwrap_or(0));
    } else {
        buf.put_u32(text.len() as u32);
    }
    buf.put_slice(text);
}

/// Try to decode one frame from the front of `buf`
///
/// Returns:
/// - `Ok(Some(decoded))` if a complete frame was consumed
/// - `Ok(None)` if more data is needed (nothing is consumed)
/// - `Err(...)` if the data is invalid; the stream cannot be resynchronised
pub fn decode(buf: &mut BytesMut, config: DecodeConfig) -> Result<Option<Decoded>, CodecError> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }

    let preamble = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if preamble != 0 {
        return Err(CodecError::InvalidPreamble(preamble));
    }

    let data_len = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
    if !(MIN_DATA_LEN..=MAX_DATA_LEN).contains(&data_len) {
        return Err(CodecError::InvalidLength(data_len));
    }

    let total_len = HEADER_LEN + data_len as usize + CRC_LEN;
    if buf.len() < total_len {
        return Ok(None);
    }

    let frame = buf.split_to(total_len).freeze();
    let data = frame.slice(HEADER_LEN..HEADER_LEN + data_len as usize);

    let mut trailer = &frame[total_len - CRC_LEN..];
    let expected = trailer.get_u32();
    let actual = crc16(&data);
    if expected != actual as u32 {
        return Err(CodecError::CrcMismatch { expected, actual });
    }

    let (packet, count) = decode_data(data, config)?;
    let response = packet
        .codec_id
        .is_telemetry()
        .then(|| Bytes::copy_from_slice(&(count as u32).to_be_bytes()));

    Ok(Some(Decoded {
        consumed: total_len,
        frame,
        response,
        packet,
    }))
}

fn decode_data(data: Bytes, config: DecodeConfig) -> Result<(Packet, u8), CodecError> {
    let mut reader = FrameReader { buf: data };

    let codec_byte = reader.u8("codec id")?;
    let codec = CodecId::try_from(codec_byte).map_err(CodecError::UnsupportedCodec)?;
    let first = reader.u8("leading count")?;

    let mut packet = Packet::new(codec);
    for _ in 0..first {
        match codec {
            CodecId::Codec8 | CodecId::Codec8Ext => {
                packet.data.push(read_record(&mut reader, codec, config)?);
            }
            CodecId::Codec12 | CodecId::Codec13 => {
                packet.messages.push(read_message(&mut reader, codec)?);
            }
        }
    }

    let last = reader.u8("trailing count")?;
    if first != last {
        return Err(CodecError::CountMismatch { first, last });
    }
    if reader.buf.has_remaining() {
        return Err(CodecError::TrailingBytes(reader.buf.remaining()));
    }

    Ok((packet, first))
}

fn read_record(
    reader: &mut FrameReader,
    codec: CodecId,
    config: DecodeConfig,
) -> Result<AvlRecord, CodecError> {
    let wide = codec == CodecId::Codec8Ext;

    let timestamp_ms = reader.u64("timestamp")?;
    let priority = Priority::try_from(reader.u8("priority")?).map_err(CodecError::InvalidPriority)?;
    let lon = reader.i32("longitude")? as f64 / COORD_SCALE;
    let lat = reader.i32("latitude")? as f64 / COORD_SCALE;
    let altitude = reader.u16("altitude")? as i16;
    let angle = reader.u16("angle")?;
    let satellites = reader.u8("satellites")?;
    let speed = reader.u16("speed")?;

    let event_id = reader.index(wide, "event io id")?;
    let _total = reader.index(wide, "io count")?;

    let mut io = Vec::new();
    for width in FIXED_WIDTHS {
        let count = reader.index(wide, "io group count")?;
        for _ in 0..count {
            let id = reader.index(wide, "io id")?;
            let value = reader.bytes(width, "io value", config.io_alloc)?;
            io.push(IoElement { id, value });
        }
    }

    if wide {
        let count = reader.u16("variable io count")?;
        for _ in 0..count {
            let id = reader.u16("io id")?;
            let len = reader.u16("io length")? as usize;
            let value = reader.bytes(len, "io value", config.io_alloc)?;
            io.push(IoElement { id, value });
        }
    }

    Ok(AvlRecord {
        timestamp_ms,
        priority,
        lat,
        lon,
        altitude,
        angle,
        satellites,
        speed,
        event_id,
        io,
    })
}

fn read_message(reader: &mut FrameReader, codec: CodecId) -> Result<Message, CodecError> {
    let kind = MessageKind::try_from(reader.u8("message type")?).map_err(CodecError::InvalidMessageType)?;
    let size = reader.u32("message size")? as usize;

    let timestamp = if codec == CodecId::Codec13 {
        if size < 4 {
            return Err(CodecError::Truncated("message timestamp"));
        }
        Some(reader.u32("message timestamp")?)
    } else {
        None
    };
    let text_len = if timestamp.is_some() { size - 4 } else { size };
    let text = reader.bytes(text_len, "message text", IoAlloc::Shared)?;

    Ok(Message {
        kind,
        text: String::from_utf8_lossy(&text).into_owned(),
        timestamp,
    })
}

/// Bounds-checked reads over a frame's data field
struct FrameReader {
    buf: Bytes,
}

impl FrameReader {
    fn need(&self, n: usize, what: &'static str) -> Result<(), CodecError> {
        if self.buf.remaining() < n {
            Err(CodecError::Truncated(what))
        } else {
            Ok(())
        }
    }

    fn u8(&mut self, what: &'static str) -> Result<u8, CodecError> {
        self.need(1, what)?;
        Ok(self.buf.get_u8())
    }

    fn u16(&mut self, what: &'static str) -> Result<u16, CodecError> {
        self.need(2, what)?;
        Ok(self.buf.get_u16())
    }

    fn u32(&mut self, what: &'static str) -> Result<u32, CodecError> {
        self.need(4, what)?;
        Ok(self.buf.get_u32())
    }

    fn i32(&mut self, what: &'static str) -> Result<i32, CodecError> {
        self.need(4, what)?;
        Ok(self.buf.get_i32())
    }

    fn u64(&mut self, what: &'static str) -> Result<u64, CodecError> {
        self.need(8, what)?;
        Ok(self.buf.get_u64())
    }

    /// One-byte field in Codec 8, two-byte field in Codec 8 Extended
    fn index(&mut self, wide: bool, what: &'static str) -> Result<u16, CodecError> {
        if wide {
            self.u16(what)
        } else {
            self.u8(what).map(u16::from)
        }
    }

    fn bytes(&mut self, n: usize, what: &'static str, alloc: IoAlloc) -> Result<Bytes, CodecError> {
        self.need(n, what)?;
        let value = self.buf.split_to(n);
        Ok(match alloc {
            IoAlloc::Shared => value,
            IoAlloc::Owned => Bytes::copy_from_slice(&value),
        })
    }
}

/// Decoder state machine for streaming decoding
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Partial frame data being accumulated
    buffer: BytesMut,
    config: DecodeConfig,
}

impl FrameDecoder {
    /// Create a new frame decoder
    pub fn new(config: DecodeConfig) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            config,
        }
    }

    /// Add data to the decoder buffer
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next frame from the buffer
    ///
    /// Call this repeatedly until it returns `Ok(None)` to drain all complete frames
    pub fn decode_next(&mut self) -> Result<Option<Decoded>, CodecError> {
        decode(&mut self.buffer, self.config)
    }

    /// Bytes buffered but not yet decoded; non-zero at EOF means a partial frame
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }
}
