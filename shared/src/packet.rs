//! Decoded packet model

use bytes::Bytes;
use serde::{Serialize, Serializer};

/// Codec identifier carried in the first byte of every frame's data field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CodecId {
    /// AVL telemetry with 1-byte IO ids
    Codec8,
    /// AVL telemetry with 2-byte IO ids and variable-width values
    Codec8Ext,
    /// GPRS command / response text
    Codec12,
    /// Timestamped device-originated text
    Codec13,
}

impl CodecId {
    /// Whether frames of this codec carry AVL records
    pub fn is_telemetry(self) -> bool {
        matches!(self, CodecId::Codec8 | CodecId::Codec8Ext)
    }
}

impl TryFrom<u8> for CodecId {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x08 => Ok(CodecId::Codec8),
            0x8E => Ok(CodecId::Codec8Ext),
            0x0C => Ok(CodecId::Codec12),
            0x0D => Ok(CodecId::Codec13),
            other => Err(other),
        }
    }
}

impl From<CodecId> for u8 {
    fn from(id: CodecId) -> Self {
        match id {
            CodecId::Codec8 => 0x08,
            CodecId::Codec8Ext => 0x8E,
            CodecId::Codec12 => 0x0C,
            CodecId::Codec13 => 0x0D,
        }
    }
}

/// Record priority as reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Priority {
    #[default]
    Low,
    High,
    Panic,
}

impl TryFrom<u8> for Priority {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Priority::Low),
            1 => Ok(Priority::High),
            2 => Ok(Priority::Panic),
            other => Err(other),
        }
    }
}

impl From<Priority> for u8 {
    fn from(p: Priority) -> Self {
        match p {
            Priority::Low => 0,
            Priority::High => 1,
            Priority::Panic => 2,
        }
    }
}

/// One IO element of an AVL record
///
/// The value is kept as raw big-endian bytes; its width is whatever the
/// device sent (1, 2, 4 or 8 bytes, or arbitrary for Codec 8 Extended).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IoElement {
    pub id: u16,
    #[serde(serialize_with = "serialize_hex")]
    pub value: Bytes,
}

impl IoElement {
    pub fn new(id: u16, value: impl Into<Bytes>) -> Self {
        Self {
            id,
            value: value.into(),
        }
    }

    /// Interpret the value as an unsigned big-endian integer
    ///
    /// Returns `None` for values wider than 8 bytes.
    pub fn as_u64(&self) -> Option<u64> {
        if self.value.len() > 8 {
            return None;
        }
        Some(self.value.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64))
    }
}

fn serialize_hex<S: Serializer>(value: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(value))
}

/// A single AVL record (telemetry frame)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AvlRecord {
    /// Milliseconds since Unix epoch, as stamped by the device
    pub timestamp_ms: u64,
    pub priority: Priority,
    pub lat: f64,
    pub lon: f64,
    pub altitude: i16,
    pub angle: u16,
    pub satellites: u8,
    pub speed: u16,
    /// IO id that triggered the record, 0 when periodic
    pub event_id: u16,
    pub io: Vec<IoElement>,
}

impl AvlRecord {
    /// Create a record with a position fix and no IO elements
    pub fn at(timestamp_ms: u64, lat: f64, lon: f64) -> Self {
        Self {
            timestamp_ms,
            priority: Priority::Low,
            lat,
            lon,
            altitude: 0,
            angle: 0,
            satellites: 0,
            speed: 0,
            event_id: 0,
            io: Vec::new(),
        }
    }
}

/// Kind tag of a text message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MessageKind {
    /// Server to device command (0x05); Codec 13 also uses it for device text
    Command,
    /// Device reply to a command (0x06)
    Response,
}

impl TryFrom<u8> for MessageKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x05 => Ok(MessageKind::Command),
            0x06 => Ok(MessageKind::Response),
            other => Err(other),
        }
    }
}

impl From<MessageKind> for u8 {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Command => 0x05,
            MessageKind::Response => 0x06,
        }
    }
}

/// A text message carried by Codec 12 / Codec 13 frames
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub kind: MessageKind,
    pub text: String,
    /// Device timestamp in seconds (Codec 13 only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u32>,
}

impl Message {
    pub fn new(kind: MessageKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            timestamp: None,
        }
    }
}

/// The structured result of decoding one frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Packet {
    pub codec_id: CodecId,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<AvlRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Message>,
}

impl Packet {
    /// Create an empty packet for the given codec
    pub fn new(codec_id: CodecId) -> Self {
        Self {
            codec_id,
            data: Vec::new(),
            messages: Vec::new(),
        }
    }

    /// Build the outbound packet that commands a device
    pub fn command(text: impl Into<String>) -> Self {
        Self {
            codec_id: CodecId::Codec12,
            data: Vec::new(),
            messages: vec![Message::new(MessageKind::Command, text)],
        }
    }

    /// Build a device reply to a command
    pub fn response(text: impl Into<String>) -> Self {
        Self {
            codec_id: CodecId::Codec12,
            data: Vec::new(),
            messages: vec![Message::new(MessageKind::Response, text)],
        }
    }

    /// Build a Codec 8 telemetry packet
    pub fn telemetry(records: Vec<AvlRecord>) -> Self {
        Self {
            codec_id: CodecId::Codec8,
            data: records,
            messages: Vec::new(),
        }
    }

    /// Whether this packet carries at least one AVL record
    pub fn has_telemetry(&self) -> bool {
        !self.data.is_empty()
    }

    /// First device-originated message, if any
    pub fn first_message(&self) -> Option<&Message> {
        self.messages.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_id_byte_mapping() {
        for id in [
            CodecId::Codec8,
            CodecId::Codec8Ext,
            CodecId::Codec12,
            CodecId::Codec13,
        ] {
            assert_eq!(CodecId::try_from(u8::from(id)), Ok(id));
        }
        assert_eq!(CodecId::try_from(0x10), Err(0x10));
    }

    #[test]
    fn test_command_packet_shape() {
        let packet = Packet::command("getver");
        assert_eq!(packet.codec_id, CodecId::Codec12);
        assert!(!packet.has_telemetry());
        assert_eq!(packet.messages.len(), 1);
        assert_eq!(packet.messages[0].kind, MessageKind::Command);
        assert_eq!(packet.messages[0].text, "getver");
    }

    #[test]
    fn test_io_element_as_u64() {
        assert_eq!(IoElement::new(1, vec![0x01]).as_u64(), Some(1));
        assert_eq!(IoElement::new(2, vec![0x5E, 0x0F]).as_u64(), Some(0x5E0F));
        assert_eq!(IoElement::new(3, vec![0u8; 9]).as_u64(), None);
    }

    #[test]
    fn test_packet_json_rendering() {
        let mut record = AvlRecord::at(1_560_161_086_000, 54.5, 25.25);
        record.io.push(IoElement::new(66, vec![0x5E, 0x0F]));
        let json = serde_json::to_value(Packet::telemetry(vec![record])).unwrap();

        assert_eq!(json["codec_id"], "Codec8");
        assert_eq!(json["data"][0]["lat"], 54.5);
        assert_eq!(json["data"][0]["io"][0]["value"], "5e0f");
        assert!(json.get("messages").is_none());
    }
}
