//! Packet encoding/decoding for the relay protocol
//!
//! Packet format:
//! ```text
//! +--------+--------+--------+--------+--------+
//! |  Type  |       Stream ID (u32 LE)          |
//! +--------+--------+--------+--------+--------+
//! |              Payload                       |
//! +--------------------------------------------+
//! ```
//!
//! The payload length is implied by the carrier frame length; there is no
//! length field and no fragmentation.

use super::RelayError;
use bytes::{BufMut, Bytes, BytesMut};

/// Packet header size in bytes
pub const PACKET_HEADER_SIZE: usize = 5;

/// Packet types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    /// Open a new stream
    Connect = 0x01,
    /// Stream payload
    Data = 0x02,
    /// Credit refresh (flow control), server to client
    Continue = 0x03,
    /// Terminate a stream
    Close = 0x04,
}

impl TryFrom<u8> for PacketType {
    type Error = RelayError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(PacketType::Connect),
            0x02 => Ok(PacketType::Data),
            0x03 => Ok(PacketType::Continue),
            0x04 => Ok(PacketType::Close),
            _ => Err(RelayError::UnknownPacketType(value)),
        }
    }
}

/// Reason byte carried by CLOSE packets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CloseReason {
    /// No specific cause (connection-wide teardown)
    Unspecified = 0x01,
    /// Orderly close: upstream EOF or peer request
    Voluntary = 0x02,
    /// Dial, proxy, read or write failure
    NetworkError = 0x03,
    /// Unknown stream or unusable connect information
    InvalidInfo = 0x41,
    /// Hostname did not resolve
    Unreachable = 0x42,
    /// Rejected by policy
    Blocked = 0x49,
}

impl CloseReason {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Stream transport requested by a CONNECT packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamKind {
    Tcp = 0x01,
    Udp = 0x02,
}

impl TryFrom<u8> for StreamKind {
    type Error = RelayError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(StreamKind::Tcp),
            0x02 => Ok(StreamKind::Udp),
            _ => Err(RelayError::MalformedPayload("stream type")),
        }
    }
}

/// A decoded protocol packet
#[derive(Debug, Clone)]
pub struct Packet {
    pub packet_type: PacketType,
    pub stream_id: u32,
    pub payload: Bytes,
}

impl Packet {
    /// Encode a packet into a single wire frame of `5 + payload.len()` bytes.
    pub fn encode_parts(packet_type: PacketType, stream_id: u32, payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(PACKET_HEADER_SIZE + payload.len());
        buf.put_u8(packet_type as u8);
        buf.put_u32_le(stream_id);
        buf.extend_from_slice(payload);
        buf.freeze()
    }

    /// Encode this packet into a wire frame.
    pub fn encode(&self) -> Bytes {
        Self::encode_parts(self.packet_type, self.stream_id, &self.payload)
    }

    /// Decode one wire frame.
    ///
    /// The payload is copied out of the frame so it can outlive the
    /// carrier's receive buffer.
    pub fn decode(frame: &[u8]) -> Result<Self, RelayError> {
        if frame.len() < PACKET_HEADER_SIZE {
            return Err(RelayError::TruncatedPacket(frame.len()));
        }
        let packet_type = PacketType::try_from(frame[0])?;
        let stream_id = u32::from_le_bytes([frame[1], frame[2], frame[3], frame[4]]);
        let payload = Bytes::copy_from_slice(&frame[PACKET_HEADER_SIZE..]);
        Ok(Self {
            packet_type,
            stream_id,
            payload,
        })
    }

    /// Create a data packet
    pub fn data(stream_id: u32, payload: Bytes) -> Self {
        Self {
            packet_type: PacketType::Data,
            stream_id,
            payload,
        }
    }

    /// Create a credit refresh packet
    pub fn continue_credit(stream_id: u32, buffer_remaining: u32) -> Self {
        Self {
            packet_type: PacketType::Continue,
            stream_id,
            payload: Bytes::copy_from_slice(&buffer_remaining.to_le_bytes()),
        }
    }

    /// Create a close packet
    pub fn close(stream_id: u32, reason: CloseReason) -> Self {
        Self {
            packet_type: PacketType::Close,
            stream_id,
            payload: Bytes::copy_from_slice(&[reason.as_u8()]),
        }
    }
}

/// Parsed CONNECT payload: `{streamType: u8, port: u16 LE, hostname}`
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    /// Raw stream type byte; validated at dial time so an unknown value
    /// still produces a stream that closes with INVALID_INFO
    pub kind: u8,
    pub port: u16,
    pub hostname: String,
}

impl ConnectRequest {
    pub fn parse(payload: &[u8]) -> Result<Self, RelayError> {
        if payload.len() < 3 {
            return Err(RelayError::MalformedPayload("connect"));
        }
        let kind = payload[0];
        let port = u16::from_le_bytes([payload[1], payload[2]]);
        // Arbitrary bytes are accepted here; a nonsense hostname fails at
        // resolution or dial and closes the stream with the right reason.
        let hostname = String::from_utf8_lossy(&payload[3..]).into_owned();
        Ok(Self {
            kind,
            port,
            hostname,
        })
    }

    /// The `host:port` dial target, bracketing IPv6 literals.
    pub fn destination(&self) -> String {
        if self.hostname.contains(':') {
            format!("[{}]:{}", self.hostname, self.port)
        } else {
            format!("{}:{}", self.hostname, self.port)
        }
    }
}
