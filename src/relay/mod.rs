//! Relay layer - the multiplex engine
//!
//! Provides:
//! - Packet encoding/decoding
//! - Per-connection stream table and frame dispatch
//! - Per-stream lifecycle (dial, pumps, credit, close)

mod connection;
mod packet;
mod stream;

pub use connection::Connection;
pub use packet::{
    CloseReason, ConnectRequest, Packet, PacketType, StreamKind, PACKET_HEADER_SIZE,
};

use thiserror::Error;

/// Relay layer errors
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("packet too short: {0} bytes")]
    TruncatedPacket(usize),

    #[error("unknown packet type: {0:#04x}")]
    UnknownPacketType(u8),

    #[error("malformed {0} payload")]
    MalformedPayload(&'static str),

    #[error("carrier error: {0}")]
    Carrier(#[from] crate::carrier::CarrierError),
}
