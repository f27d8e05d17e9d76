//! Carrier layer - the message-oriented transport under the relay
//!
//! The relay core only needs two things from its carrier: a source of
//! whole inbound binary frames delivered in order, and a sink that writes
//! one whole outbound frame at a time, atomically with respect to other
//! frames. The production carrier is a WebSocket; an in-memory pipe
//! backs the test suite.

mod pipe;
mod websocket;

pub use pipe::{pipe_pair, PipeSink, PipeSource};
pub use websocket::{accept_websocket, WebSocketSink, WebSocketSource};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Carrier layer errors
#[derive(Debug, Error)]
pub enum CarrierError {
    #[error("carrier closed")]
    Closed,

    #[error("websocket error: {0}")]
    WebSocket(String),
}

/// Outbound half of a carrier.
///
/// Each call writes exactly one binary frame; a frame's bytes are never
/// interleaved with another frame's.
#[async_trait]
pub trait CarrierSink: Send + Sync {
    async fn send_frame(&self, frame: Bytes) -> Result<(), CarrierError>;

    /// Terminate the transport. Idempotent.
    async fn close(&self);
}

/// Inbound half of a carrier.
#[async_trait]
pub trait CarrierSource: Send {
    /// The next whole binary frame, or `None` once the carrier is closed.
    async fn next_frame(&mut self) -> Option<Bytes>;
}
