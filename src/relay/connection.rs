//! Per-carrier connection: frame demux and the stream table
//!
//! One connection owns one carrier session. The demux loop is the only
//! task reading the carrier and it never blocks on application logic:
//! DATA enqueues are non-blocking, and the close paths that need carrier
//! writes are spawned off.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use super::packet::{CloseReason, ConnectRequest, Packet, PacketType};
use super::stream::Stream;
use crate::carrier::{CarrierSink, CarrierSource};
use crate::config::RelayConfig;
use crate::policy::Policy;

/// Shared state between the demux task and every stream task.
pub(crate) struct ConnectionCore {
    sink: Box<dyn CarrierSink>,
    streams: RwLock<HashMap<u32, Arc<Stream>>>,
    pub(crate) config: Arc<RelayConfig>,
    pub(crate) policy: Policy,
}

impl ConnectionCore {
    pub(crate) fn new(sink: Box<dyn CarrierSink>, config: Arc<RelayConfig>) -> Arc<Self> {
        let policy = Policy::from_config(&config);
        Arc::new(Self {
            sink,
            streams: RwLock::new(HashMap::new()),
            config,
            policy,
        })
    }

    /// Write one frame to the carrier. A failed write tears the whole
    /// carrier down; stream teardown then follows from the demux loop
    /// ending.
    async fn send_frame(&self, frame: Bytes) {
        if let Err(e) = self.sink.send_frame(frame).await {
            warn!(error = %e, "carrier write failed, closing carrier");
            self.sink.close().await;
        }
    }

    pub(crate) async fn send_data(&self, stream_id: u32, payload: &[u8]) {
        self.send_frame(Packet::encode_parts(PacketType::Data, stream_id, payload))
            .await;
    }

    pub(crate) async fn send_continue(&self, stream_id: u32, buffer_remaining: u32) {
        self.send_frame(Packet::encode_parts(
            PacketType::Continue,
            stream_id,
            &buffer_remaining.to_le_bytes(),
        ))
        .await;
    }

    pub(crate) async fn send_close(&self, stream_id: u32, reason: CloseReason) {
        self.send_frame(Packet::encode_parts(
            PacketType::Close,
            stream_id,
            &[reason.as_u8()],
        ))
        .await;
    }

    /// Insert a stream unless the id is already taken.
    pub(crate) fn try_insert_stream(&self, stream_id: u32, stream: Arc<Stream>) -> bool {
        let mut streams = self.streams.write();
        if streams.contains_key(&stream_id) {
            return false;
        }
        streams.insert(stream_id, stream);
        true
    }

    pub(crate) fn lookup_stream(&self, stream_id: u32) -> Option<Arc<Stream>> {
        self.streams.read().get(&stream_id).cloned()
    }

    pub(crate) fn remove_stream(&self, stream_id: u32) {
        self.streams.write().remove(&stream_id);
    }

    pub(crate) fn stream_count(&self) -> usize {
        self.streams.read().len()
    }
}

/// One multiplexed carrier session.
pub struct Connection {
    core: Arc<ConnectionCore>,
}

impl Connection {
    pub fn new(sink: Box<dyn CarrierSink>, config: Arc<RelayConfig>) -> Self {
        Self {
            core: ConnectionCore::new(sink, config),
        }
    }

    /// Drive the connection until the carrier closes, then tear down
    /// every remaining stream.
    pub async fn run(&self, source: &mut dyn CarrierSource) {
        self.on_open().await;
        while let Some(frame) = source.next_frame().await {
            self.on_message(frame).await;
        }
        self.on_close().await;
    }

    /// Number of live streams in the table.
    pub fn stream_count(&self) -> usize {
        self.core.stream_count()
    }

    /// Advertise the per-stream credit before any frame is dispatched.
    async fn on_open(&self) {
        self.core
            .send_continue(0, self.core.config.buffer_remaining_length)
            .await;
    }

    async fn on_message(&self, frame: Bytes) {
        let packet = match Packet::decode(&frame) {
            Ok(packet) => packet,
            Err(e) => {
                trace!(error = %e, "ignoring undecodable frame");
                return;
            }
        };

        match packet.packet_type {
            PacketType::Connect => self.handle_connect(packet.stream_id, &packet.payload),
            PacketType::Data => self.handle_data(packet.stream_id, packet.payload),
            PacketType::Close => self.handle_close(packet.stream_id, &packet.payload),
            PacketType::Continue => {
                trace!(stream_id = packet.stream_id, "ignoring client continue")
            }
        }
    }

    fn handle_connect(&self, stream_id: u32, payload: &[u8]) {
        let request = match ConnectRequest::parse(payload) {
            Ok(request) => request,
            Err(e) => {
                trace!(stream_id, error = %e, "ignoring malformed connect");
                return;
            }
        };

        let stream = Stream::new(stream_id, self.core.clone());
        if !self.core.try_insert_stream(stream_id, stream.clone()) {
            // duplicates are benign: the first stream keeps running
            trace!(stream_id, "duplicate connect ignored");
            return;
        }

        debug!(
            stream_id,
            kind = request.kind,
            destination = %request.destination(),
            "connect"
        );
        stream.start(request);
    }

    fn handle_data(&self, stream_id: u32, payload: Bytes) {
        match self.core.lookup_stream(stream_id) {
            Some(stream) => stream.enqueue(payload),
            None => {
                // answered off the demux task so a slow carrier cannot
                // stall dispatch
                let core = self.core.clone();
                tokio::spawn(async move {
                    core.send_close(stream_id, CloseReason::InvalidInfo).await;
                });
            }
        }
    }

    fn handle_close(&self, stream_id: u32, payload: &[u8]) {
        if payload.is_empty() {
            return;
        }
        // The peer's reason byte is informational only; our own CLOSE
        // frame reports the orderly teardown from this side.
        let peer_reason = payload[0];

        if let Some(stream) = self.core.lookup_stream(stream_id) {
            debug!(stream_id, peer_reason, "peer close");
            tokio::spawn(async move {
                stream.close(CloseReason::Voluntary).await;
            });
        }
    }

    async fn on_close(&self) {
        let streams: Vec<Arc<Stream>> = self.core.streams.read().values().cloned().collect();
        debug!(count = streams.len(), "carrier closed, tearing down streams");
        for stream in streams {
            stream.close(CloseReason::Unspecified).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::carrier::{pipe_pair, CarrierSource, PipeSink, PipeSource};
    use crate::relay::packet::PACKET_HEADER_SIZE;
    use tokio::time::{timeout, Duration};

    fn test_connection() -> (Connection, PipeSink, PipeSource) {
        let ((server_sink, _server_source), (client_sink, client_source)) = pipe_pair(16);
        let connection = Connection::new(Box::new(server_sink), Arc::new(RelayConfig::default()));
        (connection, client_sink, client_source)
    }

    async fn next_packet(source: &mut PipeSource) -> Packet {
        let frame = timeout(Duration::from_secs(1), source.next_frame())
            .await
            .expect("timed out waiting for frame")
            .expect("carrier closed");
        Packet::decode(&frame).unwrap()
    }

    #[tokio::test]
    async fn test_open_advertises_initial_credit() {
        let (connection, _sink, mut client) = test_connection();
        connection.on_open().await;

        let packet = next_packet(&mut client).await;
        assert_eq!(packet.packet_type, PacketType::Continue);
        assert_eq!(packet.stream_id, 0);
        assert_eq!(&packet.payload[..], &128u32.to_le_bytes());
    }

    #[tokio::test]
    async fn test_data_for_unknown_stream_closes_invalid_info() {
        let (connection, _sink, mut client) = test_connection();

        let frame = Packet::encode_parts(PacketType::Data, 9, b"hello");
        connection.on_message(frame).await;

        let packet = next_packet(&mut client).await;
        assert_eq!(packet.packet_type, PacketType::Close);
        assert_eq!(packet.stream_id, 9);
        assert_eq!(&packet.payload[..], &[CloseReason::InvalidInfo.as_u8()]);
        assert_eq!(connection.stream_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_frames_are_ignored() {
        let (connection, _sink, mut client) = test_connection();

        // short frame, unknown type, short connect, short close
        connection.on_message(Bytes::from_static(&[0x02, 0x01])).await;
        connection
            .on_message(Bytes::from_static(&[0x7F, 0, 0, 0, 0, 1, 2, 3]))
            .await;
        connection
            .on_message(Packet::encode_parts(PacketType::Connect, 1, &[0x01, 0x50]))
            .await;
        connection
            .on_message(Packet::encode_parts(PacketType::Close, 1, &[]))
            .await;

        let extra = timeout(Duration::from_millis(100), client.next_frame()).await;
        assert!(extra.is_err(), "malformed frames must produce no output");
        assert_eq!(connection.stream_count(), 0);
    }

    #[tokio::test]
    async fn test_close_for_unknown_stream_is_ignored() {
        let (connection, _sink, mut client) = test_connection();

        connection
            .on_message(Packet::encode_parts(PacketType::Close, 4, &[0x02]))
            .await;

        let extra = timeout(Duration::from_millis(100), client.next_frame()).await;
        assert!(extra.is_err());
    }

    #[test]
    fn test_header_size_matches_wire() {
        assert_eq!(PACKET_HEADER_SIZE, 5);
    }
}
