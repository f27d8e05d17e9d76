//! WebSocket carrier adapter

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, trace};

use super::{CarrierError, CarrierSink, CarrierSource};

/// Outbound half of a WebSocket carrier.
///
/// The sink mutex makes each frame write atomic; streams and the demux
/// task share this through the connection.
pub struct WebSocketSink {
    sink: Mutex<SplitSink<WebSocketStream<TcpStream>, Message>>,
}

/// Inbound half of a WebSocket carrier.
pub struct WebSocketSource {
    stream: SplitStream<WebSocketStream<TcpStream>>,
}

/// Perform the server-side WebSocket upgrade on an accepted TCP stream.
pub async fn accept_websocket(
    stream: TcpStream,
) -> Result<(WebSocketSource, WebSocketSink), CarrierError> {
    let ws = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| CarrierError::WebSocket(e.to_string()))?;

    let (sink, stream) = ws.split();
    Ok((
        WebSocketSource { stream },
        WebSocketSink {
            sink: Mutex::new(sink),
        },
    ))
}

#[async_trait]
impl CarrierSink for WebSocketSink {
    async fn send_frame(&self, frame: Bytes) -> Result<(), CarrierError> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Binary(frame.to_vec()))
            .await
            .map_err(|e| CarrierError::WebSocket(e.to_string()))
    }

    async fn close(&self) {
        let mut sink = self.sink.lock().await;
        let _ = sink.close().await;
    }
}

#[async_trait]
impl CarrierSource for WebSocketSource {
    async fn next_frame(&mut self) -> Option<Bytes> {
        while let Some(message) = self.stream.next().await {
            match message {
                Ok(Message::Binary(data)) => return Some(Bytes::from(data)),
                // the protocol is binary, but tolerate text frames as raw bytes
                Ok(Message::Text(text)) => return Some(Bytes::from(text.into_bytes())),
                Ok(Message::Close(frame)) => {
                    trace!(?frame, "websocket close frame");
                    return None;
                }
                // ping/pong are answered by tungstenite itself
                Ok(_) => continue,
                Err(e) => {
                    debug!(error = %e, "websocket read error");
                    return None;
                }
            }
        }
        None
    }
}
