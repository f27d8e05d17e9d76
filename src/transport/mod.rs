//! Transport layer - outbound egress sockets
//!
//! Provides:
//! - Direct TCP and UDP dialing with split read/write halves
//! - SOCKS5 CONNECT egress through an upstream proxy
//! - UDP DNS resolution against an explicit resolver

mod dns;
mod socks5;

pub use dns::resolve;
pub use socks5::socks5_connect;

use std::io;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UdpSocket};

/// Transport layer errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("DNS error: {0}")]
    Dns(String),

    #[error("SOCKS error: {0}")]
    Socks(String),

    #[error("Timeout")]
    Timeout,
}

/// Read half of an egress socket.
///
/// For TCP a read of zero bytes means EOF; for UDP it is an empty
/// datagram, which is why [`is_stream`](Self::is_stream) exists.
pub enum EgressReader {
    Tcp(OwnedReadHalf),
    Udp(Arc<UdpSocket>),
}

impl EgressReader {
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            EgressReader::Tcp(half) => half.read(buf).await,
            EgressReader::Udp(socket) => socket.recv(buf).await,
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, EgressReader::Tcp(_))
    }
}

/// Write half of an egress socket.
///
/// UDP writes preserve datagram boundaries: one call, one datagram.
pub enum EgressWriter {
    Tcp(OwnedWriteHalf),
    Udp(Arc<UdpSocket>),
}

impl EgressWriter {
    pub async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            EgressWriter::Tcp(half) => half.write_all(data).await,
            EgressWriter::Udp(socket) => socket.send(data).await.map(|_| ()),
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, EgressWriter::Tcp(_))
    }
}

/// Split an established TCP stream into egress halves.
pub fn split_tcp(stream: TcpStream) -> (EgressReader, EgressWriter) {
    let (read_half, write_half) = stream.into_split();
    (EgressReader::Tcp(read_half), EgressWriter::Tcp(write_half))
}

/// Dial a TCP destination directly.
pub async fn dial_tcp(
    destination: &str,
    no_delay: bool,
) -> Result<(EgressReader, EgressWriter), TransportError> {
    let stream = TcpStream::connect(destination).await?;
    let _ = stream.set_nodelay(no_delay);
    Ok(split_tcp(stream))
}

/// Dial a connected UDP flow to a destination.
pub async fn dial_udp(destination: &str) -> Result<(EgressReader, EgressWriter), TransportError> {
    let addr = tokio::net::lookup_host(destination)
        .await?
        .next()
        .ok_or_else(|| TransportError::Dns(format!("no addresses for {}", destination)))?;

    let bind_addr = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(bind_addr).await?;
    socket.connect(addr).await?;

    let socket = Arc::new(socket);
    Ok((
        EgressReader::Udp(socket.clone()),
        EgressWriter::Udp(socket),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_dial_tcp_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 16];
            let n = socket.read(&mut buf).await.unwrap();
            socket.write_all(&buf[..n]).await.unwrap();
        });

        let (mut reader, mut writer) = dial_tcp(&addr.to_string(), true).await.unwrap();
        assert!(reader.is_stream());

        writer.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 16];
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_dial_udp_roundtrip() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = peer.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let mut buf = [0u8; 16];
            let (n, from) = peer.recv_from(&mut buf).await.unwrap();
            peer.send_to(&buf[..n], from).await.unwrap();
        });

        let (mut reader, mut writer) = dial_udp(&addr.to_string()).await.unwrap();
        assert!(!reader.is_stream());

        writer.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 16];
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");

        server.await.unwrap();
    }
}
