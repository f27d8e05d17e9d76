//! SOCKS5 CONNECT client (RFC 1928)
//!
//! Used for TCP egress when the relay is configured with an upstream
//! proxy. Only the CONNECT command without authentication is needed.

use super::TransportError;
use std::net::IpAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// SOCKS5 version
const SOCKS_VERSION: u8 = 0x05;

/// Authentication methods
const METHOD_NO_AUTH: u8 = 0x00;

/// Commands
const CMD_CONNECT: u8 = 0x01;

/// Address types
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// Establish a TCP connection to `host:port` through a SOCKS5 proxy.
///
/// The hostname is passed to the proxy verbatim (domain address type)
/// unless it is an IP literal, so name resolution happens at the proxy.
pub async fn socks5_connect(
    proxy: &str,
    host: &str,
    port: u16,
) -> Result<TcpStream, TransportError> {
    let mut stream = TcpStream::connect(proxy).await?;

    // Method negotiation: offer NO AUTH only
    stream
        .write_all(&[SOCKS_VERSION, 0x01, METHOD_NO_AUTH])
        .await?;

    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await?;
    if reply[0] != SOCKS_VERSION {
        return Err(TransportError::Socks(format!(
            "bad version: {:#04x}",
            reply[0]
        )));
    }
    if reply[1] != METHOD_NO_AUTH {
        return Err(TransportError::Socks(
            "no acceptable authentication method".to_string(),
        ));
    }

    // CONNECT request
    let mut request = Vec::with_capacity(7 + host.len());
    request.extend_from_slice(&[SOCKS_VERSION, CMD_CONNECT, 0x00]);
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            request.push(ATYP_IPV4);
            request.extend_from_slice(&ip.octets());
        }
        Ok(IpAddr::V6(ip)) => {
            request.push(ATYP_IPV6);
            request.extend_from_slice(&ip.octets());
        }
        Err(_) => {
            if host.len() > 255 {
                return Err(TransportError::Socks("hostname too long".to_string()));
            }
            request.push(ATYP_DOMAIN);
            request.push(host.len() as u8);
            request.extend_from_slice(host.as_bytes());
        }
    }
    request.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&request).await?;

    // Reply header: VER REP RSV ATYP
    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await?;
    if head[1] != 0x00 {
        return Err(TransportError::Socks(format!(
            "connect failed, rep={:#04x}",
            head[1]
        )));
    }

    // Consume BND.ADDR and BND.PORT
    match head[3] {
        ATYP_IPV4 => {
            let mut addr = [0u8; 4 + 2];
            stream.read_exact(&mut addr).await?;
        }
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            let mut addr = vec![0u8; len[0] as usize + 2];
            stream.read_exact(&mut addr).await?;
        }
        ATYP_IPV6 => {
            let mut addr = [0u8; 16 + 2];
            stream.read_exact(&mut addr).await?;
        }
        other => {
            return Err(TransportError::Socks(format!(
                "bad address type: {:#04x}",
                other
            )));
        }
    }

    Ok(stream)
}
