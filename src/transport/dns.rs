//! Minimal UDP DNS client (A/AAAA only)
//!
//! Backs the resolver override: when a connection's policy names an
//! explicit DNS server, non-whitelisted hostnames are looked up here
//! instead of through the OS resolver. The result gates the dial, it is
//! never used as the dial target.

use super::TransportError;
use std::net::{IpAddr, SocketAddr};
use tokio::net::UdpSocket;
use tokio::time::{timeout, Duration};

const QUERY_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_RESPONSE_SIZE: usize = 512;

const QTYPE_A: u16 = 1;
const QTYPE_AAAA: u16 = 28;
const QCLASS_IN: u16 = 1;

/// Resolve a hostname against an explicit UDP resolver.
///
/// IP literals short-circuit without a query, mirroring what a stub
/// resolver does. A is tried before AAAA; an empty answer set is an
/// error so callers can treat "did not resolve" uniformly.
pub async fn resolve(server: SocketAddr, hostname: &str) -> Result<Vec<IpAddr>, TransportError> {
    if let Ok(ip) = hostname.parse::<IpAddr>() {
        return Ok(vec![ip]);
    }

    let bind_addr = if server.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(bind_addr).await?;
    socket.connect(server).await?;

    let mut ips = query(&socket, hostname, QTYPE_A).await?;
    if ips.is_empty() {
        ips = query(&socket, hostname, QTYPE_AAAA).await?;
    }
    if ips.is_empty() {
        return Err(TransportError::Dns(format!(
            "no addresses for {}",
            hostname
        )));
    }
    Ok(ips)
}

async fn query(
    socket: &UdpSocket,
    hostname: &str,
    qtype: u16,
) -> Result<Vec<IpAddr>, TransportError> {
    let (id, packet) = build_query(hostname, qtype)?;
    socket.send(&packet).await?;

    let mut buf = [0u8; MAX_RESPONSE_SIZE];
    let n = timeout(QUERY_TIMEOUT, socket.recv(&mut buf))
        .await
        .map_err(|_| TransportError::Timeout)??;

    parse_answers(&buf[..n], id, qtype)
}

/// Build a single-question query packet. Returns the transaction id for
/// response matching.
fn build_query(hostname: &str, qtype: u16) -> Result<(u16, Vec<u8>), TransportError> {
    let id: u16 = rand::random();

    let mut packet = Vec::with_capacity(32 + hostname.len());
    packet.extend_from_slice(&id.to_be_bytes());
    packet.extend_from_slice(&0x0100u16.to_be_bytes()); // flags: RD=1
    packet.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
    packet.extend_from_slice(&[0u8; 6]); // ANCOUNT, NSCOUNT, ARCOUNT

    for label in hostname.trim_end_matches('.').split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(TransportError::Dns(format!(
                "invalid hostname: {}",
                hostname
            )));
        }
        packet.push(label.len() as u8);
        packet.extend_from_slice(label.as_bytes());
    }
    packet.push(0); // root label

    packet.extend_from_slice(&qtype.to_be_bytes());
    packet.extend_from_slice(&QCLASS_IN.to_be_bytes());

    Ok((id, packet))
}

/// Extract A/AAAA answers from a response packet.
fn parse_answers(buf: &[u8], id: u16, qtype: u16) -> Result<Vec<IpAddr>, TransportError> {
    if buf.len() < 12 {
        return Err(TransportError::Dns("response too short".to_string()));
    }

    let rx_id = u16::from_be_bytes([buf[0], buf[1]]);
    if rx_id != id {
        return Err(TransportError::Dns("transaction id mismatch".to_string()));
    }

    let flags = u16::from_be_bytes([buf[2], buf[3]]);
    let rcode = flags & 0x000F;
    if rcode == 3 {
        // NXDOMAIN: a definitive empty answer
        return Ok(Vec::new());
    }
    if rcode != 0 {
        return Err(TransportError::Dns(format!("server error: RCODE={}", rcode)));
    }

    let qdcount = u16::from_be_bytes([buf[4], buf[5]]) as usize;
    let ancount = u16::from_be_bytes([buf[6], buf[7]]) as usize;

    // skip question section
    let mut pos = 12;
    for _ in 0..qdcount {
        while pos < buf.len() && buf[pos] != 0 {
            pos += buf[pos] as usize + 1;
        }
        pos += 1 + 4; // root label, QTYPE, QCLASS
    }

    let mut ips = Vec::new();
    for _ in 0..ancount {
        // NAME: either a compression pointer or a label sequence
        if pos >= buf.len() {
            break;
        }
        if buf[pos] & 0xC0 == 0xC0 {
            pos += 2;
        } else {
            while pos < buf.len() && buf[pos] != 0 {
                pos += buf[pos] as usize + 1;
            }
            pos += 1;
        }

        if pos + 10 > buf.len() {
            break;
        }
        let rtype = u16::from_be_bytes([buf[pos], buf[pos + 1]]);
        let rdlength = u16::from_be_bytes([buf[pos + 8], buf[pos + 9]]) as usize;
        pos += 10;

        if pos + rdlength > buf.len() {
            break;
        }
        if rtype == QTYPE_A && qtype == QTYPE_A && rdlength == 4 {
            ips.push(IpAddr::from([
                buf[pos],
                buf[pos + 1],
                buf[pos + 2],
                buf[pos + 3],
            ]));
        } else if rtype == QTYPE_AAAA && qtype == QTYPE_AAAA && rdlength == 16 {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&buf[pos..pos + 16]);
            ips.push(IpAddr::from(octets));
        }
        pos += rdlength;
    }

    Ok(ips)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_query_layout() {
        let (id, packet) = build_query("example.test", QTYPE_A).unwrap();

        assert_eq!(u16::from_be_bytes([packet[0], packet[1]]), id);
        // flags: standard query, RD=1
        assert_eq!(&packet[2..4], &[0x01, 0x00]);
        // QDCOUNT=1, everything else 0
        assert_eq!(&packet[4..12], &[0, 1, 0, 0, 0, 0, 0, 0]);
        // QNAME: 7"example" 4"test" 0
        assert_eq!(packet[12], 7);
        assert_eq!(&packet[13..20], b"example");
        assert_eq!(packet[20], 4);
        assert_eq!(&packet[21..25], b"test");
        assert_eq!(packet[25], 0);
        // QTYPE=A, QCLASS=IN
        assert_eq!(&packet[26..30], &[0, 1, 0, 1]);
    }

    #[test]
    fn test_build_query_rejects_long_label() {
        let label = "a".repeat(64);
        assert!(build_query(&format!("{}.test", label), QTYPE_A).is_err());
    }

    /// Response with one A answer using a compression pointer name.
    fn answer_packet(id: u16, question: &[u8], ip: [u8; 4]) -> Vec<u8> {
        let mut packet = Vec::new();
        packet.extend_from_slice(&id.to_be_bytes());
        packet.extend_from_slice(&[0x81, 0x80]); // response, no error
        packet.extend_from_slice(&[0, 1, 0, 1, 0, 0, 0, 0]); // QD=1 AN=1
        packet.extend_from_slice(question);
        packet.extend_from_slice(&[0xC0, 0x0C]); // name pointer to question
        packet.extend_from_slice(&[0, 1, 0, 1]); // TYPE=A CLASS=IN
        packet.extend_from_slice(&[0, 0, 0, 60]); // TTL
        packet.extend_from_slice(&[0, 4]); // RDLENGTH
        packet.extend_from_slice(&ip);
        packet
    }

    #[test]
    fn test_parse_a_answer() {
        let (id, query) = build_query("example.test", QTYPE_A).unwrap();
        let response = answer_packet(id, &query[12..], [192, 0, 2, 1]);

        let ips = parse_answers(&response, id, QTYPE_A).unwrap();
        assert_eq!(ips, vec![IpAddr::from([192, 0, 2, 1])]);
    }

    #[test]
    fn test_parse_rejects_wrong_id() {
        let (id, query) = build_query("example.test", QTYPE_A).unwrap();
        let response = answer_packet(id.wrapping_add(1), &query[12..], [192, 0, 2, 1]);

        assert!(parse_answers(&response, id, QTYPE_A).is_err());
    }

    #[test]
    fn test_parse_nxdomain_is_empty() {
        let (id, query) = build_query("missing.test", QTYPE_A).unwrap();
        let mut response = Vec::new();
        response.extend_from_slice(&id.to_be_bytes());
        response.extend_from_slice(&[0x81, 0x83]); // RCODE=3
        response.extend_from_slice(&[0, 1, 0, 0, 0, 0, 0, 0]);
        response.extend_from_slice(&query[12..]);

        let ips = parse_answers(&response, id, QTYPE_A).unwrap();
        assert!(ips.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_ip_literal_short_circuits() {
        // server address is never contacted for literals
        let server: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let ips = resolve(server, "0.0.0.0").await.unwrap();
        assert_eq!(ips, vec![IpAddr::from([0, 0, 0, 0])]);
        assert!(ips[0].is_unspecified());
    }
}
