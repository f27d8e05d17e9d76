//! # WISP Relay
//!
//! A server terminating the WISP framed multiplexing protocol: many
//! independent client-initiated TCP and UDP streams carried over a single
//! WebSocket connection.
//!
//! ## Features
//!
//! - **Stream multiplexing** with a per-connection stream table
//! - **Credit-based flow control** via CONTINUE refresh frames
//! - **Egress policy**: blacklist, whitelist, DNS override, UDP gating
//! - **SOCKS5 egress** for TCP streams through an upstream proxy
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  Carrier Layer                       │
//! │        (WebSocket framing, in-memory pipe)           │
//! ├─────────────────────────────────────────────────────┤
//! │                  Relay Layer                         │
//! │   (packet codec, stream table, per-stream pumps,     │
//! │           credit-based flow control)                 │
//! ├─────────────────────────────────────────────────────┤
//! │                  Policy Layer                        │
//! │    (blacklist, whitelist, DNS override, UDP gate)    │
//! ├─────────────────────────────────────────────────────┤
//! │                 Transport Layer                      │
//! │      (TCP/UDP egress, SOCKS5, DNS resolution)        │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod carrier;
pub mod config;
pub mod policy;
pub mod relay;
pub mod transport;

pub use config::Config;
pub use relay::Connection;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default listen port for the relay server
pub const DEFAULT_PORT: u16 = 6001;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Relay error: {0}")]
    Relay(#[from] relay::RelayError),

    #[error("Carrier error: {0}")]
    Carrier(#[from] carrier::CarrierError),

    #[error("Transport error: {0}")]
    Transport(#[from] transport::TransportError),

    #[error("Configuration error: {0}")]
    Config(String),
}
