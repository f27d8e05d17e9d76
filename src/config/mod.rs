//! Configuration management

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Relay configuration
    #[serde(default)]
    pub relay: RelayConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, crate::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), crate::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| crate::Error::Config(format!("Failed to write config: {}", e)))
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub listen: String,
    /// Disable Nagle's algorithm on the accepted carrier socket
    pub websocket_tcp_no_delay: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: format!("127.0.0.1:{}", crate::DEFAULT_PORT),
            websocket_tcp_no_delay: false,
        }
    }
}

/// Relay configuration: the immutable policy bundle consumed by every
/// connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Reject UDP streams with BLOCKED
    pub disable_udp: bool,
    /// Size of each of the two read buffers per stream
    pub tcp_buffer_size: usize,
    /// Initial and refresh credit advertised via CONTINUE; also the
    /// inbound queue capacity per stream
    pub buffer_remaining_length: u32,
    /// Disable Nagle's algorithm on outbound TCP sockets
    pub tcp_no_delay: bool,
    /// Exact-match hostname denylist
    pub blacklist: HostList,
    /// Exact-match hostnames that bypass the DNS override
    pub whitelist: HostList,
    /// SOCKS5 egress proxy as `host:port`, empty for direct dialing.
    /// A configured proxy also forces UDP streams to be BLOCKED.
    pub proxy: String,
    /// UDP DNS resolver for non-whitelisted hostnames, empty for the OS
    /// default resolver
    pub dns_server: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            disable_udp: false,
            tcp_buffer_size: 65536,
            buffer_remaining_length: 128,
            tcp_no_delay: false,
            blacklist: HostList::default(),
            whitelist: HostList::default(),
            proxy: String::new(),
            dns_server: String::new(),
        }
    }
}

/// A set of exact-match hostnames
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostList {
    pub hostnames: HashSet<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log filter (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
