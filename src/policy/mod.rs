//! Egress policy predicates
//!
//! Stateless checks over the immutable relay configuration: hostname
//! deny/allow lists, the DNS override resolver, SOCKS5 proxy selection
//! and the UDP gate. Built once per connection and shared by every
//! stream dial.

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};

use tracing::warn;

use crate::config::RelayConfig;

const DNS_PORT: u16 = 53;

/// Immutable policy bundle derived from [`RelayConfig`]
#[derive(Debug, Clone)]
pub struct Policy {
    blacklist: HashSet<String>,
    whitelist: HashSet<String>,
    dns_server: Option<SocketAddr>,
    proxy: Option<String>,
    udp_enabled: bool,
}

impl Policy {
    pub fn from_config(config: &RelayConfig) -> Self {
        let proxy = if config.proxy.is_empty() {
            None
        } else {
            Some(config.proxy.clone())
        };

        Self {
            blacklist: config.blacklist.hostnames.clone(),
            whitelist: config.whitelist.hostnames.clone(),
            dns_server: parse_resolver_addr(&config.dns_server),
            // a SOCKS5 proxy cannot carry UDP flows, so a configured proxy
            // disables UDP as well
            udp_enabled: !config.disable_udp && proxy.is_none(),
            proxy,
        }
    }

    /// Exact-match denylist check
    pub fn is_blacklisted(&self, hostname: &str) -> bool {
        self.blacklist.contains(hostname)
    }

    /// Exact-match check for hostnames that bypass the DNS override
    pub fn is_whitelisted(&self, hostname: &str) -> bool {
        self.whitelist.contains(hostname)
    }

    /// The resolver to use for non-whitelisted hostnames, if configured
    pub fn dns_override(&self) -> Option<SocketAddr> {
        self.dns_server
    }

    /// The SOCKS5 egress proxy for TCP streams, if configured
    pub fn socks_proxy(&self) -> Option<&str> {
        self.proxy.as_deref()
    }

    /// Whether UDP streams may be dialed at all
    pub fn udp_allowed(&self) -> bool {
        self.udp_enabled
    }
}

/// Accepts `ip:port`, `[v6]:port` or a bare IP (port 53 implied).
fn parse_resolver_addr(value: &str) -> Option<SocketAddr> {
    if value.is_empty() {
        return None;
    }
    if let Ok(addr) = value.parse::<SocketAddr>() {
        return Some(addr);
    }
    if let Ok(ip) = value.parse::<IpAddr>() {
        return Some(SocketAddr::new(ip, DNS_PORT));
    }
    warn!(dns_server = value, "unparseable dns_server, override disabled");
    None
}
