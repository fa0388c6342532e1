//! Dial targets

use crate::error::DialError;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

/// Transport networks the dialer accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    Tcp,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Tcp => "tcp",
        }
    }
}

impl FromStr for Network {
    type Err = DialError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Network::Tcp),
            other => Err(DialError::UnsupportedNetwork(other.to_string())),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved address inside the private network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetAddress {
    pub network: Network,
    pub addr: SocketAddr,
}

impl TargetAddress {
    pub fn new(network: Network, addr: SocketAddr) -> Self {
        Self { network, addr }
    }

    pub fn ip(&self) -> IpAddr {
        self.addr.ip()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Resolve `address` (`ip:port` or `host:port`) into a target
    ///
    /// IP literals are taken as-is. Host names go through the system resolver
    /// and IPv4 results are preferred.
    pub async fn resolve(network: Network, address: &str) -> Result<Self, DialError> {
        if let Ok(addr) = address.parse::<SocketAddr>() {
            return Ok(Self::new(network, addr));
        }

        let resolution_error = |source: std::io::Error| DialError::AddressResolution {
            address: address.to_string(),
            source,
        };

        let addrs: Vec<SocketAddr> = tokio::net::lookup_host(address)
            .await
            .map_err(resolution_error)?
            .collect();

        addrs
            .iter()
            .find(|addr| addr.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .map(|addr| Self::new(network, addr))
            .ok_or_else(|| {
                resolution_error(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no addresses found",
                ))
            })
    }
}

impl fmt::Display for TargetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.network, self.addr)
    }
}
