//! Host/port addresses for sentinels and Redis nodes.

use std::fmt;
use std::str::FromStr;

use crate::error::AddressError;

/// Host used when a listen address omits the host part (`:9999`).
pub const DEFAULT_LISTEN_HOST: &str = "0.0.0.0";

/// Host used when a sentinel address omits the host part (`:26379`).
pub const DEFAULT_DIAL_HOST: &str = "127.0.0.1";

/// An immutable (host, port) pair.
///
/// The host is kept as text so sentinels configured with hostname
/// announcements resolve at dial time rather than at report time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointAddress {
    host: String,
    port: u16,
}

impl EndpointAddress {
    /// Create an address, rejecting an empty host.
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, AddressError> {
        let host = host.into();
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(AddressError::EmptyHost);
        }
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// Parse `host:port`, substituting `default_host` when the host is empty.
    pub fn parse_with_default_host(s: &str, default_host: &str) -> Result<Self, AddressError> {
        let (host, port) = split_host_port(s)?;
        let host = if host.is_empty() { default_host } else { host };
        Self::new(host, port)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The `(host, port)` pair accepted by tokio's connect and bind calls.
    pub fn as_pair(&self) -> (&str, u16) {
        (&self.host, self.port)
    }
}

impl FromStr for EndpointAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = split_host_port(s)?;
        Self::new(host, port)
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

fn split_host_port(s: &str) -> Result<(&str, u16), AddressError> {
    let s = s.trim();
    let (host, port) = s
        .rsplit_once(':')
        .ok_or_else(|| AddressError::MissingPort(s.to_string()))?;
    if port.is_empty() {
        return Err(AddressError::MissingPort(s.to_string()));
    }
    let port = port
        .parse::<u16>()
        .map_err(|_| AddressError::InvalidPort(port.to_string()))?;
    Ok((host, port))
}
