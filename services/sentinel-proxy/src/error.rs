//! Error types for discovery and forwarding.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::endpoint::EndpointAddress;

/// Invalid `host:port` text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("missing port in address {0:?}")]
    MissingPort(String),

    #[error("invalid port {0:?}")]
    InvalidPort(String),

    #[error("empty host")]
    EmptyHost,
}

/// A sentinel reply that could not be turned into a master address.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplyError {
    /// The byte stream does not follow the reply framing.
    #[error("malformed reply: {0}")]
    Malformed(String),

    /// The reply grew past the decode buffer limit.
    #[error("reply exceeds {0} bytes")]
    TooLarge(usize),

    /// Sentinel answered with an error reply.
    #[error("sentinel error: {0}")]
    Server(String),

    /// Null reply: the sentinel does not monitor this master.
    #[error("master is unknown to sentinel")]
    UnknownMaster,

    /// A complete reply of the wrong shape.
    #[error("unexpected reply: {0}")]
    Unexpected(String),

    /// The reported address is unusable.
    #[error("invalid master address: {0}")]
    InvalidAddress(#[from] AddressError),
}

impl ReplyError {
    /// Whether the connection lost frame sync and must be dropped.
    pub fn is_framing(&self) -> bool {
        matches!(self, ReplyError::Malformed(_) | ReplyError::TooLarge(_))
    }
}

/// How a sentinel client recovers from a failed lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Drop the connection and dial again.
    Reconnect,
    /// Keep the connection and repeat the query.
    Requery,
}

/// A failed master lookup against one sentinel.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("connect failed: {0}")]
    Connect(#[source] io::Error),

    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("query not written within {0:?}")]
    WriteTimeout(Duration),

    #[error("no reply within {0:?}")]
    ReadTimeout(Duration),

    #[error("cannot resolve master {addr}: {source}")]
    Resolve {
        addr: EndpointAddress,
        #[source]
        source: io::Error,
    },

    #[error("connection closed by sentinel")]
    Closed,

    #[error(transparent)]
    Reply(#[from] ReplyError),
}

impl DiscoveryError {
    /// Classify the failure: transport and resolve problems reconnect, bad
    /// answers requery.
    pub fn recovery(&self) -> Recovery {
        match self {
            DiscoveryError::Reply(e) if !e.is_framing() => Recovery::Requery,
            _ => Recovery::Reconnect,
        }
    }
}

/// A forwarding session that never started pumping.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no master address resolved yet")]
    NoMaster,

    #[error("dial {addr} failed: {source}")]
    Dial {
        addr: EndpointAddress,
        #[source]
        source: io::Error,
    },
}
