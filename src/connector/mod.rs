//! Static Peer Directory and Connector
//!
//! Membership and control-plane plumbing for deployments with a known,
//! fixed peer list instead of multicast discovery: a prober that detects
//! up/down transitions, and a connector holding one reusable outbound
//! connection per peer for small tagged control messages.

mod control;
mod probe;

pub use control::{ControlMessage, ServerConnector};
pub use probe::PeerProber;

use std::fmt;
use std::net::SocketAddr;

use crate::error::{Error, Result};

/// One entry in the static peer list
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StaticPeer {
    pub host: String,
    pub port: u16,
}

impl StaticPeer {
    /// Parse a "host:port" string
    pub fn parse(s: &str) -> Result<Self> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::InvalidPeerAddress(s.to_string()))?;
        if host.is_empty() {
            return Err(Error::InvalidPeerAddress(s.to_string()));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| Error::InvalidPeerAddress(s.to_string()))?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// Synthetic server id for a peer whose real id is unknown
    pub fn synthetic_id(&self) -> String {
        format!("peer-{}-{}", self.host, self.port)
    }

    /// Resolve to a socket address, if the host is a literal IP
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        format!("{}:{}", self.host, self.port).parse().ok()
    }
}

impl fmt::Display for StaticPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// An observed liveness transition for a static peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEvent {
    pub peer: StaticPeer,
    /// true = came up, false = went down
    pub up: bool,
}
