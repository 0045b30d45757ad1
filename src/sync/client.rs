//! Sync client
//!
//! Outbound side of the anti-entropy protocol. Every call opens a fresh
//! one-shot connection: request a full dump and block for the response, or
//! push a single diff and return without acknowledgment.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;

use super::protocol::{Envelope, SyncRequest};
use super::{read_message, write_message};
use crate::error::{Error, Result};
use crate::registry::{Diff, RegistrySnapshot, ServerId};

/// Client for full-dump requests and diff pushes
#[derive(Debug, Clone)]
pub struct SyncClient {
    /// Connection timeout
    connect_timeout: Duration,
    /// Full-dump request timeout
    request_timeout: Duration,
}

impl SyncClient {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            request_timeout,
        }
    }

    /// Request a complete registry snapshot from a peer.
    ///
    /// Errors (connect, timeout, decode) propagate to the caller; retry
    /// policy, if any, belongs to the caller.
    pub async fn request_full_dump(&self, address: SocketAddr) -> Result<RegistrySnapshot> {
        let result = timeout(self.request_timeout, async {
            let mut stream = self.connect(address).await?;
            let (mut reader, mut writer) = stream.split();

            write_message(&mut writer, &Envelope::Sync(SyncRequest::FullDump)).await?;
            read_message(&mut reader).await
        })
        .await;

        match result {
            Ok(inner) => inner,
            Err(_) => Err(Error::ConnectionTimeout(address.to_string())),
        }
    }

    /// Push one diff to a peer, fire-and-forget.
    ///
    /// The error is returned for the caller to log; nothing is awaited
    /// from the peer.
    pub async fn push_diff(&self, address: SocketAddr, diff: &Diff) -> Result<()> {
        let mut stream = self.connect(address).await?;
        let (_, mut writer) = stream.split();

        write_message(&mut writer, &Envelope::Sync(SyncRequest::DiffPush)).await?;
        write_message(&mut writer, diff).await?;
        Ok(())
    }

    /// Push one diff to every live peer independently.
    ///
    /// One peer's failure never blocks or aborts delivery to the others,
    /// and no failure reaches the local mutation path. Returns how many
    /// peers were reached.
    pub async fn broadcast_diff(&self, peers: &HashMap<ServerId, SocketAddr>, diff: &Diff) -> usize {
        let mut delivered = 0;

        for (peer_id, addr) in peers {
            match self.push_diff(*addr, diff).await {
                Ok(()) => {
                    tracing::debug!("Pushed {} to {} at {}", diff.type_name(), peer_id, addr);
                    delivered += 1;
                }
                Err(e) => {
                    tracing::warn!("Failed to push {} to {}: {}", diff.type_name(), peer_id, e);
                }
            }
        }

        delivered
    }

    async fn connect(&self, address: SocketAddr) -> Result<TcpStream> {
        let result = timeout(self.connect_timeout, TcpStream::connect(address)).await;

        match result {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true)?;
                Ok(stream)
            }
            Ok(Err(e)) => Err(Error::ConnectionFailed {
                address: address.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(Error::ConnectionTimeout(address.to_string())),
        }
    }
}
