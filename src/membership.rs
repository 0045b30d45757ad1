//! Pluggable Membership Sources
//!
//! The replication fan-out only needs one capability: "which peers are
//! live right now, and at what address". Two strategies provide it,
//! multicast heartbeat discovery and static-peer TCP probing, selected
//! by configuration. Both may coexist in a deployment; the message shapes
//! of both transports are preserved either way.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::connector::{PeerProber, StaticPeer};
use crate::heartbeat::LiveView;
use crate::registry::ServerId;

/// The live-peer capability consumed by diff fan-out and bootstrap
#[async_trait]
pub trait MembershipSource: Send + Sync {
    /// Current best-effort mapping of live peer ids to sync-reachable
    /// addresses: connecting to the returned address reaches that peer's
    /// sync listener.
    async fn live_peers(&self) -> HashMap<ServerId, SocketAddr>;
}

/// Membership derived from multicast heartbeat receipt.
///
/// Beacons arrive from an ephemeral UDP source port, so only the host of
/// a sighting is meaningful; every cluster member listens for sync on the
/// same configured port, and addresses are rewritten to it here.
pub struct MulticastMembership {
    view: Arc<LiveView>,
    sync_port: u16,
}

impl MulticastMembership {
    pub fn new(view: Arc<LiveView>, sync_port: u16) -> Self {
        Self { view, sync_port }
    }
}

#[async_trait]
impl MembershipSource for MulticastMembership {
    async fn live_peers(&self) -> HashMap<ServerId, SocketAddr> {
        self.view
            .peers()
            .await
            .into_iter()
            .map(|(id, addr)| (id, SocketAddr::new(addr.ip(), self.sync_port)))
            .collect()
    }
}

/// Membership derived from probing a static peer list. Peers that have
/// not announced a real server id are keyed by a synthetic one.
pub struct StaticMembership {
    prober: Arc<PeerProber>,
}

impl StaticMembership {
    pub fn new(prober: Arc<PeerProber>) -> Self {
        Self { prober }
    }

    async fn resolve(peer: &StaticPeer) -> Option<SocketAddr> {
        if let Some(addr) = peer.socket_addr() {
            return Some(addr);
        }
        match tokio::net::lookup_host(peer.to_string()).await {
            Ok(mut addrs) => addrs.next(),
            Err(e) => {
                tracing::warn!("Failed to resolve peer {}: {}", peer, e);
                None
            }
        }
    }
}

#[async_trait]
impl MembershipSource for StaticMembership {
    async fn live_peers(&self) -> HashMap<ServerId, SocketAddr> {
        let mut peers = HashMap::new();
        for peer in self.prober.alive_peers().await {
            if let Some(addr) = Self::resolve(&peer).await {
                peers.insert(peer.synthetic_id(), addr);
            }
        }
        peers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_multicast_membership_rewrites_to_sync_port() {
        let view = Arc::new(LiveView::new());
        let source = MulticastMembership::new(Arc::clone(&view), 9750);
        assert!(source.live_peers().await.is_empty());

        // Beacon arrives from an ephemeral UDP port
        let udp_src: SocketAddr = "10.0.0.5:53121".parse().unwrap();
        view.record("srv-2".into(), udp_src, 123).await;

        let peers = source.live_peers().await;
        assert_eq!(peers.get("srv-2"), Some(&"10.0.0.5:9750".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_static_membership_resolves_literal_ips() {
        let peer = StaticPeer::parse("10.0.0.7:9750").unwrap();
        let addr = StaticMembership::resolve(&peer).await.unwrap();
        assert_eq!(addr, "10.0.0.7:9750".parse::<SocketAddr>().unwrap());
    }
}
