//! Live peer view
//!
//! The locally-held, best-effort set of peers believed reachable, derived
//! from recent heartbeat receipt. Entries appear on first beacon, are
//! refreshed on every subsequent beacon, and leave only via the timeout
//! sweep; there is no explicit leave message.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::registry::ServerId;

/// Where and when a peer was last heard from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerSighting {
    /// UDP source address of the last beacon
    pub addr: SocketAddr,
    /// Timestamp carried in the last beacon, epoch millis
    pub last_seen_ms: i64,
}

/// Mapping of server id to last sighting. Shared between the receive loop,
/// the sweep loop, and fan-out readers; all access goes through these
/// methods, the backing map never escapes.
#[derive(Debug, Default)]
pub struct LiveView {
    peers: RwLock<HashMap<ServerId, PeerSighting>>,
}

impl LiveView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a beacon sighting. Unconditional overwrite: the most recent
    /// arrival wins, even if it carries a lower timestamp than the stored
    /// one, so a peer that restarts with a rewound clock still refreshes.
    pub async fn record(&self, server_id: ServerId, addr: SocketAddr, last_seen_ms: i64) {
        let mut peers = self.peers.write().await;
        peers.insert(server_id, PeerSighting { addr, last_seen_ms });
    }

    /// Evict every peer whose last beacon timestamp is older than
    /// `timeout` relative to `now_ms`. The only path by which entries
    /// leave the view.
    pub async fn sweep(&self, now_ms: i64, timeout: Duration) -> Vec<ServerId> {
        let timeout_ms = timeout.as_millis() as i64;
        let mut peers = self.peers.write().await;
        let expired: Vec<ServerId> = peers
            .iter()
            .filter(|(_, s)| now_ms - s.last_seen_ms > timeout_ms)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            peers.remove(id);
        }
        expired
    }

    /// Snapshot of live peer addresses, for sync fan-out
    pub async fn peers(&self) -> HashMap<ServerId, SocketAddr> {
        let peers = self.peers.read().await;
        peers.iter().map(|(id, s)| (id.clone(), s.addr)).collect()
    }

    /// Address of a single live peer, if present
    pub async fn addr_of(&self, server_id: &str) -> Option<SocketAddr> {
        self.peers.read().await.get(server_id).map(|s| s.addr)
    }

    pub async fn contains(&self, server_id: &str) -> bool {
        self.peers.read().await.contains_key(server_id)
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    #[tokio::test]
    async fn test_record_and_read() {
        let view = LiveView::new();
        view.record("srv-1".into(), addr(4000), 1000).await;

        assert!(view.contains("srv-1").await);
        assert_eq!(view.addr_of("srv-1").await, Some(addr(4000)));
        assert_eq!(view.peers().await.len(), 1);
    }

    #[tokio::test]
    async fn test_last_arrival_wins_even_with_lower_timestamp() {
        let view = LiveView::new();
        view.record("srv-1".into(), addr(4000), 2000).await;
        // Restarted peer with a rewound clock
        view.record("srv-1".into(), addr(4001), 500).await;

        assert_eq!(view.addr_of("srv-1").await, Some(addr(4001)));
    }

    #[tokio::test]
    async fn test_sweep_evicts_only_stale_entries() {
        let view = LiveView::new();
        let timeout = Duration::from_millis(15_000);
        view.record("fresh".into(), addr(1), 100_000).await;
        view.record("stale".into(), addr(2), 80_000).await;

        let expired = view.sweep(100_000, timeout).await;
        assert_eq!(expired, vec!["stale".to_string()]);
        assert!(view.contains("fresh").await);
        assert!(!view.contains("stale").await);
    }

    #[tokio::test]
    async fn test_present_until_timeout_elapses() {
        let view = LiveView::new();
        let timeout = Duration::from_millis(15_000);
        view.record("srv-1".into(), addr(1), 0).await;

        // Exactly at the boundary the peer is still live
        assert!(view.sweep(15_000, timeout).await.is_empty());
        assert!(view.contains("srv-1").await);

        // One tick past the boundary it is gone
        assert_eq!(view.sweep(15_001, timeout).await.len(), 1);
        assert!(view.is_empty().await);
    }
}
