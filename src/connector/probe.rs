//! Static-peer liveness prober
//!
//! Periodically attempts a connect-and-close against each configured peer
//! and reports observed up/down transitions over a channel. A probe that
//! cannot connect marks the peer down; there is no partial state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::{PeerEvent, StaticPeer};

/// Probes a fixed peer list and tracks which entries are alive
pub struct PeerProber {
    /// Configured peers
    peers: Vec<StaticPeer>,
    /// Probe interval
    interval: Duration,
    /// Per-probe connect timeout
    connect_timeout: Duration,
    /// Alive flags, keyed by peer
    alive: Arc<RwLock<HashMap<StaticPeer, bool>>>,
    /// Transition events
    events: mpsc::Sender<PeerEvent>,
    /// Running flag
    running: Arc<RwLock<bool>>,
}

impl PeerProber {
    pub fn new(
        peers: Vec<StaticPeer>,
        interval: Duration,
        connect_timeout: Duration,
        events: mpsc::Sender<PeerEvent>,
    ) -> Self {
        let alive = peers.iter().map(|p| (p.clone(), false)).collect();
        Self {
            peers,
            interval,
            connect_timeout,
            alive: Arc::new(RwLock::new(alive)),
            events,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Start the probe loop
    pub async fn start(&self) -> JoinHandle<()> {
        *self.running.write().await = true;

        let peers = self.peers.clone();
        let interval = self.interval;
        let connect_timeout = self.connect_timeout;
        let alive = Arc::clone(&self.alive);
        let events = self.events.clone();
        let running = Arc::clone(&self.running);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            tracing::info!("Peer prober started ({} peers, every {:?})", peers.len(), interval);

            loop {
                ticker.tick().await;

                if !*running.read().await {
                    break;
                }

                for peer in &peers {
                    let up = probe(peer, connect_timeout).await;

                    let transitioned = {
                        let mut alive = alive.write().await;
                        let entry = alive.entry(peer.clone()).or_insert(false);
                        let changed = *entry != up;
                        *entry = up;
                        changed
                    };

                    if transitioned {
                        if up {
                            tracing::info!("Peer {} is up", peer);
                        } else {
                            tracing::warn!("Peer {} went down", peer);
                        }
                        if events.send(PeerEvent { peer: peer.clone(), up }).await.is_err() {
                            // Receiver gone, nobody cares about transitions anymore
                            return;
                        }
                    }
                }
            }

            tracing::info!("Peer prober stopped");
        })
    }

    /// Stop the probe loop
    pub async fn stop(&self) {
        *self.running.write().await = false;
    }

    /// Peers currently believed alive
    pub async fn alive_peers(&self) -> Vec<StaticPeer> {
        let alive = self.alive.read().await;
        alive
            .iter()
            .filter(|(_, up)| **up)
            .map(|(p, _)| p.clone())
            .collect()
    }
}

/// One connect-and-close liveness check
async fn probe(peer: &StaticPeer, connect_timeout: Duration) -> bool {
    let target = format!("{}:{}", peer.host, peer.port);
    matches!(
        timeout(connect_timeout, TcpStream::connect(&target)).await,
        Ok(Ok(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_probe_detects_up_transition() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        // Keep accepting so probes succeed
        tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });

        let peer = StaticPeer::parse(&format!("127.0.0.1:{}", port)).unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let prober = PeerProber::new(
            vec![peer.clone()],
            Duration::from_millis(50),
            Duration::from_millis(200),
            tx,
        );
        let _handle = prober.start().await;

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, PeerEvent { peer: peer.clone(), up: true });
        assert_eq!(prober.alive_peers().await, vec![peer]);

        prober.stop().await;
    }

    #[tokio::test]
    async fn test_probe_detects_down_transition() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept_task = tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });

        let peer = StaticPeer::parse(&format!("127.0.0.1:{}", port)).unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let prober = PeerProber::new(
            vec![peer.clone()],
            Duration::from_millis(50),
            Duration::from_millis(200),
            tx,
        );
        let _handle = prober.start().await;

        // First the peer comes up
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(event.up);

        // Kill the listener; next probe observes the down transition
        accept_task.abort();
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, PeerEvent { peer, up: false });

        prober.stop().await;
    }

    #[tokio::test]
    async fn test_dead_peer_never_reports_up() {
        let probe_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = probe_listener.local_addr().unwrap();
        drop(probe_listener);

        let peer = StaticPeer::parse(&addr.to_string()).unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let prober = PeerProber::new(
            vec![peer],
            Duration::from_millis(30),
            Duration::from_millis(100),
            tx,
        );
        let _handle = prober.start().await;

        let result = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
        assert!(result.is_err(), "no transition expected for a dead peer");

        prober.stop().await;
    }
}
