//! Heartbeat receiver and timeout sweep
//!
//! Joins the multicast group, parses each inbound datagram tolerantly and
//! refreshes the live view; a companion sweep task evicts peers that have
//! gone quiet for longer than the timeout. Malformed datagrams are
//! discarded without comment; the receiver must never crash on corrupt or
//! adversarial input.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use super::beacon::parse_beacon;
use super::live_view::LiveView;
use crate::error::{Error, Result};

/// Multicast heartbeat listener feeding the live view
pub struct HeartbeatReceiver {
    /// This node's server id (own beacons are skipped)
    server_id: String,
    /// Multicast group address
    group: Ipv4Addr,
    /// Multicast port
    port: u16,
    /// Peer eviction timeout
    timeout: Duration,
    /// Live-peer view updated by the receive loop
    view: Arc<LiveView>,
    /// Running flag
    running: Arc<RwLock<bool>>,
}

impl HeartbeatReceiver {
    pub fn new(
        server_id: String,
        group: Ipv4Addr,
        port: u16,
        timeout: Duration,
        view: Arc<LiveView>,
    ) -> Self {
        Self {
            server_id,
            group,
            port,
            timeout,
            view,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Start the receive loop and the timeout sweep.
    ///
    /// Failing to bind or join the multicast group is fatal: without a
    /// working receiver this node would never learn any peer.
    pub async fn start(&self) -> Result<(JoinHandle<()>, JoinHandle<()>)> {
        *self.running.write().await = true;

        let socket = UdpSocket::bind(("0.0.0.0", self.port))
            .await
            .map_err(|e| {
                Error::Network(format!(
                    "Failed to bind multicast listener on port {}: {}",
                    self.port, e
                ))
            })?;
        socket
            .join_multicast_v4(self.group, Ipv4Addr::UNSPECIFIED)
            .map_err(|e| {
                Error::Network(format!("Failed to join multicast group {}: {}", self.group, e))
            })?;

        tracing::info!("Heartbeat receiver joined {}:{}", self.group, self.port);

        let receiver_handle = self.start_receive_loop(socket).await;
        let sweep_handle = self.start_sweep_loop().await;

        Ok((receiver_handle, sweep_handle))
    }

    async fn start_receive_loop(&self, socket: UdpSocket) -> JoinHandle<()> {
        let own_id = self.server_id.clone();
        let view = Arc::clone(&self.view);
        let running = Arc::clone(&self.running);

        tokio::spawn(async move {
            let mut buf = [0u8; 512];

            loop {
                if !*running.read().await {
                    break;
                }

                // Bounded recv so the running flag is observed
                let recv_result =
                    tokio::time::timeout(Duration::from_secs(1), socket.recv_from(&mut buf)).await;

                let (len, src) = match recv_result {
                    Ok(Ok((len, src))) => (len, src),
                    Ok(Err(e)) => {
                        tracing::trace!("Heartbeat recv error: {}", e);
                        continue;
                    }
                    Err(_) => continue, // timeout, re-check running flag
                };

                let payload = match std::str::from_utf8(&buf[..len]) {
                    Ok(s) => s,
                    Err(_) => continue,
                };

                let (peer_id, last_seen_ms) = match parse_beacon(payload) {
                    Some(parsed) => parsed,
                    None => {
                        tracing::trace!("Discarding malformed beacon from {}", src);
                        continue;
                    }
                };

                // Skip our own beacons
                if peer_id == own_id {
                    continue;
                }

                if !view.contains(&peer_id).await {
                    tracing::info!("Peer {} is live at {}", peer_id, src);
                }
                view.record(peer_id, src, last_seen_ms).await;
            }

            tracing::info!("Heartbeat receiver stopped");
        })
    }

    async fn start_sweep_loop(&self) -> JoinHandle<()> {
        let view = Arc::clone(&self.view);
        let timeout = self.timeout;
        let running = Arc::clone(&self.running);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(timeout);
            ticker.tick().await; // first tick fires immediately, skip it

            loop {
                ticker.tick().await;

                if !*running.read().await {
                    break;
                }

                let now_ms = chrono::Utc::now().timestamp_millis();
                let expired = view.sweep(now_ms, timeout).await;
                for peer_id in expired {
                    tracing::warn!("Peer {} timed out, evicted from live view", peer_id);
                }
            }
        })
    }

    /// Stop both loops. The receive loop unblocks within its recv timeout.
    pub async fn stop(&self) {
        *self.running.write().await = false;
    }

    /// The live view this receiver maintains
    pub fn view(&self) -> Arc<LiveView> {
        Arc::clone(&self.view)
    }
}
