//! Heartbeat sender
//!
//! Broadcasts a liveness beacon over UDP multicast on a fixed interval.
//! Fire-and-forget: no acknowledgment, no retry. A failed send is logged
//! and skipped; the next beacon covers for it.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use super::beacon::format_beacon;
use crate::error::{Error, Result};

/// Periodic multicast beacon sender
pub struct HeartbeatSender {
    /// This node's server id
    server_id: String,
    /// Multicast group address
    group: Ipv4Addr,
    /// Multicast port
    port: u16,
    /// Beacon interval
    interval: Duration,
    /// Running flag
    running: Arc<RwLock<bool>>,
}

impl HeartbeatSender {
    pub fn new(server_id: String, group: Ipv4Addr, port: u16, interval: Duration) -> Self {
        Self {
            server_id,
            group,
            port,
            interval,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Start the beacon loop. Returns the task handle.
    pub async fn start(&self) -> Result<JoinHandle<()>> {
        *self.running.write().await = true;

        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| Error::Network(format!("Failed to bind heartbeat send socket: {}", e)))?;

        let target: SocketAddr = (self.group, self.port).into();
        let server_id = self.server_id.clone();
        let interval = self.interval;
        let running = Arc::clone(&self.running);

        Ok(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            tracing::info!("Heartbeat sender started ({} every {:?})", target, interval);

            loop {
                ticker.tick().await;

                if !*running.read().await {
                    break;
                }

                let payload = format_beacon(&server_id, chrono::Utc::now().timestamp_millis());

                if let Err(e) = socket.send_to(payload.as_bytes(), target).await {
                    tracing::warn!("Heartbeat send failed: {}", e);
                } else {
                    tracing::trace!("Heartbeat sent: {}", payload);
                }
            }

            tracing::info!("Heartbeat sender stopped");
        }))
    }

    /// Stop the beacon loop
    pub async fn stop(&self) {
        *self.running.write().await = false;
    }
}
