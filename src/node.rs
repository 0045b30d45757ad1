//! Node assembly
//!
//! Wires the registry, failure detection, sync transport, and connector
//! into one running server and exposes the collaborator-facing API the
//! chat layer calls: report a local change, query the merged view.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::config::{ChatmeshConfig, MembershipMode};
use crate::connector::{ControlMessage, PeerEvent, PeerProber, ServerConnector, StaticPeer};
use crate::error::Result;
use crate::heartbeat::{HeartbeatReceiver, HeartbeatSender, LiveView};
use crate::membership::{MembershipSource, MulticastMembership, StaticMembership};
use crate::registry::{Diff, FileFact, Registry, UserFact};
use crate::sync::{SyncClient, SyncServer};

/// Mode-specific machinery
enum Detector {
    Multicast {
        sender: HeartbeatSender,
        receiver: HeartbeatReceiver,
    },
    Static {
        prober: Arc<PeerProber>,
        connector: Arc<ServerConnector>,
        events: Mutex<Option<mpsc::Receiver<PeerEvent>>>,
    },
}

/// A chatmesh node: one server instance's coordination layer
pub struct Node {
    config: ChatmeshConfig,
    registry: Arc<Registry>,
    sync_client: SyncClient,
    sync_server: SyncServer,
    membership: Arc<dyn MembershipSource>,
    detector: Detector,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Node {
    /// Build a node from configuration. No sockets are touched until
    /// `start`.
    pub fn new(config: ChatmeshConfig) -> Result<Self> {
        config.validate()?;
        let sync_port = config.sync_port()?;

        let registry = Arc::new(Registry::new());
        let sync_client = SyncClient::new(config.connect_timeout(), config.request_timeout());
        let sync_server = SyncServer::new(
            config.node.sync_bind_address.clone(),
            Arc::clone(&registry),
        );

        let (membership, detector): (Arc<dyn MembershipSource>, Detector) = match config.cluster.mode
        {
            MembershipMode::Multicast => {
                let group = config
                    .multicast
                    .group
                    .parse()
                    .map_err(|_| crate::Error::Config("invalid multicast group".into()))?;
                let view = Arc::new(LiveView::new());

                let sender = HeartbeatSender::new(
                    config.node.id.clone(),
                    group,
                    config.multicast.port,
                    config.heartbeat_interval(),
                );
                let receiver = HeartbeatReceiver::new(
                    config.node.id.clone(),
                    group,
                    config.multicast.port,
                    config.heartbeat_timeout(),
                    Arc::clone(&view),
                );

                (
                    Arc::new(MulticastMembership::new(view, sync_port)) as Arc<dyn MembershipSource>,
                    Detector::Multicast { sender, receiver },
                )
            }
            MembershipMode::Static => {
                let peers = config
                    .cluster
                    .peers
                    .iter()
                    .map(|s| StaticPeer::parse(s))
                    .collect::<Result<Vec<_>>>()?;

                let (events_tx, events_rx) = mpsc::channel(64);
                let prober = Arc::new(PeerProber::new(
                    peers,
                    config.probe_interval(),
                    config.connect_timeout(),
                    events_tx,
                ));
                let connector = Arc::new(ServerConnector::new(config.connect_timeout()));

                (
                    Arc::new(StaticMembership::new(Arc::clone(&prober))) as Arc<dyn MembershipSource>,
                    Detector::Static {
                        prober,
                        connector,
                        events: Mutex::new(Some(events_rx)),
                    },
                )
            }
        };

        Ok(Self {
            config,
            registry,
            sync_client,
            sync_server,
            membership,
            detector,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Start all background loops and run the bootstrap anti-entropy
    /// pass. Local resource failures (cannot bind the sync listener or
    /// the multicast socket) are fatal; an unreachable cluster is not —
    /// the node then runs with an empty registry.
    pub async fn start(&self) -> Result<()> {
        tracing::info!("Starting chatmesh node {}", self.config.node.id);

        let mut tasks = Vec::new();
        tasks.push(self.sync_server.start().await?);

        match &self.detector {
            Detector::Multicast { sender, receiver } => {
                let (recv_handle, sweep_handle) = receiver.start().await?;
                tasks.push(recv_handle);
                tasks.push(sweep_handle);
                tasks.push(sender.start().await?);
            }
            Detector::Static {
                prober,
                connector,
                events,
            } => {
                tasks.push(prober.start().await);
                let events_rx = events
                    .lock()
                    .await
                    .take()
                    .ok_or_else(|| crate::Error::Internal("node already started".into()))?;
                tasks.push(self.spawn_peer_event_loop(events_rx, Arc::clone(connector)));
            }
        }

        self.tasks.lock().await.extend(tasks);

        self.bootstrap().await;
        tracing::info!("Node {} started", self.config.node.id);
        Ok(())
    }

    /// React to static-peer transitions: announce ourselves to a peer
    /// that came up and pull a snapshot from it.
    fn spawn_peer_event_loop(
        &self,
        mut events: mpsc::Receiver<PeerEvent>,
        connector: Arc<ServerConnector>,
    ) -> JoinHandle<()> {
        let server_id = self.config.node.id.clone();
        let own_address = self.config.node.sync_bind_address.clone();
        let registry = Arc::clone(&self.registry);
        let sync_client = self.sync_client.clone();

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if !event.up {
                    continue;
                }

                let join = ControlMessage::ServerJoin {
                    server_id: server_id.clone(),
                    address: own_address.clone(),
                };
                if let Err(e) = connector.send(&event.peer, &join).await {
                    tracing::warn!("Join notice to {} failed: {}", event.peer, e);
                }

                let Some(addr) = event.peer.socket_addr() else {
                    tracing::warn!("Cannot resolve {} for snapshot pull", event.peer);
                    continue;
                };
                match sync_client.request_full_dump(addr).await {
                    Ok(snapshot) => {
                        tracing::info!(
                            "Pulled snapshot from {} ({} users, {} files)",
                            event.peer,
                            snapshot.users.len(),
                            snapshot.files.len()
                        );
                        registry.integrate_snapshot(snapshot).await;
                    }
                    Err(e) => {
                        tracing::warn!("Snapshot pull from {} failed: {}", event.peer, e);
                    }
                }
            }
        })
    }

    /// Bounded best-effort bootstrap: wait for the membership source to
    /// produce at least one live peer, then attempt one snapshot pull per
    /// peer. Giving up is not an error; queries then degrade to locally
    /// known facts until anti-entropy catches up.
    async fn bootstrap(&self) {
        let deadline = tokio::time::Instant::now() + self.config.discovery_wait();

        let peers = loop {
            let peers = self.membership.live_peers().await;
            if !peers.is_empty() {
                break peers;
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::info!(
                    "No live peers within {:?}, starting with an empty registry",
                    self.config.discovery_wait()
                );
                return;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        };

        for (peer_id, addr) in peers {
            match self.sync_client.request_full_dump(addr).await {
                Ok(snapshot) => {
                    tracing::info!(
                        "Bootstrapped from {} ({} users, {} files)",
                        peer_id,
                        snapshot.users.len(),
                        snapshot.files.len()
                    );
                    self.registry.integrate_snapshot(snapshot).await;
                }
                Err(e) => {
                    tracing::warn!("Bootstrap pull from {} failed: {}", peer_id, e);
                }
            }
        }
    }

    /// Apply a fact locally, then push it to every live peer. Peer
    /// failures are logged inside the broadcast; the local change always
    /// succeeds.
    async fn apply_and_broadcast(&self, diff: Diff) {
        self.registry.apply_diff(&diff).await;

        let peers = self.membership.live_peers().await;
        let delivered = self.sync_client.broadcast_diff(&peers, &diff).await;
        tracing::debug!(
            "{} applied locally, delivered to {}/{} peers",
            diff.type_name(),
            delivered,
            peers.len()
        );
    }

    /// A user connected to this server
    pub async fn on_local_user_connect(&self, username: &str) {
        let fact = UserFact::new(username, self.config.node.id.clone());
        self.apply_and_broadcast(Diff::UserAdded(fact)).await;
    }

    /// A user disconnected from this server
    pub async fn on_local_user_disconnect(&self, username: &str) {
        let fact = UserFact::new(username, self.config.node.id.clone());
        self.apply_and_broadcast(Diff::UserRemoved(fact)).await;
    }

    /// A file was stored on this server
    pub async fn on_local_file_stored(&self, filename: &str, checksum: &str) {
        let fact = FileFact::new(filename, self.config.node.id.clone(), checksum);
        self.apply_and_broadcast(Diff::FileAdded(fact)).await;
    }

    /// A file was deleted from this server
    pub async fn on_local_file_removed(&self, filename: &str, checksum: &str) {
        let fact = FileFact::new(filename, self.config.node.id.clone(), checksum);
        self.apply_and_broadcast(Diff::FileRemoved(fact)).await;
    }

    /// Users currently online anywhere in the cluster, as far as this
    /// node knows
    pub async fn online_users(&self) -> Vec<UserFact> {
        self.registry.users().await
    }

    /// Files known anywhere in the cluster, as far as this node knows
    pub async fn known_files(&self) -> Vec<FileFact> {
        self.registry.files().await
    }

    /// This node's server id
    pub fn server_id(&self) -> &str {
        &self.config.node.id
    }

    /// The registry, for direct read access by embedding code
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// The membership source in use
    pub fn membership(&self) -> Arc<dyn MembershipSource> {
        Arc::clone(&self.membership)
    }

    /// Stop all background loops and abort their tasks
    pub async fn stop(&self) {
        tracing::info!("Stopping node {}", self.config.node.id);

        self.sync_server.stop();
        match &self.detector {
            Detector::Multicast { sender, receiver } => {
                sender.stop().await;
                receiver.stop().await;
            }
            Detector::Static {
                prober, connector, ..
            } => {
                prober.stop().await;
                connector.close_all().await;
            }
        }

        // Loops observe their stop flags within a bounded interval;
        // aborting afterwards just reclaims the tasks promptly
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistrySnapshot;
    use tokio::net::TcpListener;

    async fn free_addr() -> std::net::SocketAddr {
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = probe.local_addr().unwrap();
        drop(probe);
        addr
    }

    fn static_config(id: &str, bind: &str, peers: Vec<String>) -> ChatmeshConfig {
        let peer_list = peers
            .iter()
            .map(|p| format!("\"{}\"", p))
            .collect::<Vec<_>>()
            .join(", ");
        ChatmeshConfig::from_str(&format!(
            r#"
[node]
id = "{}"
sync_bind_address = "{}"

[cluster]
mode = "static"
peers = [{}]
probe_interval_ms = 50
discovery_wait_ms = 2000
connect_timeout_ms = 300
request_timeout_ms = 1000
"#,
            id, bind, peer_list
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_local_mutation_with_no_peers_succeeds() {
        let bind = free_addr().await;
        // One dead peer so static-mode validation passes
        let dead = free_addr().await;
        let config = static_config("srv-solo", &bind.to_string(), vec![dead.to_string()]);

        let node = Node::new(config).unwrap();
        node.start().await.unwrap();

        node.on_local_user_connect("alice").await;
        node.on_local_file_stored("notes.txt", "c0ffee").await;

        assert_eq!(node.online_users().await, vec![UserFact::new("alice", "srv-solo")]);
        assert_eq!(node.known_files().await.len(), 1);

        node.on_local_user_disconnect("alice").await;
        assert!(node.online_users().await.is_empty());

        node.stop().await;
    }

    #[tokio::test]
    async fn test_end_to_end_snapshot_between_two_nodes() {
        // Node T comes up first and registers a local user
        let t_bind = free_addr().await;
        let s_bind = free_addr().await;

        let t_config = static_config("T", &t_bind.to_string(), vec![s_bind.to_string()]);
        let node_t = Node::new(t_config).unwrap();
        node_t.start().await.unwrap();
        node_t.on_local_user_connect("alice").await;

        // Node S starts with T as its only peer; the prober sees T up
        // and pulls a snapshot
        let s_config = static_config("S", &s_bind.to_string(), vec![t_bind.to_string()]);
        let node_s = Node::new(s_config).unwrap();
        node_s.start().await.unwrap();

        let mut found = false;
        for _ in 0..100 {
            if node_s
                .online_users()
                .await
                .contains(&UserFact::new("alice", "T"))
            {
                found = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(found, "S never learned about alice@T");

        node_t.stop().await;
        node_s.stop().await;
    }

    #[tokio::test]
    async fn test_diff_propagates_between_two_nodes() {
        let a_bind = free_addr().await;
        let b_bind = free_addr().await;

        let node_a = Node::new(static_config("A", &a_bind.to_string(), vec![b_bind.to_string()]))
            .unwrap();
        let node_b = Node::new(static_config("B", &b_bind.to_string(), vec![a_bind.to_string()]))
            .unwrap();
        node_a.start().await.unwrap();
        node_b.start().await.unwrap();

        // Wait until A's prober sees B
        for _ in 0..100 {
            if !node_a.membership().live_peers().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        node_a.on_local_user_connect("carol").await;

        let mut found = false;
        for _ in 0..100 {
            if node_b
                .online_users()
                .await
                .contains(&UserFact::new("carol", "A"))
            {
                found = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(found, "B never received carol@A");

        node_a.stop().await;
        node_b.stop().await;
    }

    #[tokio::test]
    async fn test_stale_snapshot_replaces_fresher_state() {
        // The documented consistency gap: a full dump installed after a
        // local diff erases the newer local knowledge.
        let bind = free_addr().await;
        let dead = free_addr().await;
        let node = Node::new(static_config("G", &bind.to_string(), vec![dead.to_string()]))
            .unwrap();

        node.on_local_user_connect("fresh").await;
        node.registry()
            .integrate_snapshot(RegistrySnapshot::default())
            .await;
        assert!(node.online_users().await.is_empty());
    }
}
