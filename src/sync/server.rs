//! Sync listener
//!
//! Accepts inbound connections, one spawned handler per connection with
//! no admission control. Sync exchanges serve exactly one request and
//! close; control-plane connections stay open and are drained message by
//! message. An I/O or decode error aborts that connection only.

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use super::protocol::{Envelope, SyncRequest};
use super::{read_message, write_message};
use crate::connector::ControlMessage;
use crate::error::{Error, Result};
use crate::registry::{Diff, Registry};

/// TCP listener serving full dumps and accepting diff pushes
pub struct SyncServer {
    /// Bind address
    bind_address: String,
    /// The local registry served and mutated by handlers
    registry: Arc<Registry>,
    /// Shutdown signal
    shutdown: tokio::sync::watch::Sender<bool>,
}

impl SyncServer {
    pub fn new(bind_address: String, registry: Arc<Registry>) -> Self {
        let (shutdown_tx, _) = tokio::sync::watch::channel(false);

        Self {
            bind_address,
            registry,
            shutdown: shutdown_tx,
        }
    }

    /// Bind the listener and start the accept loop.
    ///
    /// Failure to bind is fatal: a node that cannot serve snapshots would
    /// silently poison the cluster's anti-entropy.
    pub async fn start(&self) -> Result<JoinHandle<()>> {
        let listener = TcpListener::bind(&self.bind_address).await.map_err(|e| {
            Error::Network(format!(
                "Failed to bind sync listener on {}: {}",
                self.bind_address, e
            ))
        })?;
        tracing::info!("Sync listener on {}", self.bind_address);

        let registry = Arc::clone(&self.registry);
        let mut shutdown_rx = self.shutdown.subscribe();

        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((socket, addr)) => {
                                let registry = Arc::clone(&registry);
                                tokio::spawn(async move {
                                    if let Err(e) = handle_connection(socket, &registry).await {
                                        tracing::warn!("Sync connection error from {}: {}", addr, e);
                                    }
                                });
                            }
                            Err(e) => {
                                tracing::error!("Sync accept error: {}", e);
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::info!("Sync listener stopped");
        }))
    }

    /// Stop the accept loop
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Serve one connection. A sync request is one-shot; a control
/// connection keeps delivering messages until the peer hangs up.
async fn handle_connection(socket: TcpStream, registry: &Registry) -> Result<()> {
    let (mut reader, mut writer) = socket.into_split();

    let first: Envelope = read_message(&mut reader).await?;

    match first {
        Envelope::Sync(SyncRequest::FullDump) => {
            tracing::debug!("Sync request: FullDump");
            // snapshot() is atomic across both fact sets
            let snapshot = registry.snapshot().await;
            write_message(&mut writer, &snapshot).await?;
        }
        Envelope::Sync(SyncRequest::DiffPush) => {
            let diff: Diff = read_message(&mut reader).await?;
            tracing::debug!("Applying pushed diff: {}", diff.type_name());
            registry.apply_diff(&diff).await;
            // Nothing is written back for a push
        }
        Envelope::Control(message) => {
            handle_control(message);
            loop {
                match read_message::<Envelope, _>(&mut reader).await {
                    Ok(Envelope::Control(message)) => handle_control(message),
                    Ok(Envelope::Sync(request)) => {
                        // Sync exchanges belong on their own one-shot
                        // connections; don't serve them mid-stream
                        tracing::warn!(
                            "Ignoring {} on a control connection",
                            request.type_name()
                        );
                    }
                    Err(Error::Io(ref e))
                        if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                    {
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }

    Ok(())
}

/// Control-plane messages carry coordination hints for the embedding
/// chat layer; the core records them in the log.
fn handle_control(message: ControlMessage) {
    match &message {
        ControlMessage::ServerJoin { server_id, address } => {
            tracing::info!("Server {} announced itself at {}", server_id, address);
        }
        ControlMessage::UserRegister { username, server_id } => {
            tracing::info!("User {} registered on server {}", username, server_id);
        }
        _ => {
            tracing::debug!("Control message: {}", message.type_name());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::UserFact;
    use crate::sync::SyncClient;
    use std::time::Duration;

    async fn start_on_ephemeral(registry: Arc<Registry>) -> (SyncServer, std::net::SocketAddr, JoinHandle<()>) {
        // Bind first to learn the port, then hand the address to the server
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = probe.local_addr().unwrap();
        drop(probe);

        let server = SyncServer::new(addr.to_string(), registry);
        let handle = server.start().await.unwrap();
        (server, addr, handle)
    }

    fn test_client() -> SyncClient {
        SyncClient::new(Duration::from_secs(1), Duration::from_secs(2))
    }

    #[tokio::test]
    async fn test_full_dump_served() {
        let registry = Arc::new(Registry::new());
        registry
            .apply_diff(&Diff::UserAdded(UserFact::new("alice", "srv-t")))
            .await;

        let (server, addr, _handle) = start_on_ephemeral(Arc::clone(&registry)).await;

        let snapshot = test_client().request_full_dump(addr).await.unwrap();
        assert_eq!(snapshot.users, vec![UserFact::new("alice", "srv-t")]);
        assert!(snapshot.files.is_empty());

        server.stop();
    }

    #[tokio::test]
    async fn test_diff_push_applied() {
        let registry = Arc::new(Registry::new());
        let (server, addr, _handle) = start_on_ephemeral(Arc::clone(&registry)).await;

        let diff = Diff::UserAdded(UserFact::new("bob", "srv-t"));
        test_client().push_diff(addr, &diff).await.unwrap();

        // The push is one-way; give the handler a moment to apply it
        for _ in 0..50 {
            if !registry.is_empty().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(registry.users().await, vec![UserFact::new("bob", "srv-t")]);

        server.stop();
    }

    #[tokio::test]
    async fn test_garbage_connection_does_not_disturb_registry() {
        let registry = Arc::new(Registry::new());
        registry
            .apply_diff(&Diff::UserAdded(UserFact::new("alice", "srv-t")))
            .await;
        let (server, addr, _handle) = start_on_ephemeral(Arc::clone(&registry)).await;

        // A connection that writes junk and hangs up is logged and dropped
        {
            use tokio::io::AsyncWriteExt;
            let mut socket = tokio::net::TcpStream::connect(addr).await.unwrap();
            socket.write_all(b"\xff\xff\xff\xff garbage").await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        // A well-formed request still succeeds afterwards
        let snapshot = test_client().request_full_dump(addr).await.unwrap();
        assert_eq!(snapshot.users.len(), 1);

        server.stop();
    }
}
