//! Control-plane messages and the pooled connector
//!
//! A simpler sibling of the sync protocol for control traffic between
//! servers: join notices and user-registration broadcasts. Unlike the
//! one-shot sync connections, the connector keeps one reusable outbound
//! connection per peer and recreates it when found dead.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;

use super::StaticPeer;
use crate::error::{Error, Result};
use crate::sync::{write_message, Envelope};

/// Small tagged control messages exchanged between servers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlMessage {
    Ping,
    Pong,
    /// A server announces itself to a peer
    ServerJoin { server_id: String, address: String },
    /// Broadcast of a newly registered user
    UserRegister { username: String, server_id: String },
    /// Ask a peer for its user list
    SyncUsers,
    /// Ask a peer for its file metadata
    SyncFiles,
}

impl ControlMessage {
    /// Get the message type name (for logging)
    pub fn type_name(&self) -> &'static str {
        match self {
            ControlMessage::Ping => "Ping",
            ControlMessage::Pong => "Pong",
            ControlMessage::ServerJoin { .. } => "ServerJoin",
            ControlMessage::UserRegister { .. } => "UserRegister",
            ControlMessage::SyncUsers => "SyncUsers",
            ControlMessage::SyncFiles => "SyncFiles",
        }
    }
}

/// Maintains one reusable outbound connection per peer
pub struct ServerConnector {
    /// Connection pool: peer -> connection
    pool: RwLock<HashMap<StaticPeer, Arc<Mutex<TcpStream>>>>,
    /// Connection timeout
    connect_timeout: Duration,
}

impl ServerConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            pool: RwLock::new(HashMap::new()),
            connect_timeout,
        }
    }

    /// Send a control message over the pooled connection, reconnecting
    /// once if the cached connection turns out to be dead.
    pub async fn send(&self, peer: &StaticPeer, message: &ControlMessage) -> Result<()> {
        let envelope = Envelope::Control(message.clone());

        if let Some(conn) = self.get_connection(peer).await {
            let mut stream = conn.lock().await;
            match write_message(&mut *stream, &envelope).await {
                Ok(()) => {
                    tracing::trace!("Sent {} to {}", message.type_name(), peer);
                    return Ok(());
                }
                Err(e) => {
                    tracing::debug!("Pooled connection to {} is dead ({}), reconnecting", peer, e);
                    drop(stream);
                    self.remove_connection(peer).await;
                }
            }
        }

        let conn = self.create_connection(peer).await?;
        let mut stream = conn.lock().await;
        write_message(&mut *stream, &envelope).await?;
        tracing::trace!("Sent {} to {} on fresh connection", message.type_name(), peer);
        Ok(())
    }

    async fn get_connection(&self, peer: &StaticPeer) -> Option<Arc<Mutex<TcpStream>>> {
        self.pool.read().await.get(peer).cloned()
    }

    async fn create_connection(&self, peer: &StaticPeer) -> Result<Arc<Mutex<TcpStream>>> {
        let target = peer.to_string();
        let stream = match timeout(self.connect_timeout, TcpStream::connect(&target)).await {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => {
                return Err(Error::ConnectionFailed {
                    address: target,
                    reason: e.to_string(),
                })
            }
            Err(_) => return Err(Error::ConnectionTimeout(target)),
        };
        stream.set_nodelay(true)?;

        let conn = Arc::new(Mutex::new(stream));
        self.pool
            .write()
            .await
            .insert(peer.clone(), Arc::clone(&conn));
        Ok(conn)
    }

    async fn remove_connection(&self, peer: &StaticPeer) {
        self.pool.write().await.remove(peer);
    }

    /// Close every pooled connection
    pub async fn close_all(&self) {
        self.pool.write().await.clear();
    }

    /// Number of pooled connections
    pub async fn connection_count(&self) -> usize {
        self.pool.read().await.len()
    }
}
