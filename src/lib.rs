//! Chatmesh - Distributed Coordination for Multi-Instance Chat Servers
//!
//! Chatmesh keeps a cluster of independently running chat server
//! processes in approximate, continuous agreement on which peers are
//! alive and on a shared set of lightweight facts: which users are
//! connected where, and which files exist on which peer.
//!
//! # Architecture
//!
//! There is no central coordinator. Liveness comes from a UDP-multicast
//! heartbeat failure detector (or, for fixed deployments, a static-peer
//! TCP prober); state comes from a TCP anti-entropy protocol that moves
//! full registry snapshots for bootstrap and single idempotent diffs for
//! eager propagation. Every server holds its own replicated in-memory
//! registry and converges on the cluster-wide view over time.
//!
//! # Features
//!
//! - Heartbeat failure detection over UDP multicast with timeout eviction
//! - Tolerant beacon parsing that survives corrupt or adversarial input
//! - Full-snapshot bootstrap plus incremental diff replication
//! - Idempotent set-based registry, safe under unordered and duplicate
//!   delivery
//! - Pluggable membership: multicast discovery or static peer probing
//! - Control-plane messages (join notices, user registration) multiplexed
//!   over the sync transport

pub mod config;
pub mod connector;
pub mod error;
pub mod heartbeat;
pub mod membership;
pub mod node;
pub mod registry;
pub mod sync;

pub use config::ChatmeshConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{ChatmeshConfig, MembershipMode};
    pub use crate::error::{Error, Result};
    pub use crate::heartbeat::LiveView;
    pub use crate::membership::MembershipSource;
    pub use crate::node::Node;
    pub use crate::registry::{Diff, FileFact, Registry, RegistrySnapshot, ServerId, UserFact};
    pub use crate::sync::{SyncClient, SyncServer};
}
