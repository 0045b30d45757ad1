//! Chatmesh Configuration
//!
//! Configuration structures for a chatmesh node: identity, multicast
//! failure detection, cluster membership, and logging.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

/// Main chatmesh configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatmeshConfig {
    /// Node-specific configuration
    pub node: NodeConfig,

    /// Multicast heartbeat configuration
    #[serde(default)]
    pub multicast: MulticastConfig,

    /// Cluster membership configuration
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique server identifier, stable for the process lifetime
    pub id: String,

    /// Address to bind for the state sync TCP listener
    #[serde(default = "default_sync_bind")]
    pub sync_bind_address: String,
}

/// Multicast heartbeat configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MulticastConfig {
    /// IPv4 multicast group for heartbeat beacons
    #[serde(default = "default_multicast_group")]
    pub group: String,

    /// Multicast port
    #[serde(default = "default_multicast_port")]
    pub port: u16,

    /// Beacon send interval in milliseconds
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Peer eviction timeout in milliseconds
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
}

/// How peer liveness is determined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipMode {
    /// UDP multicast heartbeat discovery
    Multicast,
    /// TCP probing of a static peer list
    Static,
}

impl Default for MembershipMode {
    fn default() -> Self {
        MembershipMode::Multicast
    }
}

/// Cluster membership configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Membership strategy
    #[serde(default)]
    pub mode: MembershipMode,

    /// Static peer list (host:port of each peer's sync listener)
    #[serde(default)]
    pub peers: Vec<String>,

    /// Static-peer probe interval in milliseconds
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,

    /// How long to wait at startup for live peers before giving up
    /// and running with an empty registry
    #[serde(default = "default_discovery_wait_ms")]
    pub discovery_wait_ms: u64,

    /// TCP connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Sync request timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_sync_bind() -> String {
    "0.0.0.0:9750".to_string()
}

fn default_multicast_group() -> String {
    "230.0.0.0".to_string()
}

fn default_multicast_port() -> u16 {
    4446
}

fn default_heartbeat_interval_ms() -> u64 {
    5000
}

fn default_heartbeat_timeout_ms() -> u64 {
    15000
}

fn default_probe_interval_ms() -> u64 {
    10000
}

fn default_discovery_wait_ms() -> u64 {
    8000
}

fn default_connect_timeout_ms() -> u64 {
    3000
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for MulticastConfig {
    fn default() -> Self {
        Self {
            group: default_multicast_group(),
            port: default_multicast_port(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            mode: MembershipMode::default(),
            peers: Vec::new(),
            probe_interval_ms: default_probe_interval_ms(),
            discovery_wait_ms: default_discovery_wait_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl ChatmeshConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: ChatmeshConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.node.id.is_empty() {
            return Err(crate::Error::Config("node.id cannot be empty".into()));
        }

        if self.node.sync_bind_address.is_empty() {
            return Err(crate::Error::Config(
                "node.sync_bind_address cannot be empty".into(),
            ));
        }

        if self.multicast.group.parse::<Ipv4Addr>().is_err() {
            return Err(crate::Error::Config(format!(
                "multicast.group is not a valid IPv4 address: {}",
                self.multicast.group
            )));
        }

        if self.cluster.mode == MembershipMode::Static && self.cluster.peers.is_empty() {
            return Err(crate::Error::Config(
                "cluster.peers cannot be empty in static mode".into(),
            ));
        }

        Ok(())
    }

    /// The sync listener port, extracted from the bind address
    pub fn sync_port(&self) -> crate::Result<u16> {
        self.node
            .sync_bind_address
            .rsplit(':')
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| {
                crate::Error::Config(format!(
                    "node.sync_bind_address has no port: {}",
                    self.node.sync_bind_address
                ))
            })
    }

    /// Get heartbeat send interval as Duration
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.multicast.heartbeat_interval_ms)
    }

    /// Get heartbeat eviction timeout as Duration
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.multicast.heartbeat_timeout_ms)
    }

    /// Get static-peer probe interval as Duration
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.cluster.probe_interval_ms)
    }

    /// Get bootstrap discovery wait window as Duration
    pub fn discovery_wait(&self) -> Duration {
        Duration::from_millis(self.cluster.discovery_wait_ms)
    }

    /// Get TCP connect timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.cluster.connect_timeout_ms)
    }

    /// Get sync request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.cluster.request_timeout_ms)
    }

    /// Generate a sample configuration file
    pub fn sample(node_id: &str) -> String {
        format!(
            r#"[node]
id = "{}"
sync_bind_address = "0.0.0.0:9750"

[multicast]
group = "230.0.0.0"
port = 4446
heartbeat_interval_ms = 5000
heartbeat_timeout_ms = 15000

[cluster]
# "multicast" for UDP heartbeat discovery, "static" for a fixed peer list
mode = "multicast"
peers = []
probe_interval_ms = 10000
discovery_wait_ms = 8000

[logging]
level = "info"
format = "pretty"
"#,
            node_id
        )
    }
}
