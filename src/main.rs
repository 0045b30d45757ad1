//! Chatmesh - Distributed Coordination for Multi-Instance Chat Servers
//!
//! Runs the coordination layer standalone: failure detection, state
//! sync, and the replicated registry, ready for a chat server to embed.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chatmesh::config::ChatmeshConfig;
use chatmesh::error::Result;
use chatmesh::node::Node;

/// Chatmesh - Distributed Coordination for Multi-Instance Chat Servers
#[derive(Parser)]
#[command(name = "chatmesh")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "chatmesh.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the chatmesh node
    Start,

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "chatmesh.toml")]
        output: PathBuf,

        /// Server ID
        #[arg(long, default_value = "srv-1")]
        server_id: String,
    },

    /// Validate configuration file
    Validate,

    /// Show node configuration summary
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(&cli.log_level);

    match cli.command {
        Commands::Start => run_start(cli.config).await,
        Commands::Init { output, server_id } => run_init(output, server_id),
        Commands::Validate => run_validate(cli.config),
        Commands::Info => run_info(cli.config),
    }
}

/// Initialize logging
fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Start the chatmesh node
async fn run_start(config_path: PathBuf) -> Result<()> {
    tracing::info!("Starting chatmesh node...");

    let config = match ChatmeshConfig::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load configuration from {:?}: {}", config_path, e);
            tracing::error!("Please check that the config file exists and is valid TOML");
            return Err(e);
        }
    };
    tracing::info!("Loaded configuration for node: {}", config.node.id);

    let node = Node::new(config)?;
    node.start().await?;

    // Run until interrupted
    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupt received, shutting down");
    node.stop().await;

    Ok(())
}

/// Write a sample configuration file
fn run_init(output: PathBuf, server_id: String) -> Result<()> {
    if output.exists() {
        return Err(chatmesh::Error::Config(format!(
            "Refusing to overwrite existing file {:?}",
            output
        )));
    }

    std::fs::write(&output, ChatmeshConfig::sample(&server_id))?;
    println!("Wrote configuration to {:?}", output);
    Ok(())
}

/// Validate a configuration file
fn run_validate(config_path: PathBuf) -> Result<()> {
    match ChatmeshConfig::from_file(&config_path) {
        Ok(config) => {
            println!("Configuration is valid (node id: {})", config.node.id);
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration is invalid: {}", e);
            Err(e)
        }
    }
}

/// Print a configuration summary
fn run_info(config_path: PathBuf) -> Result<()> {
    let config = ChatmeshConfig::from_file(&config_path)?;

    println!("Node ID:          {}", config.node.id);
    println!("Sync listener:    {}", config.node.sync_bind_address);
    println!("Membership mode:  {:?}", config.cluster.mode);
    println!(
        "Multicast:        {}:{} (beacon {:?}, timeout {:?})",
        config.multicast.group,
        config.multicast.port,
        config.heartbeat_interval(),
        config.heartbeat_timeout()
    );
    if !config.cluster.peers.is_empty() {
        println!("Static peers:     {}", config.cluster.peers.join(", "));
    }

    Ok(())
}
