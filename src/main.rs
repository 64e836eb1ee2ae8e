//! Plugin Host CLI
//!
//! Command-line interface for running a plugin host.

use clap::{Parser, Subcommand};
use std::env;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use plugin_host::{ApiServer, HostConfig, MemoryBroker, PluginHost, Result};

const DEFAULT_CONFIG: &str = "plugin-host.toml";

#[derive(Parser)]
#[command(name = "plugin-host")]
#[command(author, version, about = "Runtime plugin host", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default host configuration
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        output: String,
    },

    /// Start the plugin host and its management API
    Start {
        /// HTTP API listen address (overrides the configuration)
        #[arg(long)]
        api_addr: Option<String>,
    },

    /// Validate a configuration file
    Check,
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

fn env_string(name: &str) -> Option<String> {
    let value = env::var(name).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn apply_env_overrides(config: &mut HostConfig) {
    if let Some(listen_address) = env_string("PLUGIN_HOST_API_ADDR") {
        config.api.listen_address = listen_address;
    }
    if let Some(node_id) = env_string("PLUGIN_HOST_NODE_ID") {
        config.bridge.node_id = node_id;
    }
}

fn load_config(path: &str) -> Result<HostConfig> {
    let mut config = if Path::new(path).exists() {
        info!("Loading configuration from: {}", path);
        HostConfig::load(path)?
    } else {
        info!("Using default configuration");
        HostConfig::default()
    };
    apply_env_overrides(&mut config);
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Init { output } => {
            info!("Initializing new host configuration at: {}", output);
            let config = HostConfig::default();
            config.save(&output)?;
            info!("Configuration saved successfully");
        }

        Commands::Start { api_addr } => {
            info!("Starting plugin host...");

            let mut config = load_config(&cli.config)?;
            if let Some(api_addr) = api_addr {
                config.api.listen_address = api_addr;
            }
            let listen_address = config.api.listen_address.clone();
            let api_config = config.api.clone();
            let bridge_enabled = config.bridge.enabled;

            let host = Arc::new(PluginHost::new(config));

            // Only the in-process broker ships with the host; external
            // brokers attach through `PluginHost::connect_bridge`.
            let _broker = if bridge_enabled {
                let broker = MemoryBroker::default();
                let node_id = host.config().bridge.node_id.clone();
                host.connect_bridge(broker.connect(node_id))?;
                Some(broker)
            } else {
                None
            };

            info!("API address: {}", listen_address);
            let server = ApiServer::new(api_config, host.clone());

            info!("Plugin host started successfully");
            info!("Press Ctrl+C to stop");

            let shutdown = async {
                if let Err(e) = signal::ctrl_c().await {
                    warn!("Could not listen for shutdown signal: {}", e);
                    std::future::pending::<()>().await;
                }
                info!("Received shutdown signal");
            };

            if let Err(e) = server.run_until(&listen_address, shutdown).await {
                error!("API server failed: {}", e);
            }

            host.shutdown().await;
            info!("Plugin host stopped");
        }

        Commands::Check => match load_config(&cli.config) {
            Ok(config) => {
                info!("Configuration is valid");
                info!("API address: {}", config.api.listen_address);
                info!(
                    "Bus: queue capacity {}, overflow {:?}",
                    config.bus.queue_capacity, config.bus.overflow_policy
                );
                info!(
                    "Bridge: {}",
                    if config.bridge.enabled {
                        "enabled"
                    } else {
                        "disabled"
                    }
                );
            }
            Err(e) => {
                error!("Configuration check failed: {}", e);
                std::process::exit(1);
            }
        },
    }

    Ok(())
}
