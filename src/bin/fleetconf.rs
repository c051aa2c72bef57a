//! fleetconf node and operator CLI

use clap::{Parser, Subcommand};
use fleetconf::common::{BackendKind, NodeConfig};
use fleetconf::coordinator::ConfigServer;
use fleetconf::ops::ConfigClient;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "fleetconf")]
#[command(about = "Versioned, rollout-aware configuration for server fleets")]
#[command(version)]
struct Cli {
    /// Node URL for operator commands
    #[arg(long, default_value = "http://localhost:8080")]
    node: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a config node
    Serve {
        /// Settings file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Hostname this node has in the servers spec
        #[arg(long)]
        hostname: Option<String>,

        /// Bind address for HTTP
        #[arg(long)]
        bind: Option<String>,

        /// Persist the committed config to this file
        #[arg(long)]
        state: Option<PathBuf>,
    },

    /// Show the committed config and rollout status
    State,

    /// Submit a config document
    Set {
        /// JSON config document
        file: PathBuf,

        /// Roll it out across the fleet instead of committing immediately
        #[arg(long)]
        rolling: bool,
    },

    /// Cancel the active rollout and keep the committed config
    Rollback,

    /// Cancel the active rollout and commit its candidate now
    ForceCommit,

    /// Report the fingerprint of the config this node now runs
    Ack {
        fingerprint: String,
    },
}

fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| level.to_string().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            hostname,
            bind,
            state,
        } => {
            // File and environment first, CLI flags win
            let mut node_config = NodeConfig::load(config.as_deref())?;
            if let Some(hostname) = hostname {
                node_config.hostname = hostname;
            }
            if let Some(bind) = bind {
                node_config.bind_addr = bind.parse()?;
            }
            if let Some(state) = state {
                node_config.backend = BackendKind::File;
                node_config.state_path = Some(state);
            }

            init_tracing(&node_config.log_level);
            ConfigServer::new(node_config).serve().await?;
        }

        Commands::State => {
            init_tracing("warn");
            let state = ConfigClient::new(&cli.node).get_state().await?;
            println!("{}", serde_json::to_string_pretty(&state)?);
        }

        Commands::Set { file, rolling } => {
            init_tracing("warn");
            let doc: serde_json::Value = serde_json::from_slice(&std::fs::read(&file)?)?;
            let client = ConfigClient::new(&cli.node);
            let result = if rolling {
                client.set_rolling(&doc).await?
            } else {
                client.set(&doc).await?
            };
            match result.stamp {
                Some(stamp) => println!("{} ({})", result.message, stamp),
                None => println!("{}", result.message),
            }
        }

        Commands::Rollback => {
            init_tracing("warn");
            let result = ConfigClient::new(&cli.node).rollback().await?;
            println!("{}", result.message);
        }

        Commands::ForceCommit => {
            init_tracing("warn");
            let result = ConfigClient::new(&cli.node).force_commit().await?;
            match result.stamp {
                Some(stamp) => println!("{} ({})", result.message, stamp),
                None => println!("{}", result.message),
            }
        }

        Commands::Ack { fingerprint } => {
            init_tracing("warn");
            let result = ConfigClient::new(&cli.node).acknowledge(&fingerprint).await?;
            println!("{}", result.message);
        }
    }

    Ok(())
}
