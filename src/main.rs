//! minitunnel CLI - expose a local HTTP service through a relay
//!
//! Run `minitunnel relay` on a reachable machine and `minitunnel agent` next to the
//! service; the relay prints a public URL for every agent that connects.

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use minitunnel_client::{Agent, AgentConfig};
use minitunnel_lib::{Relay, RelayConfig};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("MINITUNNEL_GIT_HASH"),
    " ",
    env!("MINITUNNEL_BUILD_DATE"),
    ")"
);

/// minitunnel - expose a local HTTP service through a public relay
#[derive(Parser, Debug)]
#[command(name = "minitunnel")]
#[command(version = VERSION)]
struct Cli {
    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, global = true, default_value = "info", env = "MINITUNNEL_LOG_LEVEL")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the relay: QUIC control plane on PORT, public HTTP on PORT+1
    #[command(long_about = r#"
Run the relay. Agents connect over QUIC on --port (UDP); public HTTP traffic is
accepted on --port + 1 (TCP) and routed to agents by the first path segment.

EXAMPLES:
  # Development relay with a generated certificate
  minitunnel relay --self-signed

  # Production relay with real certificates
  minitunnel relay --port 8080 --cert /etc/minitunnel/fullchain.pem \
    --key /etc/minitunnel/privkey.pem --public-host tunnel.example.com

ENVIRONMENT VARIABLES:
  MINITUNNEL_PORT         Control plane port
  MINITUNNEL_CERT         TLS certificate (PEM)
  MINITUNNEL_KEY          TLS private key (PEM)
  MINITUNNEL_PUBLIC_HOST  Host name used in tunnel URLs
    "#)]
    Relay {
        /// Control plane port; HTTP ingress listens on the next port
        #[arg(long, default_value_t = 8080, env = "MINITUNNEL_PORT")]
        port: u16,

        /// TLS certificate file (PEM)
        #[arg(long, default_value = "certs/server.crt", env = "MINITUNNEL_CERT")]
        cert: PathBuf,

        /// TLS private key file (PEM)
        #[arg(long, default_value = "certs/server.key", env = "MINITUNNEL_KEY")]
        key: PathBuf,

        /// Host name placed in issued tunnel URLs
        #[arg(long, default_value = "localhost", env = "MINITUNNEL_PUBLIC_HOST")]
        public_host: String,

        /// Generate a self-signed certificate at --cert/--key if they do not exist
        #[arg(long)]
        self_signed: bool,
    },

    /// Run an agent forwarding tunnel traffic to a local service
    #[command(long_about = r#"
Connect to a relay and forward every request it relays to a local HTTP service.

EXAMPLES:
  minitunnel agent --server relay.example.com:8080 --local localhost:3000 --insecure false

ENVIRONMENT VARIABLES:
  MINITUNNEL_SERVER    Relay address (host:port)
  MINITUNNEL_LOCAL     Local service address (host:port)
  MINITUNNEL_INSECURE  Skip relay certificate verification (true/false)
    "#)]
    Agent {
        /// Relay address (host:port)
        #[arg(long, default_value = "localhost:8080", env = "MINITUNNEL_SERVER")]
        server: String,

        /// Local service address (host:port)
        #[arg(long, default_value = "localhost:3000", env = "MINITUNNEL_LOCAL")]
        local: String,

        /// Skip relay certificate verification
        #[arg(long, default_value_t = true, action = ArgAction::Set, env = "MINITUNNEL_INSECURE")]
        insecure: bool,
    },

    /// Expose localhost:PORT through a relay on localhost:8080
    Http {
        /// Local port to expose
        port: u16,
    },
}

/// Setup logging with the specified log level
fn setup_logging(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

async fn run_relay(config: RelayConfig) -> Result<()> {
    info!("minitunnel relay {}", VERSION);

    let relay = Relay::bind(config).await.context("Failed to start relay")?;
    info!("Agents connect to {}", relay.control_addr()?);
    info!("Public HTTP on {}", relay.http_addr()?);

    tokio::select! {
        result = relay.run() => result.context("Relay stopped"),
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            Ok(())
        }
    }
}

async fn run_agent(config: AgentConfig) -> Result<()> {
    info!("Relay: {}", config.server_addr);
    info!("Local service: {}", config.local_addr);
    if config.insecure {
        warn!("⚠️  Certificate verification disabled (insecure mode)");
    }

    let agent = Agent::new(config).context("Invalid agent configuration")?;

    tokio::select! {
        result = agent.run() => result.context("Agent stopped"),
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli.log_level);

    let result = match cli.command {
        Commands::Relay {
            port,
            cert,
            key,
            public_host,
            self_signed,
        } => {
            let config = RelayConfig::default()
                .with_port(port)
                .with_cert_paths(cert, key)
                .with_public_host(public_host)
                .with_self_signed(self_signed);
            run_relay(config).await
        }
        Commands::Agent {
            server,
            local,
            insecure,
        } => run_agent(AgentConfig::new(server, local).with_insecure(insecure)).await,
        Commands::Http { port } => run_agent(AgentConfig::for_local_port(port)).await,
    };

    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}
