//! Minitunnel Library - Public API for Rust applications embedding the tunnel
//!
//! Re-exports the tunnel crates behind one entry point, plus a [`Relay`] that wires
//! the QUIC control plane, the client registry and the public HTTP ingress together.
//!
//! # Relay
//!
//! ```ignore
//! use minitunnel_lib::{Relay, RelayConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RelayConfig::default().with_port(8080).with_self_signed(true);
//!     let relay = Relay::bind(config).await?;
//!     relay.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Agent
//!
//! ```ignore
//! use minitunnel_lib::{Agent, AgentConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let agent = Agent::new(AgentConfig::for_local_port(3000))?;
//!     agent.run().await?;
//!     Ok(())
//! }
//! ```

pub mod relay;
pub mod relay_config;

pub use relay::{Relay, RelayBuilderError};
pub use relay_config::{RelayConfig, RelayTls};

// Protocol
pub use minitunnel_proto::{
    MessageType, TunnelCodec, TunnelMessage, TunneledRequest, TunneledResponse, WelcomeInfo,
};

// Agent
pub use minitunnel_client::{Agent, AgentConfig, AgentError, LocalForwarder, Tunnel};

// Relay building blocks
pub use minitunnel_control::{Session, SessionRegistry, TunnelHandler};
pub use minitunnel_router::{ClientRegistry, PathRouter, RouteError};
pub use minitunnel_server_http::{HttpServer, HttpServerConfig};

// Certificates
pub use minitunnel_cert::{generate_self_signed_cert, SelfSignedCertificate};

// Transport
pub use minitunnel_transport::{
    TransportConnection, TransportConnector, TransportError, TransportListener, TransportStream,
};
pub use minitunnel_transport_quic::{QuicConfig, QuicConnection, QuicConnector, QuicListener, QuicStream};
