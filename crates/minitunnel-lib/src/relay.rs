//! Relay wiring: QUIC control plane, client registry and HTTP ingress
//!
//! ```ignore
//! use minitunnel_lib::{Relay, RelayConfig};
//!
//! let relay = Relay::bind(RelayConfig::default().with_self_signed(true)).await?;
//! println!("agents connect to {}", relay.control_addr()?);
//! relay.run().await?;
//! ```

use crate::relay_config::RelayConfig;
use minitunnel_control::{SessionRegistry, TunnelHandler};
use minitunnel_server_http::{HttpServer, HttpServerConfig, HttpServerError};
use minitunnel_transport::{TransportError, TransportListener};
use minitunnel_transport_quic::{QuicConfig, QuicListener, QuicStream};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Relay builder errors
#[derive(Error, Debug)]
pub enum RelayBuilderError {
    #[error("invalid port {0}: must be between 1 and 65534")]
    InvalidPort(u16),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("HTTP server error: {0}")]
    Http(#[from] HttpServerError),

    #[error("Server error: {0}")]
    ServerError(String),
}

/// A bound relay, ready to run
pub struct Relay {
    listener: QuicListener,
    http_listener: TcpListener,
    http_server: HttpServer<QuicStream>,
    handler: TunnelHandler<QuicStream>,
}

impl Relay {
    /// Validate `config` and bind both listeners
    pub async fn bind(config: RelayConfig) -> Result<Self, RelayBuilderError> {
        config.validate()?;
        let quic_config = config.quic_config()?;

        Self::bind_with(
            config.control_addr(),
            config.http_addr(),
            quic_config,
            &config.public_host,
        )
        .await
    }

    /// Bind explicit addresses
    ///
    /// Port 0 is allowed for either address; tunnel URLs use the HTTP port that
    /// was actually bound.
    pub async fn bind_with(
        control_addr: SocketAddr,
        http_addr: SocketAddr,
        quic_config: QuicConfig,
        public_host: &str,
    ) -> Result<Self, RelayBuilderError> {
        let registry = SessionRegistry::<QuicStream>::new();

        let http_server = HttpServer::new(
            HttpServerConfig {
                bind_addr: http_addr,
            },
            registry.clone(),
        );
        let http_listener = http_server.bind().await?;
        let http_port = http_listener
            .local_addr()
            .map_err(HttpServerError::from)?
            .port();

        let listener = QuicListener::new(control_addr, Arc::new(quic_config))?;

        let handler = TunnelHandler::new(registry, http_port).with_public_host(public_host);

        Ok(Self {
            listener,
            http_listener,
            http_server,
            handler,
        })
    }

    /// Address agents connect to
    pub fn control_addr(&self) -> Result<SocketAddr, RelayBuilderError> {
        Ok(self.listener.local_addr()?)
    }

    /// Address of the public HTTP ingress
    pub fn http_addr(&self) -> Result<SocketAddr, RelayBuilderError> {
        self.http_listener
            .local_addr()
            .map_err(|e| RelayBuilderError::Http(e.into()))
    }

    pub fn registry(&self) -> &SessionRegistry<QuicStream> {
        self.handler.registry()
    }

    /// Serve agents and public traffic until either side stops
    pub async fn run(self) -> Result<(), RelayBuilderError> {
        let Relay {
            listener,
            http_listener,
            http_server,
            handler,
        } = self;

        // JoinSet aborts the other task when the relay returns
        let mut join_set = JoinSet::new();

        join_set.spawn(async move {
            http_server
                .serve(http_listener)
                .await
                .map_err(RelayBuilderError::from)
        });
        join_set.spawn(accept_agents(listener, handler));

        match join_set.join_next().await {
            Some(Ok(result)) => result,
            Some(Err(e)) => Err(RelayBuilderError::ServerError(e.to_string())),
            None => Ok(()),
        }
    }
}

async fn accept_agents(
    listener: QuicListener,
    handler: TunnelHandler<QuicStream>,
) -> Result<(), RelayBuilderError> {
    info!(
        "Control plane listening on {} (QUIC, TLS 1.3)",
        listener.local_addr()?
    );

    loop {
        match listener.accept().await {
            Ok((connection, peer_addr)) => {
                debug!("New QUIC connection from {}", peer_addr);
                let handler = handler.clone();
                let connection = Arc::new(connection);
                tokio::spawn(async move {
                    if let Err(e) = handler.handle_connection(connection, peer_addr).await {
                        warn!("Connection from {} ended: {}", peer_addr, e);
                    }
                });
            }
            Err(TransportError::EndpointClosed) => {
                error!("QUIC endpoint closed");
                return Err(TransportError::EndpointClosed.into());
            }
            Err(e) => {
                warn!("QUIC accept error: {}", e);
            }
        }
    }
}
