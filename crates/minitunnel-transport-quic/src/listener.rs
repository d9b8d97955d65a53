//! QUIC listener and connector implementations

use async_trait::async_trait;
use minitunnel_transport::{
    TransportConfig, TransportConnector, TransportError, TransportListener, TransportResult,
};
use quinn::Endpoint;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::QuicConfig;
use crate::connection::QuicConnection;

/// QUIC listener for accepting agent connections
#[derive(Debug)]
pub struct QuicListener {
    endpoint: Endpoint,
}

impl QuicListener {
    pub fn new(bind_addr: SocketAddr, config: Arc<QuicConfig>) -> TransportResult<Self> {
        TransportConfig::validate(&*config)?;

        let server_config = config.build_server_config()?;

        let endpoint =
            Endpoint::server(server_config, bind_addr).map_err(TransportError::IoError)?;

        let local_addr = endpoint.local_addr().map_err(TransportError::IoError)?;

        info!("QUIC listener bound to {}", local_addr);

        Ok(Self { endpoint })
    }
}

#[async_trait]
impl TransportListener for QuicListener {
    type Connection = QuicConnection;

    async fn accept(&self) -> TransportResult<(Self::Connection, SocketAddr)> {
        loop {
            let Some(incoming) = self.endpoint.accept().await else {
                return Err(TransportError::EndpointClosed);
            };

            let remote = incoming.remote_address();
            debug!("Incoming QUIC connection from {}", remote);

            match incoming.await {
                Ok(connection) => {
                    debug!("QUIC connection established from {}", remote);
                    return Ok((QuicConnection::new(connection), remote));
                }
                Err(e) => {
                    // A failed handshake only affects that peer
                    warn!("Failed to establish QUIC connection from {}: {}", remote, e);
                    continue;
                }
            }
        }
    }

    fn local_addr(&self) -> TransportResult<SocketAddr> {
        self.endpoint.local_addr().map_err(TransportError::IoError)
    }

    async fn close(&self) {
        self.endpoint.close(0u32.into(), b"Listener closed");
        info!("QUIC listener closed");
    }
}

/// QUIC connector for dialing the relay
#[derive(Debug)]
pub struct QuicConnector {
    config: Arc<QuicConfig>,
}

impl QuicConnector {
    pub fn new(config: Arc<QuicConfig>) -> TransportResult<Self> {
        TransportConfig::validate(&*config)?;
        // Fail early on a bad TLS setup
        config.build_client_config()?;

        Ok(Self { config })
    }
}

#[async_trait]
impl TransportConnector for QuicConnector {
    type Connection = QuicConnection;

    async fn connect(
        &self,
        addr: SocketAddr,
        server_name: &str,
    ) -> TransportResult<Self::Connection> {
        debug!("Connecting to QUIC server: {} ({})", server_name, addr);

        // Bind in the same address family as the target
        let bind_addr: SocketAddr = if addr.is_ipv6() {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        };

        let mut endpoint = Endpoint::client(bind_addr).map_err(TransportError::IoError)?;
        endpoint.set_default_client_config(self.config.build_client_config()?);

        let connecting = endpoint
            .connect(addr, server_name)
            .map_err(|e| TransportError::ConnectionError(e.to_string()))?;

        let connection = connecting.await.map_err(|e| match e {
            quinn::ConnectionError::TimedOut => TransportError::Timeout,
            quinn::ConnectionError::TransportError(err) => TransportError::TlsError(err.to_string()),
            other => TransportError::ConnectionError(other.to_string()),
        })?;

        info!("QUIC connection established to {} ({})", server_name, addr);

        Ok(QuicConnection::with_endpoint(connection, endpoint))
    }
}
