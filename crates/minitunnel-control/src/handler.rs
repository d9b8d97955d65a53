//! Relay side of the hello/welcome handshake

use crate::session::{Session, SessionRegistry};
use minitunnel_proto::{MessageType, TunnelMessage, WelcomeInfo};
use minitunnel_transport::{TransportConnection, TransportError, TransportStream};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// How long a new connection has to open its stream and say hello
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Application close code used when a handshake is rejected
const HANDSHAKE_FAILED_CODE: u32 = 1;

/// Reasons a connection never becomes a session
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("Timed out waiting for hello")]
    Timeout,

    #[error("Connection closed before hello")]
    ClosedBeforeHello,

    #[error("Expected hello, got {0}")]
    UnexpectedMessage(MessageType),

    #[error("Client ID {0} is already registered")]
    DuplicateClientId(String),

    #[error("Transport error during handshake: {0}")]
    Transport(#[from] TransportError),
}

/// Turns accepted agent connections into registered sessions
pub struct TunnelHandler<S> {
    registry: SessionRegistry<S>,
    public_host: String,
    http_port: u16,
    handshake_timeout: Duration,
}

impl<S> TunnelHandler<S>
where
    S: TransportStream + 'static,
{
    /// Create a handler issuing tunnel URLs on `http_port`
    pub fn new(registry: SessionRegistry<S>, http_port: u16) -> Self {
        Self {
            registry,
            public_host: "localhost".to_string(),
            http_port,
            handshake_timeout: HANDSHAKE_TIMEOUT,
        }
    }

    /// Host name used in issued tunnel URLs
    pub fn with_public_host(mut self, host: impl Into<String>) -> Self {
        self.public_host = host.into();
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &SessionRegistry<S> {
        &self.registry
    }

    /// Public URL of a client's tunnel
    pub fn tunnel_url(&self, client_id: &str) -> String {
        format!("http://{}:{}/{}", self.public_host, self.http_port, client_id)
    }

    /// Handle one agent connection until it closes
    ///
    /// Returns once the connection has ended, with the session removed from the
    /// registry. A failed handshake closes the connection and registers nothing.
    pub async fn handle_connection<C>(
        &self,
        connection: Arc<C>,
        peer_addr: SocketAddr,
    ) -> Result<(), HandshakeError>
    where
        C: TransportConnection<Stream = S>,
    {
        debug!("New connection from {}, waiting for stream", peer_addr);

        let stream = match self.await_hello(&*connection).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Handshake with {} failed: {}", peer_addr, e);
                connection
                    .close(HANDSHAKE_FAILED_CODE, "handshake failed")
                    .await;
                return Err(e);
            }
        };

        debug!("Received hello from {}", peer_addr);

        let client_id = self.allocate_id();
        let tunnel_url = self.tunnel_url(&client_id);
        let welcome = TunnelMessage::Welcome(WelcomeInfo {
            client_id: client_id.clone(),
            tunnel_url: tunnel_url.clone(),
        });

        // Welcome goes out before any request can take the session lock
        let session = Arc::new(Session::new(client_id.clone(), stream));
        let mut guard = session.lock().await;

        if !self.registry.register(client_id.clone(), session.clone()) {
            drop(guard);
            connection
                .close(HANDSHAKE_FAILED_CODE, "handshake failed")
                .await;
            return Err(HandshakeError::DuplicateClientId(client_id));
        }

        let registry = self.registry.clone();
        let _registration = scopeguard::guard(client_id.clone(), move |client_id| {
            registry.remove(&client_id);
        });

        if let Err(e) = guard.send_message(&welcome).await {
            error!("Failed to send welcome to {}: {}", client_id, e);
            drop(guard);
            connection
                .close(HANDSHAKE_FAILED_CODE, "handshake failed")
                .await;
            return Err(e.into());
        }
        drop(guard);

        info!("Agent connected: {} from {}", client_id, peer_addr);
        info!("Tunnel URL: {}", tunnel_url);

        connection.closed().await;

        info!("Agent disconnected: {}", client_id);
        Ok(())
    }

    async fn await_hello<C>(&self, connection: &C) -> Result<S, HandshakeError>
    where
        C: TransportConnection<Stream = S>,
    {
        tokio::time::timeout(self.handshake_timeout, read_hello(connection))
            .await
            .map_err(|_| HandshakeError::Timeout)?
    }

    fn allocate_id(&self) -> String {
        loop {
            let id = uuid::Uuid::new_v4().to_string();
            if !self.registry.contains(&id) {
                return id;
            }
        }
    }
}

async fn read_hello<C>(connection: &C) -> Result<C::Stream, HandshakeError>
where
    C: TransportConnection,
{
    let mut stream = connection
        .accept_stream()
        .await?
        .ok_or(HandshakeError::ClosedBeforeHello)?;

    match stream.recv_message().await? {
        Some(TunnelMessage::Hello {}) => Ok(stream),
        Some(other) => {
            let _ = stream.finish().await;
            Err(HandshakeError::UnexpectedMessage(other.message_type()))
        }
        None => Err(HandshakeError::ClosedBeforeHello),
    }
}

impl<S> Clone for TunnelHandler<S> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            public_host: self.public_host.clone(),
            http_port: self.http_port,
            handshake_timeout: self.handshake_timeout,
        }
    }
}
