//! Agent connection lifecycle

use crate::config::{AgentConfig, ConfigError};
use crate::forwarder::{ForwardError, LocalForwarder};
use crate::heartbeat::run_heartbeat;
use minitunnel_proto::{MessageType, TunnelMessage, WelcomeInfo};
use minitunnel_transport::{
    TransportConnection, TransportConnector, TransportError, TransportRecvHalf,
    TransportSendHalf, TransportStream,
};
use minitunnel_transport_quic::{QuicConfig, QuicConnection, QuicConnector};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// How long the relay has to answer hello
pub const WELCOME_TIMEOUT: Duration = Duration::from_secs(5);

/// Messages waiting for the stream writer
const OUTGOING_QUEUE: usize = 32;

/// Agent errors
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Forwarder(#[from] ForwardError),

    #[error("Failed to resolve relay host '{host}': {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No addresses found for relay host '{0}'")]
    NoAddress(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Timed out waiting for welcome")]
    HandshakeTimeout,

    #[error("Relay closed the stream before welcome")]
    ClosedBeforeWelcome,

    #[error("Expected welcome, got {0}")]
    UnexpectedMessage(MessageType),

    #[error("Stream writer stopped")]
    WriterClosed,
}

/// The agent: one relay connection, one local service
#[derive(Debug)]
pub struct Agent {
    config: AgentConfig,
    forwarder: LocalForwarder,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Result<Self, AgentError> {
        config.validate()?;
        let forwarder = LocalForwarder::new(config.local_addr.clone(), config.forward_timeout)?;
        Ok(Self { config, forwarder })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Connect to the relay, then serve until the relay goes away
    pub async fn run(&self) -> Result<(), AgentError> {
        let connection = self.connect().await?;
        let result = self.run_on(&connection).await;
        connection.close(0, "agent stopped").await;
        result
    }

    /// Dial the relay over QUIC
    pub async fn connect(&self) -> Result<QuicConnection, AgentError> {
        let (host, port) = self.config.relay_host_port()?;
        let addr = resolve_relay(&host, port).await?;

        let quic_config = if self.config.insecure {
            warn!("Relay certificate verification is disabled");
            QuicConfig::client_insecure()
        } else {
            QuicConfig::client_default()
        };
        let connector = QuicConnector::new(Arc::new(quic_config))?;

        info!("Connecting to relay {} ({})", self.config.server_addr, addr);
        let connection = connector.connect(addr, &host).await?;
        debug!("Connected to relay {}", addr);

        Ok(connection)
    }

    /// Perform the handshake on `connection` and serve relayed requests
    ///
    /// Returns `Ok` when the relay finishes the stream.
    pub async fn run_on<C>(&self, connection: &C) -> Result<(), AgentError>
    where
        C: TransportConnection,
        C::Stream: 'static,
        <C::Stream as TransportStream>::SendHalf: 'static,
    {
        let tunnel = self.establish(connection).await?;

        info!("✓ Tunnel established!");
        info!("Client ID: {}", tunnel.client_id());
        info!("Tunnel URL: {}", tunnel.tunnel_url());
        info!("Forwarding to: http://{}", self.config.local_addr);

        tunnel
            .serve(self.forwarder.clone(), self.config.heartbeat_interval)
            .await
    }

    /// Open the control stream and exchange hello/welcome
    pub async fn establish<C>(&self, connection: &C) -> Result<Tunnel<C::Stream>, AgentError>
    where
        C: TransportConnection,
    {
        tokio::time::timeout(WELCOME_TIMEOUT, handshake(connection))
            .await
            .map_err(|_| AgentError::HandshakeTimeout)?
    }
}

async fn handshake<C>(connection: &C) -> Result<Tunnel<C::Stream>, AgentError>
where
    C: TransportConnection,
{
    let mut stream = connection.open_stream().await?;
    stream.send_message(&TunnelMessage::Hello {}).await?;

    match stream.recv_message().await? {
        Some(TunnelMessage::Welcome(welcome)) => Ok(Tunnel { welcome, stream }),
        Some(other) => Err(AgentError::UnexpectedMessage(other.message_type())),
        None => Err(AgentError::ClosedBeforeWelcome),
    }
}

async fn resolve_relay(host: &str, port: u16) -> Result<SocketAddr, AgentError> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|source| AgentError::Resolve {
            host: host.to_string(),
            source,
        })?
        .collect();

    // Prefer IPv4 when the name has both
    addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| AgentError::NoAddress(host.to_string()))
}

/// An established tunnel: the welcome plus the control stream
#[derive(Debug)]
pub struct Tunnel<S> {
    welcome: WelcomeInfo,
    stream: S,
}

impl<S> Tunnel<S>
where
    S: TransportStream + 'static,
    S::SendHalf: 'static,
{
    pub fn client_id(&self) -> &str {
        &self.welcome.client_id
    }

    pub fn tunnel_url(&self) -> &str {
        &self.welcome.tunnel_url
    }

    pub fn welcome(&self) -> &WelcomeInfo {
        &self.welcome
    }

    /// Answer requests until the relay finishes the stream
    ///
    /// Requests are served one at a time. Responses and heartbeats share a single
    /// writer task, so frames on the stream never interleave. Dropping the
    /// returned future aborts the writer and the heartbeat.
    pub async fn serve(
        self,
        forwarder: LocalForwarder,
        heartbeat_interval: Duration,
    ) -> Result<(), AgentError> {
        let (send, mut recv) = self.stream.split();
        let (outgoing, queue) = mpsc::channel(OUTGOING_QUEUE);

        let mut tasks = JoinSet::new();
        tasks.spawn(write_messages(send, queue));
        let heartbeat = tasks.spawn(run_heartbeat(outgoing.clone(), heartbeat_interval));

        let result = receive_requests(&mut recv, &forwarder, &outgoing).await;

        // Let the writer drain queued responses before the stream is dropped
        heartbeat.abort();
        drop(outgoing);
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                if !e.is_cancelled() {
                    error!("Tunnel task failed: {}", e);
                }
            }
        }

        result
    }
}

async fn write_messages<W>(mut send: W, mut queue: mpsc::Receiver<TunnelMessage>)
where
    W: TransportSendHalf,
{
    while let Some(message) = queue.recv().await {
        if let Err(e) = send.send_message(&message).await {
            error!("Failed to send {}: {}", message.message_type(), e);
            return;
        }
    }
    let _ = send.finish().await;
}

async fn receive_requests<R>(
    recv: &mut R,
    forwarder: &LocalForwarder,
    outgoing: &mpsc::Sender<TunnelMessage>,
) -> Result<(), AgentError>
where
    R: TransportRecvHalf,
{
    loop {
        let request = match recv.recv_message().await {
            Ok(Some(TunnelMessage::Request(request))) => request,
            Ok(Some(other)) => {
                warn!("Unexpected message type: {}", other.message_type());
                continue;
            }
            Ok(None) => {
                info!("Server disconnected");
                return Ok(());
            }
            Err(TransportError::MalformedMessage(e)) => {
                warn!("Error parsing request: {}", e);
                continue;
            }
            Err(e) => {
                error!("Error reading from relay: {}", e);
                return Err(e.into());
            }
        };

        info!("→ {} {}", request.method, request.path);
        let response = forwarder.forward(request).await;
        info!("← {}", response.status_code);

        outgoing
            .send(TunnelMessage::Response(response))
            .await
            .map_err(|_| AgentError::WriterClosed)?;
    }
}
