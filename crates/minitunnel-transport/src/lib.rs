//! Transport abstraction layer for tunnel connections
//!
//! This crate provides transport-agnostic traits that allow the relay and the agent
//! to work over any authenticated, encrypted, multiplexed channel without coupling
//! to a specific implementation.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                  Tunnel Application                      │
//! │        (relay handler, session relay, agent)             │
//! └─────────────────────────────────────────────────────────┘
//!                           │
//!                           │ Uses traits
//!                           ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │          minitunnel-transport (this crate)               │
//! │  - TransportListener    - TransportConnection            │
//! │  - TransportStream      - TransportConnector             │
//! └─────────────────────────────────────────────────────────┘
//!                           │
//!                           │ Implemented by
//!                           ↓
//! ┌────────────────────────────┬────────────────────────────┐
//! │ minitunnel-transport-quic  │ memory (in-process, tests) │
//! └────────────────────────────┴────────────────────────────┘
//! ```

use async_trait::async_trait;
use minitunnel_proto::{CodecError, TunnelMessage};
use std::fmt::Debug;
use std::net::SocketAddr;
use thiserror::Error;

pub mod memory;

/// Transport-level errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Stream closed")]
    StreamClosed,

    /// The listening endpoint was closed and will accept no more connections
    #[error("Endpoint closed")]
    EndpointClosed,

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// A complete frame arrived but its payload was not a valid message.
    /// The frame has been consumed, so the stream stays usable.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Timeout")]
    Timeout,

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl From<CodecError> for TransportError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Malformed(e) => TransportError::MalformedMessage(e.to_string()),
            other => TransportError::ProtocolError(other.to_string()),
        }
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// A bidirectional stream over a transport connection
///
/// Carries framed [`TunnelMessage`]s in both directions. A stream can be split
/// into independently owned halves so that one task reads while another writes.
#[async_trait]
pub trait TransportStream: Send + Sync + Debug {
    /// The sending half produced by [`TransportStream::split`]
    type SendHalf: TransportSendHalf;

    /// The receiving half produced by [`TransportStream::split`]
    type RecvHalf: TransportRecvHalf;

    /// Send a tunnel message on this stream
    async fn send_message(&mut self, message: &TunnelMessage) -> TransportResult<()>;

    /// Receive a tunnel message from this stream
    ///
    /// Returns `None` if the stream has been closed gracefully by the remote peer.
    async fn recv_message(&mut self) -> TransportResult<Option<TunnelMessage>>;

    /// Close the sending side of the stream
    async fn finish(&mut self) -> TransportResult<()>;

    /// Get the stream ID (unique within this connection)
    fn stream_id(&self) -> u64;

    /// Check if the stream is closed
    fn is_closed(&self) -> bool;

    /// Split the stream into separate send and receive halves
    fn split(self) -> (Self::SendHalf, Self::RecvHalf)
    where
        Self: Sized;
}

/// Sending half of a split stream
#[async_trait]
pub trait TransportSendHalf: Send + Debug {
    async fn send_message(&mut self, message: &TunnelMessage) -> TransportResult<()>;

    async fn finish(&mut self) -> TransportResult<()>;

    fn stream_id(&self) -> u64;
}

/// Receiving half of a split stream
#[async_trait]
pub trait TransportRecvHalf: Send + Debug {
    /// Returns `None` once the peer has finished its sending side.
    async fn recv_message(&mut self) -> TransportResult<Option<TunnelMessage>>;

    fn stream_id(&self) -> u64;
}

/// A transport connection that can create multiple streams
#[async_trait]
pub trait TransportConnection: Send + Sync + Debug {
    /// The stream type created by this connection
    type Stream: TransportStream;

    /// Open a new bidirectional stream
    async fn open_stream(&self) -> TransportResult<Self::Stream>;

    /// Accept an incoming bidirectional stream
    ///
    /// Returns `None` when the connection is closed and no more streams will arrive.
    async fn accept_stream(&self) -> TransportResult<Option<Self::Stream>>;

    /// Close the connection
    ///
    /// # Arguments
    /// * `error_code` - Application-specific error code (0 for normal closure)
    /// * `reason` - Human-readable reason for closure
    async fn close(&self, error_code: u32, reason: &str);

    /// Wait until the connection is closed for any reason
    ///
    /// Resolves on explicit close by either side, idle timeout or network failure.
    async fn closed(&self);

    /// Check if the connection is closed
    fn is_closed(&self) -> bool;

    /// Get the remote peer address
    fn remote_address(&self) -> SocketAddr;

    /// Get a unique stable identifier for this connection
    fn connection_id(&self) -> String;
}

/// Server-side: Listens for incoming transport connections
#[async_trait]
pub trait TransportListener: Send + Sync + Debug {
    /// The connection type accepted by this listener
    type Connection: TransportConnection;

    /// Accept an incoming connection
    ///
    /// Returns the connection and the remote address of the connecting peer.
    async fn accept(&self) -> TransportResult<(Self::Connection, SocketAddr)>;

    /// Get the local address this listener is bound to
    fn local_addr(&self) -> TransportResult<SocketAddr>;

    /// Close the listener (stop accepting new connections)
    async fn close(&self);
}

/// Client-side: Establishes outgoing transport connections
#[async_trait]
pub trait TransportConnector: Send + Sync + Debug {
    /// The connection type created by this connector
    type Connection: TransportConnection;

    /// Connect to a remote server
    ///
    /// # Arguments
    /// * `addr` - The socket address to connect to
    /// * `server_name` - The server name for TLS verification (e.g., "relay.example.com")
    async fn connect(&self, addr: SocketAddr, server_name: &str)
        -> TransportResult<Self::Connection>;
}

/// Configuration for transport security
#[derive(Debug, Clone)]
pub struct TransportSecurityConfig {
    /// Whether to verify the server's TLS certificate
    pub verify_server_cert: bool,

    /// Custom root CA certificates in DER form (if not using the webpki roots)
    pub root_certs: Vec<Vec<u8>>,

    /// Application-Layer Protocol Negotiation (ALPN) protocols
    pub alpn_protocols: Vec<String>,
}

impl Default for TransportSecurityConfig {
    fn default() -> Self {
        Self {
            verify_server_cert: true,
            root_certs: Vec::new(),
            alpn_protocols: vec![minitunnel_proto::ALPN_PROTOCOL.to_string()],
        }
    }
}

/// Transport-specific configuration
pub trait TransportConfig: Send + Sync + Debug {
    /// Get the security configuration
    fn security_config(&self) -> &TransportSecurityConfig;

    /// Validate the configuration
    fn validate(&self) -> TransportResult<()>;
}
