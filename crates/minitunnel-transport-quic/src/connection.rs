//! QUIC connection implementation

use async_trait::async_trait;
use minitunnel_transport::{TransportConnection, TransportError, TransportResult};
use quinn::{Connection, Endpoint};
use std::net::SocketAddr;
use tracing::{debug, trace, warn};

use crate::stream::QuicStream;

/// QUIC connection wrapper
#[derive(Debug, Clone)]
pub struct QuicConnection {
    inner: Connection,
    connection_id: String,
    // Client side owns its endpoint for the lifetime of the connection
    _endpoint: Option<Endpoint>,
}

impl QuicConnection {
    pub fn new(connection: Connection) -> Self {
        let connection_id = format!("quic-{}", connection.stable_id());
        Self {
            inner: connection,
            connection_id,
            _endpoint: None,
        }
    }

    pub(crate) fn with_endpoint(connection: Connection, endpoint: Endpoint) -> Self {
        Self {
            _endpoint: Some(endpoint),
            ..Self::new(connection)
        }
    }

    /// Get the underlying quinn connection
    pub fn inner(&self) -> &Connection {
        &self.inner
    }
}

#[async_trait]
impl TransportConnection for QuicConnection {
    type Stream = QuicStream;

    async fn open_stream(&self) -> TransportResult<Self::Stream> {
        let (send, recv) = self
            .inner
            .open_bi()
            .await
            .map_err(|e| TransportError::ConnectionError(e.to_string()))?;

        trace!("Opened bidirectional stream: {}", send.id().index());

        Ok(QuicStream::new(send, recv))
    }

    async fn accept_stream(&self) -> TransportResult<Option<Self::Stream>> {
        match self.inner.accept_bi().await {
            Ok((send, recv)) => {
                trace!("Accepted bidirectional stream: {}", send.id().index());
                Ok(Some(QuicStream::new(send, recv)))
            }
            Err(quinn::ConnectionError::ApplicationClosed(_)) => {
                debug!("Connection closed by application");
                Ok(None)
            }
            Err(quinn::ConnectionError::ConnectionClosed(_)) => {
                debug!("Connection closed by peer");
                Ok(None)
            }
            Err(quinn::ConnectionError::LocallyClosed) => {
                debug!("Connection closed locally");
                Ok(None)
            }
            Err(quinn::ConnectionError::TimedOut) => {
                debug!("Connection timed out");
                Ok(None)
            }
            Err(quinn::ConnectionError::Reset) => {
                debug!("Connection reset");
                Ok(None)
            }
            Err(e) => {
                warn!("Error accepting stream: {}", e);
                Err(TransportError::ConnectionError(e.to_string()))
            }
        }
    }

    async fn close(&self, error_code: u32, reason: &str) {
        self.inner
            .close(quinn::VarInt::from_u32(error_code), reason.as_bytes());

        debug!(
            "QUIC connection {} closed: {} (code: {})",
            self.connection_id, reason, error_code
        );
    }

    async fn closed(&self) {
        let reason = self.inner.closed().await;
        debug!("QUIC connection {} ended: {}", self.connection_id, reason);
    }

    fn is_closed(&self) -> bool {
        self.inner.close_reason().is_some()
    }

    fn remote_address(&self) -> SocketAddr {
        self.inner.remote_address()
    }

    fn connection_id(&self) -> String {
        self.connection_id.clone()
    }
}
