//! Relay-side session and the request/response round trip

use minitunnel_proto::{MessageType, TunnelMessage, TunneledRequest, TunneledResponse};
use minitunnel_router::ClientRegistry;
use minitunnel_transport::{TransportError, TransportStream};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, trace};

/// Registry of established sessions keyed by client ID
pub type SessionRegistry<S> = ClientRegistry<Session<S>>;

/// Failures of a single round trip, all surfaced to the public caller as 502
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Failed to send request to agent: {0}")]
    Send(#[source] TransportError),

    #[error("Failed to read response from agent: {0}")]
    Receive(#[source] TransportError),

    #[error("Malformed response from agent: {0}")]
    Malformed(String),

    #[error("Agent closed the stream before responding")]
    Closed,

    #[error("Expected response from agent, got {0}")]
    UnexpectedMessage(MessageType),

    #[error("Round trip task failed: {0}")]
    Task(String),
}

impl RelayError {
    pub fn status_code(&self) -> u16 {
        502
    }

    /// Body text shown to the public caller
    pub fn public_message(&self) -> &'static str {
        match self {
            RelayError::Send(_) => "Error forwarding request to agent",
            RelayError::Receive(_) | RelayError::Closed | RelayError::Task(_) => {
                "Error reading response from agent"
            }
            RelayError::Malformed(_) => "Error parsing response from agent",
            RelayError::UnexpectedMessage(_) => "Invalid response from agent",
        }
    }
}

/// One agent's established tunnel
///
/// Owns the agent's stream behind a lock. Each round trip holds the lock from
/// writing the request until the matching response has been read, so at most one
/// request is outstanding per session and concurrent callers queue up.
pub struct Session<S> {
    id: String,
    stream: Mutex<S>,
}

impl<S: TransportStream> Session<S> {
    pub fn new(id: impl Into<String>, stream: S) -> Self {
        Self {
            id: id.into(),
            stream: Mutex::new(stream),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Exclusive access to the stream
    pub(crate) async fn lock(&self) -> MutexGuard<'_, S> {
        self.stream.lock().await
    }

    /// Send `request` to the agent and wait for its response
    ///
    /// Heartbeats that arrive while waiting are skipped. There is no timeout: a
    /// silent agent holds the session until its connection fails.
    pub async fn round_trip(
        &self,
        request: TunneledRequest,
    ) -> Result<TunneledResponse, RelayError> {
        let mut stream = self.stream.lock().await;

        trace!(
            "Session {} sending {} {}",
            self.id,
            request.method,
            request.path
        );

        stream
            .send_message(&TunnelMessage::Request(request))
            .await
            .map_err(RelayError::Send)?;

        loop {
            match stream.recv_message().await {
                Ok(Some(TunnelMessage::Response(response))) => return Ok(response),
                Ok(Some(TunnelMessage::Heartbeat {})) => {
                    trace!("Session {} skipped heartbeat while awaiting response", self.id);
                }
                Ok(Some(other)) => {
                    debug!(
                        "Session {} received {} instead of response",
                        self.id,
                        other.message_type()
                    );
                    return Err(RelayError::UnexpectedMessage(other.message_type()));
                }
                Ok(None) => return Err(RelayError::Closed),
                Err(TransportError::MalformedMessage(e)) => return Err(RelayError::Malformed(e)),
                Err(e) => return Err(RelayError::Receive(e)),
            }
        }
    }
}

impl<S> Session<S>
where
    S: TransportStream + 'static,
{
    /// Run [`round_trip`](Self::round_trip) on its own task and wait for it
    ///
    /// The exchange runs to completion even when the caller is dropped, so a
    /// response to an abandoned request is consumed here and never reaches the
    /// next caller.
    pub async fn relay(
        self: Arc<Self>,
        request: TunneledRequest,
    ) -> Result<TunneledResponse, RelayError> {
        let session_id = self.id.clone();
        tokio::spawn(async move { self.round_trip(request).await })
            .await
            .map_err(|e| {
                debug!("Round trip task for session {} failed: {}", session_id, e);
                RelayError::Task(e.to_string())
            })?
    }
}

impl<S> fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("id", &self.id).finish()
    }
}
