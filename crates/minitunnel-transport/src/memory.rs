//! In-process transport over tokio duplex pipes
//!
//! Frames messages with the same codec as the network transports, which makes it a
//! faithful stand-in for exercising the handshake, relay and agent logic without
//! sockets or certificates. Closing a [`MemoryConnection`] wakes `closed()` and
//! `accept_stream()` on both ends but does not tear down streams that are already open.

use crate::{
    TransportConnection, TransportError, TransportRecvHalf, TransportResult, TransportSendHalf,
    TransportStream,
};
use async_trait::async_trait;
use bytes::BytesMut;
use minitunnel_proto::{CodecError, TunnelCodec, TunnelMessage};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::trace;

/// Capacity of each direction of an in-memory stream
const PIPE_CAPACITY: usize = 64 * 1024;

/// Create a connected pair of in-memory streams
pub fn stream_pair() -> (MemoryStream, MemoryStream) {
    let (a, b) = tokio::io::duplex(PIPE_CAPACITY);
    (MemoryStream::new(0, a), MemoryStream::new(0, b))
}

/// Create a connected pair of in-memory connections
///
/// Streams opened on one end are accepted on the other.
pub fn connection_pair() -> (MemoryConnection, MemoryConnection) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    let (state, _) = watch::channel(false);
    let state = Arc::new(state);
    let next_stream_id = Arc::new(AtomicU64::new(0));

    let a = MemoryConnection {
        connection_id: "memory-a".to_string(),
        remote: SocketAddr::from(([127, 0, 0, 1], 1)),
        outgoing: b_tx,
        incoming: Arc::new(Mutex::new(a_rx)),
        state: state.clone(),
        next_stream_id: next_stream_id.clone(),
    };
    let b = MemoryConnection {
        connection_id: "memory-b".to_string(),
        remote: SocketAddr::from(([127, 0, 0, 1], 2)),
        outgoing: a_tx,
        incoming: Arc::new(Mutex::new(b_rx)),
        state,
        next_stream_id,
    };

    (a, b)
}

/// In-memory bidirectional message stream
#[derive(Debug)]
pub struct MemoryStream {
    send: MemorySendHalf,
    recv: MemoryRecvHalf,
}

impl MemoryStream {
    fn new(stream_id: u64, pipe: DuplexStream) -> Self {
        let (reader, writer) = tokio::io::split(pipe);
        Self {
            send: MemorySendHalf {
                writer,
                stream_id,
                closed: false,
            },
            recv: MemoryRecvHalf {
                reader,
                stream_id,
                closed: false,
                recv_buffer: BytesMut::with_capacity(8192),
            },
        }
    }
}

#[async_trait]
impl TransportStream for MemoryStream {
    type SendHalf = MemorySendHalf;
    type RecvHalf = MemoryRecvHalf;

    async fn send_message(&mut self, message: &TunnelMessage) -> TransportResult<()> {
        self.send.send_message(message).await
    }

    async fn recv_message(&mut self) -> TransportResult<Option<TunnelMessage>> {
        self.recv.recv_message().await
    }

    async fn finish(&mut self) -> TransportResult<()> {
        self.send.finish().await
    }

    fn stream_id(&self) -> u64 {
        self.send.stream_id
    }

    fn is_closed(&self) -> bool {
        self.send.closed || self.recv.closed
    }

    fn split(self) -> (MemorySendHalf, MemoryRecvHalf) {
        (self.send, self.recv)
    }
}

/// Send half of an in-memory stream
#[derive(Debug)]
pub struct MemorySendHalf {
    writer: WriteHalf<DuplexStream>,
    stream_id: u64,
    closed: bool,
}

#[async_trait]
impl TransportSendHalf for MemorySendHalf {
    async fn send_message(&mut self, message: &TunnelMessage) -> TransportResult<()> {
        if self.closed {
            return Err(TransportError::StreamClosed);
        }

        let encoded = TunnelCodec::encode(message)?;

        self.writer.write_all(&encoded).await?;
        self.writer.flush().await?;

        trace!("Sent {} on memory stream {}", message.message_type(), self.stream_id);
        Ok(())
    }

    async fn finish(&mut self) -> TransportResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.writer.shutdown().await?;
        Ok(())
    }

    fn stream_id(&self) -> u64 {
        self.stream_id
    }
}

/// Receive half of an in-memory stream
#[derive(Debug)]
pub struct MemoryRecvHalf {
    reader: ReadHalf<DuplexStream>,
    stream_id: u64,
    closed: bool,
    recv_buffer: BytesMut,
}

#[async_trait]
impl TransportRecvHalf for MemoryRecvHalf {
    async fn recv_message(&mut self) -> TransportResult<Option<TunnelMessage>> {
        if self.closed {
            return Ok(None);
        }

        loop {
            if let Some(message) = TunnelCodec::decode(&mut self.recv_buffer)? {
                trace!(
                    "Received {} on memory stream {}",
                    message.message_type(),
                    self.stream_id
                );
                return Ok(Some(message));
            }

            let n = self.reader.read_buf(&mut self.recv_buffer).await?;
            if n == 0 {
                self.closed = true;
                if self.recv_buffer.is_empty() {
                    return Ok(None);
                }
                return Err(CodecError::IncompleteMessage.into());
            }
        }
    }

    fn stream_id(&self) -> u64 {
        self.stream_id
    }
}

/// One end of an in-memory connection
#[derive(Debug, Clone)]
pub struct MemoryConnection {
    connection_id: String,
    remote: SocketAddr,
    outgoing: mpsc::UnboundedSender<MemoryStream>,
    incoming: Arc<Mutex<mpsc::UnboundedReceiver<MemoryStream>>>,
    // Shared by both ends; flips to true once either side closes.
    state: Arc<watch::Sender<bool>>,
    next_stream_id: Arc<AtomicU64>,
}

#[async_trait]
impl TransportConnection for MemoryConnection {
    type Stream = MemoryStream;

    async fn open_stream(&self) -> TransportResult<Self::Stream> {
        if self.is_closed() {
            return Err(TransportError::ConnectionError(
                "Connection closed".to_string(),
            ));
        }

        let stream_id = self.next_stream_id.fetch_add(1, Ordering::Relaxed);
        let (local, remote) = tokio::io::duplex(PIPE_CAPACITY);

        self.outgoing
            .send(MemoryStream::new(stream_id, remote))
            .map_err(|_| TransportError::ConnectionError("Peer is gone".to_string()))?;

        Ok(MemoryStream::new(stream_id, local))
    }

    async fn accept_stream(&self) -> TransportResult<Option<Self::Stream>> {
        let mut incoming = self.incoming.lock().await;
        let mut state = self.state.subscribe();

        tokio::select! {
            stream = incoming.recv() => Ok(stream),
            _ = state.wait_for(|closed| *closed) => Ok(None),
        }
    }

    async fn close(&self, error_code: u32, reason: &str) {
        trace!(
            "Memory connection {} closed: {} (code: {})",
            self.connection_id,
            reason,
            error_code
        );
        self.state.send_replace(true);
    }

    async fn closed(&self) {
        let mut state = self.state.subscribe();
        let _ = state.wait_for(|closed| *closed).await;
    }

    fn is_closed(&self) -> bool {
        *self.state.borrow()
    }

    fn remote_address(&self) -> SocketAddr {
        self.remote
    }

    fn connection_id(&self) -> String {
        self.connection_id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minitunnel_proto::TunneledResponse;
    use std::time::Duration;

    #[tokio::test]
    async fn test_stream_pair_exchanges_messages() {
        let (mut left, mut right) = stream_pair();

        left.send_message(&TunnelMessage::Hello {}).await.unwrap();
        left.send_message(&TunnelMessage::Heartbeat {}).await.unwrap();

        assert_eq!(
            right.recv_message().await.unwrap(),
            Some(TunnelMessage::Hello {})
        );
        assert_eq!(
            right.recv_message().await.unwrap(),
            Some(TunnelMessage::Heartbeat {})
        );
    }

    #[tokio::test]
    async fn test_finish_signals_end_of_stream() {
        let (mut left, mut right) = stream_pair();

        left.finish().await.unwrap();
        assert_eq!(right.recv_message().await.unwrap(), None);
        assert!(right.is_closed());
        assert!(left
            .send_message(&TunnelMessage::Hello {})
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_truncated_frame_is_incomplete_message() {
        let (mut left, mut right) = stream_pair();

        // Header announces 10 bytes, only 2 arrive before the pipe ends
        left.send.writer.write_all(&[0, 0, 0, 10, b'{', b'}']).await.unwrap();
        left.finish().await.unwrap();

        let err = right.recv_message().await.unwrap_err();
        assert!(
            matches!(err, TransportError::ProtocolError(ref e) if e == "Incomplete message"),
            "unexpected error: {err}"
        );
        assert!(right.is_closed());
    }

    #[tokio::test]
    async fn test_split_halves_work_independently() {
        let (left, mut right) = stream_pair();
        let (mut send, mut recv) = left.split();

        right
            .send_message(&TunnelMessage::Response(TunneledResponse::bad_gateway("x")))
            .await
            .unwrap();
        send.send_message(&TunnelMessage::Heartbeat {}).await.unwrap();

        assert_eq!(
            recv.recv_message().await.unwrap().map(|m| m.message_type()),
            Some(minitunnel_proto::MessageType::Response)
        );
        assert_eq!(
            right.recv_message().await.unwrap(),
            Some(TunnelMessage::Heartbeat {})
        );
    }

    #[tokio::test]
    async fn test_connection_pair_open_and_accept() {
        let (client, server) = connection_pair();

        let mut opened = client.open_stream().await.unwrap();
        let mut accepted = server.accept_stream().await.unwrap().unwrap();
        assert_eq!(opened.stream_id(), accepted.stream_id());

        opened.send_message(&TunnelMessage::Hello {}).await.unwrap();
        assert_eq!(
            accepted.recv_message().await.unwrap(),
            Some(TunnelMessage::Hello {})
        );
    }

    #[tokio::test]
    async fn test_close_wakes_closed_and_accept() {
        let (client, server) = connection_pair();

        let waiter = {
            let server = server.clone();
            tokio::spawn(async move { server.closed().await })
        };
        let acceptor = {
            let server = server.clone();
            tokio::spawn(async move { server.accept_stream().await })
        };

        client.close(0, "done").await;

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("closed() did not resolve")
            .unwrap();
        let accepted = tokio::time::timeout(Duration::from_secs(1), acceptor)
            .await
            .expect("accept_stream() did not resolve")
            .unwrap()
            .unwrap();
        assert!(accepted.is_none());
        assert!(server.is_closed());
        assert!(client.open_stream().await.is_err());
    }
}
