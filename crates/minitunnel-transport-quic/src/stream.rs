//! QUIC stream implementation

use async_trait::async_trait;
use bytes::BytesMut;
use minitunnel_proto::{CodecError, TunnelCodec, TunnelMessage};
use minitunnel_transport::{
    TransportError, TransportRecvHalf, TransportResult, TransportSendHalf, TransportStream,
};
use quinn::{RecvStream, SendStream};
use tracing::trace;

const READ_CHUNK: usize = 8192;

/// QUIC bidirectional stream carrying framed tunnel messages
#[derive(Debug)]
pub struct QuicStream {
    send: QuicSendHalf,
    recv: QuicRecvHalf,
}

impl QuicStream {
    pub fn new(send: SendStream, recv: RecvStream) -> Self {
        let stream_id = send.id().index();
        Self {
            send: QuicSendHalf {
                send,
                stream_id,
                closed: false,
            },
            recv: QuicRecvHalf {
                recv,
                stream_id,
                closed: false,
                recv_buffer: BytesMut::with_capacity(READ_CHUNK),
            },
        }
    }
}

#[async_trait]
impl TransportStream for QuicStream {
    type SendHalf = QuicSendHalf;
    type RecvHalf = QuicRecvHalf;

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

    fn split(self) -> (QuicSendHalf, QuicRecvHalf) {
        (self.send, self.recv)
    }
}

/// Send half of a QUIC stream
#[derive(Debug)]
pub struct QuicSendHalf {
    send: SendStream,
    stream_id: u64,
    closed: bool,
}

#[async_trait]
impl TransportSendHalf for QuicSendHalf {
    async fn send_message(&mut self, message: &TunnelMessage) -> TransportResult<()> {
        if self.closed {
            return Err(TransportError::StreamClosed);
        }

        let encoded = TunnelCodec::encode(message)?;

        self.send.write_all(&encoded).await.map_err(|e| {
            self.closed = true;
            TransportError::ConnectionError(e.to_string())
        })?;

        trace!(
            "Sent {} on stream {} ({} bytes)",
            message.message_type(),
            self.stream_id,
            encoded.len()
        );
        Ok(())
    }

    async fn finish(&mut self) -> TransportResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        self.send
            .finish()
            .map_err(|e| TransportError::ConnectionError(e.to_string()))
    }

    fn stream_id(&self) -> u64 {
        self.stream_id
    }
}

/// Receive half of a QUIC stream
#[derive(Debug)]
pub struct QuicRecvHalf {
    recv: RecvStream,
    stream_id: u64,
    closed: bool,
    recv_buffer: BytesMut,
}

#[async_trait]
impl TransportRecvHalf for QuicRecvHalf {
    async fn recv_message(&mut self) -> TransportResult<Option<TunnelMessage>> {
        if self.closed {
            return Ok(None);
        }

        loop {
            if let Some(message) = TunnelCodec::decode(&mut self.recv_buffer)? {
                trace!(
                    "Received {} on stream {}",
                    message.message_type(),
                    self.stream_id
                );
                return Ok(Some(message));
            }

            match self.recv.read_chunk(READ_CHUNK, true).await {
                Ok(Some(chunk)) => {
                    self.recv_buffer.extend_from_slice(&chunk.bytes);
                }
                Ok(None) => {
                    self.closed = true;
                    if self.recv_buffer.is_empty() {
                        return Ok(None);
                    }
                    return Err(CodecError::IncompleteMessage.into());
                }
                Err(quinn::ReadError::ConnectionLost(e)) => {
                    self.closed = true;
                    return Err(TransportError::ConnectionError(format!(
                        "Connection lost: {}",
                        e
                    )));
                }
                Err(e) => {
                    self.closed = true;
                    return Err(TransportError::ConnectionError(e.to_string()));
                }
            }
        }
    }

    fn stream_id(&self) -> u64 {
        self.stream_id
    }
}
