//! Codec for encoding/decoding tunnel messages

use crate::messages::TunnelMessage;
use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

/// Codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),

    #[error("Incomplete message")]
    IncompleteMessage,
}

/// Tunnel message codec
pub struct TunnelCodec;

impl TunnelCodec {
    /// Maximum message size (16MB)
    pub const MAX_MESSAGE_SIZE: usize = crate::MAX_FRAME_SIZE as usize;

    /// Length of the frame header
    pub const HEADER_LEN: usize = 4;

    /// Encode a tunnel message to bytes
    ///
    /// Format: [length: u32 big-endian][payload: JSON envelope]
    pub fn encode(msg: &TunnelMessage) -> Result<Bytes, CodecError> {
        let payload = serde_json::to_vec(msg)?;

        if payload.len() > Self::MAX_MESSAGE_SIZE {
            return Err(CodecError::MessageTooLarge(payload.len()));
        }

        let mut buf = BytesMut::with_capacity(Self::HEADER_LEN + payload.len());
        buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(&payload);

        Ok(buf.freeze())
    }

    /// Decode a tunnel message from bytes
    ///
    /// Returns Ok(Some(message)) if a complete message was decoded,
    /// Ok(None) if more data is needed (the buffer is left untouched),
    /// Err on an oversized frame or a payload that is not a valid envelope.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<TunnelMessage>, CodecError> {
        if buf.len() < Self::HEADER_LEN {
            return Ok(None);
        }

        let mut length_bytes = [0u8; 4];
        length_bytes.copy_from_slice(&buf[..Self::HEADER_LEN]);
        let length = u32::from_be_bytes(length_bytes) as usize;

        if length > Self::MAX_MESSAGE_SIZE {
            return Err(CodecError::MessageTooLarge(length));
        }

        if buf.len() < Self::HEADER_LEN + length {
            return Ok(None);
        }

        buf.advance(Self::HEADER_LEN);
        let msg_bytes = buf.split_to(length);

        let msg: TunnelMessage = serde_json::from_slice(&msg_bytes)?;

        Ok(Some(msg))
    }

    /// Try to decode multiple messages from buffer
    pub fn decode_all(buf: &mut BytesMut) -> Result<Vec<TunnelMessage>, CodecError> {
        let mut messages = Vec::new();

        while let Some(msg) = Self::decode(buf)? {
            messages.push(msg);
        }

        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{HeaderMultimap, TunneledRequest, TunneledResponse, WelcomeInfo};

    #[test]
    fn test_encode_decode() {
        let msg = TunnelMessage::Hello {};

        let encoded = TunnelCodec::encode(&msg).unwrap();
        let mut buf = BytesMut::from(encoded.as_ref());

        let decoded = TunnelCodec::decode(&mut buf).unwrap();
        assert_eq!(decoded, Some(msg));
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn test_decode_incomplete() {
        let msg = TunnelMessage::Welcome(WelcomeInfo {
            client_id: "5b0c7a4e-8d8e-4f0e-9a53-2f6a0d9a1c11".to_string(),
            tunnel_url: "http://localhost:8081/5b0c7a4e-8d8e-4f0e-9a53-2f6a0d9a1c11".to_string(),
        });
        let encoded = TunnelCodec::encode(&msg).unwrap();

        // Only provide length header
        let mut buf = BytesMut::from(&encoded[..4]);
        let result = TunnelCodec::decode(&mut buf).unwrap();
        assert_eq!(result, None);
        assert_eq!(buf.len(), 4);

        // Provide part of the payload
        buf.extend_from_slice(&encoded[4..10]);
        let result = TunnelCodec::decode(&mut buf).unwrap();
        assert_eq!(result, None);

        // Provide rest of message
        buf.extend_from_slice(&encoded[10..]);
        let result = TunnelCodec::decode(&mut buf).unwrap();
        assert_eq!(result, Some(msg));
    }

    #[test]
    fn test_decode_multiple() {
        let msg1 = TunnelMessage::Heartbeat {};
        let msg2 = TunnelMessage::Response(TunneledResponse::bad_gateway("boom"));

        let encoded1 = TunnelCodec::encode(&msg1).unwrap();
        let encoded2 = TunnelCodec::encode(&msg2).unwrap();

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encoded1);
        buf.extend_from_slice(&encoded2);

        let messages = TunnelCodec::decode_all(&mut buf).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], msg1);
        assert_eq!(messages[1], msg2);
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn test_request_round_trip_preserves_binary_body() {
        let mut headers = HeaderMultimap::new();
        headers.insert(
            "Set-Cookie".to_string(),
            vec!["a=1".to_string(), "b=2".to_string()],
        );
        let request = TunneledRequest {
            method: "PUT".to_string(),
            path: "/upload?name=blob.bin".to_string(),
            headers,
            body: vec![0, 159, 146, 150, 255, 10],
        };
        let msg = TunnelMessage::Request(request.clone());

        let encoded = TunnelCodec::encode(&msg).unwrap();
        let mut buf = BytesMut::from(encoded.as_ref());

        match TunnelCodec::decode(&mut buf).unwrap() {
            Some(TunnelMessage::Request(decoded)) => assert_eq!(decoded, request),
            other => panic!("Expected Request message, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_oversized_frame() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&((TunnelCodec::MAX_MESSAGE_SIZE as u32) + 1).to_be_bytes());

        let result = TunnelCodec::decode(&mut buf);
        assert!(matches!(result, Err(CodecError::MessageTooLarge(_))));
    }

    #[test]
    fn test_decode_rejects_malformed_payload() {
        let payload = br#"{"type":"request","payload":"not an object"}"#;
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(payload);

        let result = TunnelCodec::decode(&mut buf);
        assert!(matches!(result, Err(CodecError::Malformed(_))));
    }
}
