//! Tunnel Protocol Definitions
//!
//! This crate defines the message envelope exchanged between a relay and its agents,
//! the HTTP request/response payloads carried inside it, and the length-prefixed
//! codec that frames envelopes on a transport stream.

pub mod codec;
pub mod messages;

pub use codec::{CodecError, TunnelCodec};
pub use messages::*;

/// ALPN protocol identifier negotiated on the secure transport
pub const ALPN_PROTOCOL: &str = "minitunnel";

/// Maximum frame size (16MB)
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;
