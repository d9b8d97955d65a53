//! Protocol message types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Multi-valued HTTP header map (name -> values in arrival order)
pub type HeaderMultimap = BTreeMap<String, Vec<String>>;

/// Tunnel protocol envelope
///
/// Serialized as `{"type": "<kind>", "payload": {...}}`. `Hello` and `Heartbeat`
/// carry an empty object as payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum TunnelMessage {
    /// Agent -> relay: opens the handshake
    Hello {},
    /// Relay -> agent: handshake accepted, identity assigned
    Welcome(WelcomeInfo),
    /// Relay -> agent: HTTP request to forward to the local service
    Request(TunneledRequest),
    /// Agent -> relay: HTTP response from the local service
    Response(TunneledResponse),
    /// Agent -> relay: keep-alive
    Heartbeat {},
}

impl TunnelMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            TunnelMessage::Hello {} => MessageType::Hello,
            TunnelMessage::Welcome(_) => MessageType::Welcome,
            TunnelMessage::Request(_) => MessageType::Request,
            TunnelMessage::Response(_) => MessageType::Response,
            TunnelMessage::Heartbeat {} => MessageType::Heartbeat,
        }
    }
}

/// Discriminant of a [`TunnelMessage`], used for logging and error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Hello,
    Welcome,
    Request,
    Response,
    Heartbeat,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Hello => "hello",
            MessageType::Welcome => "welcome",
            MessageType::Request => "request",
            MessageType::Response => "response",
            MessageType::Heartbeat => "heartbeat",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity issued to an agent once per session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WelcomeInfo {
    pub client_id: String,
    pub tunnel_url: String,
}

/// HTTP request relayed from the public endpoint to the agent
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TunneledRequest {
    pub method: String,
    /// Path including the query string
    pub path: String,
    #[serde(default, deserialize_with = "nullable::deserialize")]
    pub headers: HeaderMultimap,
    #[serde(default, with = "base64_body")]
    pub body: Vec<u8>,
}

/// HTTP response relayed from the agent back to the public caller
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TunneledResponse {
    pub status_code: u16,
    #[serde(default, deserialize_with = "nullable::deserialize")]
    pub headers: HeaderMultimap,
    #[serde(default, with = "base64_body")]
    pub body: Vec<u8>,
}

impl TunneledResponse {
    /// Synthetic `502 Bad Gateway` carrying `message` as the body
    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self {
            status_code: 502,
            headers: HeaderMultimap::new(),
            body: message.into().into_bytes(),
        }
    }

    /// All values of a header, matched case-insensitively
    pub fn header_values(&self, name: &str) -> Option<&[String]> {
        header_values(&self.headers, name)
    }

    /// Remove every entry of a header, matched case-insensitively
    pub fn remove_header(&mut self, name: &str) {
        remove_header(&mut self.headers, name);
    }
}

/// All values of a header, matched case-insensitively
pub fn header_values<'a>(headers: &'a HeaderMultimap, name: &str) -> Option<&'a [String]> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, values)| values.as_slice())
}

/// Remove every entry of a header, matched case-insensitively
pub fn remove_header(headers: &mut HeaderMultimap, name: &str) {
    headers.retain(|key, _| !key.eq_ignore_ascii_case(name));
}

// Bodies travel as standard base64 strings; `null` means empty.
mod base64_body {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            Some(encoded) => STANDARD
                .decode(encoded.as_bytes())
                .map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}

mod nullable {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de> + Default,
    {
        Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
    }
}
