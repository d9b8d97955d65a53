//! Agent configuration

use crate::heartbeat::HEARTBEAT_INTERVAL;
use std::time::Duration;
use thiserror::Error;

/// Relay port assumed when the server address carries none
pub const DEFAULT_RELAY_PORT: u16 = 8080;

/// Timeout for one request against the local service
pub const DEFAULT_FORWARD_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Server address must not be empty")]
    EmptyServerAddress,

    #[error("Local address must not be empty")]
    EmptyLocalAddress,

    #[error("Local address must be host:port without a scheme, got '{0}'")]
    InvalidLocalAddress(String),

    #[error("Invalid port '{port}' in server address '{address}'")]
    InvalidPort { address: String, port: String },

    #[error("Heartbeat interval must be greater than zero")]
    ZeroHeartbeatInterval,
}

/// Agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Relay control address (`host:port`)
    pub server_addr: String,
    /// Local service address (`host:port`)
    pub local_addr: String,
    /// Skip relay certificate verification
    pub insecure: bool,
    pub forward_timeout: Duration,
    pub heartbeat_interval: Duration,
}

impl AgentConfig {
    pub fn new(server_addr: impl Into<String>, local_addr: impl Into<String>) -> Self {
        Self {
            server_addr: server_addr.into(),
            local_addr: local_addr.into(),
            insecure: false,
            forward_timeout: DEFAULT_FORWARD_TIMEOUT,
            heartbeat_interval: HEARTBEAT_INTERVAL,
        }
    }

    /// Expose `localhost:<port>` through a relay on this machine
    ///
    /// Certificate verification is off since a local relay usually runs with a
    /// self-signed certificate.
    pub fn for_local_port(port: u16) -> Self {
        Self::new(
            format!("localhost:{}", DEFAULT_RELAY_PORT),
            format!("localhost:{}", port),
        )
        .with_insecure(true)
    }

    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    pub fn with_forward_timeout(mut self, timeout: Duration) -> Self {
        self.forward_timeout = timeout;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_addr.trim().is_empty() {
            return Err(ConfigError::EmptyServerAddress);
        }
        if self.local_addr.trim().is_empty() {
            return Err(ConfigError::EmptyLocalAddress);
        }
        if self.local_addr.contains("://") || self.local_addr.contains('/') {
            return Err(ConfigError::InvalidLocalAddress(self.local_addr.clone()));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::ZeroHeartbeatInterval);
        }
        split_host_port(&self.server_addr)?;
        Ok(())
    }

    /// Host and port of the relay
    pub fn relay_host_port(&self) -> Result<(String, u16), ConfigError> {
        split_host_port(&self.server_addr)
    }
}

/// Split a relay address into host and port
///
/// Accepts `host:port`, `[v6]:port`, a bare host (default port) and tolerates a
/// leading `quic://`.
pub fn split_host_port(addr: &str) -> Result<(String, u16), ConfigError> {
    let addr = addr.trim().trim_start_matches("quic://");

    if let Ok(socket_addr) = addr.parse::<std::net::SocketAddr>() {
        return Ok((socket_addr.ip().to_string(), socket_addr.port()));
    }

    match addr.rsplit_once(':') {
        // A bare IPv6 address has colons but no port
        Some((host, _)) if host.contains(':') && !host.starts_with('[') => {
            Ok((addr.to_string(), DEFAULT_RELAY_PORT))
        }
        Some((host, port_str)) => {
            let port = port_str.parse().map_err(|_| ConfigError::InvalidPort {
                address: addr.to_string(),
                port: port_str.to_string(),
            })?;
            let host = host.trim_start_matches('[').trim_end_matches(']');
            Ok((host.to_string(), port))
        }
        None => Ok((addr.to_string(), DEFAULT_RELAY_PORT)),
    }
}
