//! Relay configuration

use crate::relay::RelayBuilderError;
use minitunnel_transport::TransportResult;
use minitunnel_transport_quic::QuicConfig;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

/// Default control plane port; HTTP ingress listens on the next one
pub const DEFAULT_PORT: u16 = 8080;

/// Where the relay's TLS identity comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelayTls {
    /// Load the PEM pair from `cert_path` / `key_path`
    #[default]
    Pem,
    /// Generate a self-signed pair at `cert_path` / `key_path` unless both exist
    SelfSigned,
    /// Fresh self-signed pair in the temp dir, paths ignored
    Ephemeral,
}

/// Relay configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind_ip: IpAddr,
    /// QUIC control plane port (UDP); the HTTP ingress uses `port + 1` (TCP)
    pub port: u16,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    /// Host name placed in issued tunnel URLs
    pub public_host: String,
    pub tls: RelayTls,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            cert_path: PathBuf::from("certs/server.crt"),
            key_path: PathBuf::from("certs/server.key"),
            public_host: "localhost".to_string(),
            tls: RelayTls::Pem,
        }
    }
}

impl RelayConfig {
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_bind_ip(mut self, ip: IpAddr) -> Self {
        self.bind_ip = ip;
        self
    }

    pub fn with_cert_paths(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.cert_path = cert.into();
        self.key_path = key.into();
        self
    }

    pub fn with_public_host(mut self, host: impl Into<String>) -> Self {
        self.public_host = host.into();
        self
    }

    /// Generate a self-signed certificate when the PEM files are missing
    pub fn with_self_signed(mut self, self_signed: bool) -> Self {
        self.tls = if self_signed {
            RelayTls::SelfSigned
        } else {
            RelayTls::Pem
        };
        self
    }

    pub fn with_tls(mut self, tls: RelayTls) -> Self {
        self.tls = tls;
        self
    }

    pub fn validate(&self) -> Result<(), RelayBuilderError> {
        if !(1..=u16::MAX - 1).contains(&self.port) {
            return Err(RelayBuilderError::InvalidPort(self.port));
        }
        if self.public_host.trim().is_empty() {
            return Err(RelayBuilderError::ConfigError(
                "public host must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn http_port(&self) -> u16 {
        self.port.saturating_add(1)
    }

    pub fn control_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.port)
    }

    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.http_port())
    }

    /// Server-side QUIC configuration for the chosen TLS source
    pub fn quic_config(&self) -> TransportResult<QuicConfig> {
        match self.tls {
            RelayTls::Pem => Ok(QuicConfig::server_default(&self.cert_path, &self.key_path)),
            RelayTls::SelfSigned => {
                let names = vec![self.public_host.clone()];
                QuicConfig::server_self_signed(&self.cert_path, &self.key_path, &names)
            }
            RelayTls::Ephemeral => QuicConfig::server_ephemeral(),
        }
    }
}
