//! QUIC transport implementation using quinn
//!
//! The relay listens with a [`QuicListener`] and agents dial out with a
//! [`QuicConnector`]. Every connection is TLS 1.3 with the `minitunnel` ALPN.
//!
//! # Example
//!
//! ```no_run
//! use minitunnel_transport_quic::{QuicConfig, QuicConnector, QuicListener};
//! use std::sync::Arc;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Relay side
//! let config = Arc::new(QuicConfig::server_default("certs/server.crt", "certs/server.key"));
//! let listener = QuicListener::new("0.0.0.0:8080".parse()?, config)?;
//!
//! // Agent side
//! let connector = QuicConnector::new(Arc::new(QuicConfig::client_insecure()))?;
//! # Ok(())
//! # }
//! ```

// Initialize rustls crypto provider once globally
static CRYPTO_PROVIDER_INIT: std::sync::Once = std::sync::Once::new();

pub(crate) fn ensure_crypto_provider() {
    CRYPTO_PROVIDER_INIT.call_once(|| {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            tracing::debug!("Rustls crypto provider already installed");
        }
    });
}

pub mod config;
pub mod connection;
pub mod listener;
pub mod stream;

pub use config::QuicConfig;
pub use connection::QuicConnection;
pub use listener::{QuicConnector, QuicListener};
pub use stream::{QuicRecvHalf, QuicSendHalf, QuicStream};
