//! QUIC transport configuration

use minitunnel_cert::{generate_self_signed_cert, load_certs, load_private_key};
use minitunnel_transport::{
    TransportConfig, TransportError, TransportResult, TransportSecurityConfig,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Default keep-alive interval for both ends
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(5);

/// Default idle timeout for both ends
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// QUIC-specific configuration
#[derive(Debug, Clone)]
pub struct QuicConfig {
    security: TransportSecurityConfig,

    /// Server certificate chain (PEM), servers only
    pub server_cert_path: Option<PathBuf>,

    /// Server private key (PEM), servers only
    pub server_key_path: Option<PathBuf>,

    pub keep_alive_interval: Duration,

    pub max_idle_timeout: Duration,

    /// Maximum number of concurrent bidirectional streams the peer may open
    pub max_concurrent_streams: u64,
}

impl QuicConfig {
    /// Create a client configuration that verifies the relay against the webpki roots
    pub fn client_default() -> Self {
        Self {
            security: TransportSecurityConfig::default(),
            server_cert_path: None,
            server_key_path: None,
            keep_alive_interval: DEFAULT_KEEP_ALIVE,
            max_idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_concurrent_streams: 16,
        }
    }

    /// Create a client configuration that accepts any relay certificate
    ///
    /// **INSECURE**: only for relays running with self-signed certificates.
    pub fn client_insecure() -> Self {
        Self::client_default().with_insecure_skip_verify()
    }

    /// Create a server configuration from PEM certificate and key paths
    ///
    /// The files are read when the listener is built.
    pub fn server_default(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            security: TransportSecurityConfig::default(),
            server_cert_path: Some(cert_path.into()),
            server_key_path: Some(key_path.into()),
            keep_alive_interval: DEFAULT_KEEP_ALIVE,
            max_idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_concurrent_streams: 16,
        }
    }

    /// Create a server configuration, generating a self-signed pair if either file is missing
    ///
    /// Existing files are reused untouched. `names` are added to the generated
    /// certificate's subject alternative names.
    pub fn server_self_signed(
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
        names: &[String],
    ) -> TransportResult<Self> {
        let config = Self::server_default(cert_path, key_path);
        let (cert_path, key_path) = config.server_paths()?;

        if cert_path.exists() && key_path.exists() {
            return Ok(config);
        }

        let cert = generate_self_signed_cert(names).map_err(|e| {
            TransportError::TlsError(format!("Failed to generate self-signed cert: {}", e))
        })?;
        cert.save_to_files(cert_path, key_path)
            .map_err(|e| TransportError::TlsError(format!("Failed to save cert files: {}", e)))?;

        info!(
            "Generated self-signed certificate at {} (agents must use --insecure)",
            cert_path.display()
        );

        Ok(config)
    }

    /// Create a server configuration with a fresh self-signed certificate in the temp dir
    ///
    /// Every call writes a uniquely named pair, so parallel tests never collide.
    #[doc(hidden)]
    pub fn server_ephemeral() -> TransportResult<Self> {
        let unique_id = uuid::Uuid::new_v4();
        let temp_dir = std::env::temp_dir();

        Self::server_self_signed(
            temp_dir.join(format!("minitunnel-quic-test-{}.crt", unique_id)),
            temp_dir.join(format!("minitunnel-quic-test-{}.key", unique_id)),
            &[],
        )
    }

    pub fn with_keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.max_idle_timeout = timeout;
        self
    }

    pub fn with_max_streams(mut self, max: u64) -> Self {
        self.max_concurrent_streams = max;
        self
    }

    /// Disable server certificate verification (INSECURE)
    pub fn with_insecure_skip_verify(mut self) -> Self {
        self.security.verify_server_cert = false;
        self
    }

    /// Trust an extra root certificate (DER) instead of the webpki roots
    pub fn with_root_cert(mut self, cert_der: Vec<u8>) -> Self {
        self.security.root_certs.push(cert_der);
        self
    }

    pub fn with_alpn_protocols(mut self, protocols: Vec<String>) -> Self {
        self.security.alpn_protocols = protocols;
        self
    }

    fn server_paths(&self) -> TransportResult<(&Path, &Path)> {
        let cert_path = self.server_cert_path.as_deref().ok_or_else(|| {
            TransportError::ConfigurationError("Server cert path required".to_string())
        })?;
        let key_path = self.server_key_path.as_deref().ok_or_else(|| {
            TransportError::ConfigurationError("Server key path required".to_string())
        })?;
        Ok((cert_path, key_path))
    }

    fn alpn(&self) -> Vec<Vec<u8>> {
        self.security
            .alpn_protocols
            .iter()
            .map(|s| s.as_bytes().to_vec())
            .collect()
    }

    fn transport(&self) -> TransportResult<quinn::TransportConfig> {
        let idle = quinn::IdleTimeout::try_from(self.max_idle_timeout)
            .map_err(|e| TransportError::ConfigurationError(format!("Idle timeout: {}", e)))?;
        let streams = quinn::VarInt::from_u64(self.max_concurrent_streams).map_err(|e| {
            TransportError::ConfigurationError(format!("Max concurrent streams: {}", e))
        })?;

        let mut transport = quinn::TransportConfig::default();
        transport.keep_alive_interval(Some(self.keep_alive_interval));
        transport.max_idle_timeout(Some(idle));
        transport.max_concurrent_bidi_streams(streams);
        Ok(transport)
    }

    pub(crate) fn build_client_config(&self) -> TransportResult<quinn::ClientConfig> {
        crate::ensure_crypto_provider();

        let mut roots = rustls::RootCertStore::empty();
        if self.security.root_certs.is_empty() {
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        } else {
            for cert_der in &self.security.root_certs {
                roots
                    .add(rustls::pki_types::CertificateDer::from(cert_der.clone()))
                    .map_err(|e| {
                        TransportError::ConfigurationError(format!("Invalid root cert: {}", e))
                    })?;
            }
        }

        let mut client_crypto = if self.security.verify_server_cert {
            rustls::ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth()
        } else {
            rustls::ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(SkipVerification::new())
                .with_no_client_auth()
        };
        client_crypto.alpn_protocols = self.alpn();

        let mut client_config = quinn::ClientConfig::new(Arc::new(
            quinn::crypto::rustls::QuicClientConfig::try_from(client_crypto)
                .map_err(|e| TransportError::TlsError(e.to_string()))?,
        ));
        client_config.transport_config(Arc::new(self.transport()?));

        Ok(client_config)
    }

    pub(crate) fn build_server_config(&self) -> TransportResult<quinn::ServerConfig> {
        crate::ensure_crypto_provider();

        let (cert_path, key_path) = self.server_paths()?;
        let certs = load_certs(cert_path).map_err(|e| TransportError::TlsError(e.to_string()))?;
        let key =
            load_private_key(key_path).map_err(|e| TransportError::TlsError(e.to_string()))?;

        let mut server_crypto = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| TransportError::TlsError(format!("Invalid cert/key: {}", e)))?;
        server_crypto.alpn_protocols = self.alpn();

        let mut server_config = quinn::ServerConfig::with_crypto(Arc::new(
            quinn::crypto::rustls::QuicServerConfig::try_from(server_crypto)
                .map_err(|e| TransportError::TlsError(e.to_string()))?,
        ));
        server_config.transport_config(Arc::new(self.transport()?));

        Ok(server_config)
    }
}

impl TransportConfig for QuicConfig {
    fn security_config(&self) -> &TransportSecurityConfig {
        &self.security
    }

    fn validate(&self) -> TransportResult<()> {
        if self.keep_alive_interval.is_zero() {
            return Err(TransportError::ConfigurationError(
                "Keep-alive interval must be > 0".to_string(),
            ));
        }

        if self.max_idle_timeout < self.keep_alive_interval * 2 {
            return Err(TransportError::ConfigurationError(
                "Idle timeout must be at least 2x keep-alive interval".to_string(),
            ));
        }

        if self.security.alpn_protocols.is_empty() {
            return Err(TransportError::ConfigurationError(
                "At least one ALPN protocol is required".to_string(),
            ));
        }

        Ok(())
    }
}

// Accepts any server certificate (INSECURE)
#[derive(Debug)]
struct SkipVerification(Arc<rustls::crypto::CryptoProvider>);

impl SkipVerification {
    fn new() -> Arc<Self> {
        Arc::new(Self(Arc::new(rustls::crypto::ring::default_provider())))
    }
}

impl rustls::client::danger::ServerCertVerifier for SkipVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_default() {
        let config = QuicConfig::client_default();
        assert_eq!(config.keep_alive_interval, Duration::from_secs(5));
        assert_eq!(config.max_idle_timeout, Duration::from_secs(30));
        assert!(config.security_config().verify_server_cert);
        assert_eq!(config.security_config().alpn_protocols, vec!["minitunnel"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_client_insecure() {
        let config = QuicConfig::client_insecure();
        assert!(!config.security_config().verify_server_cert);
        assert!(config.build_client_config().is_ok());
    }

    #[test]
    fn test_invalid_config_validation() {
        let config = QuicConfig::client_default().with_idle_timeout(Duration::from_secs(1));
        assert!(config.validate().is_err());

        let config = QuicConfig::client_default().with_alpn_protocols(Vec::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_server_config_missing_files() {
        let config = QuicConfig::server_default("/nonexistent/server.crt", "/nonexistent/server.key");
        assert!(matches!(
            config.build_server_config(),
            Err(TransportError::TlsError(_))
        ));
    }

    #[test]
    fn test_server_ephemeral_builds() {
        let config = QuicConfig::server_ephemeral().unwrap();
        assert!(config.server_cert_path.as_ref().unwrap().exists());
        assert!(config.build_server_config().is_ok());
    }

    #[test]
    fn test_server_self_signed_reuses_existing_files() {
        let first = QuicConfig::server_ephemeral().unwrap();
        let cert_path = first.server_cert_path.clone().unwrap();
        let key_path = first.server_key_path.clone().unwrap();
        let before = std::fs::read(&cert_path).unwrap();

        QuicConfig::server_self_signed(&cert_path, &key_path, &[]).unwrap();

        assert_eq!(std::fs::read(&cert_path).unwrap(), before);
    }
}
