//! Self-signed certificate generation for development and testing
//!
//! Lets a relay come up without a CA-issued certificate. Agents must connect
//! with certificate verification disabled.

use rcgen::{CertificateParams, DistinguishedName, DnType, Ia5String, KeyPair, SanType};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::debug;

/// Validity window of generated certificates
const VALIDITY: Duration = Duration::from_secs(90 * 24 * 60 * 60);

#[derive(Error, Debug)]
pub enum SelfSignedError {
    #[error("Certificate generation failed: {0}")]
    GenerationFailed(String),

    #[error("Key generation failed: {0}")]
    KeyGenerationFailed(String),

    #[error("Invalid subject name {0:?}")]
    InvalidName(String),
}

/// Generate a self-signed certificate
///
/// The certificate always covers `localhost`, `127.0.0.1` and `::1`. Extra
/// `names` are added as DNS or IP subject alternative names, so the relay's
/// public host can be included.
///
/// # Example
/// ```no_run
/// use minitunnel_cert::generate_self_signed_cert;
///
/// let cert = generate_self_signed_cert(&["tunnel.example.test".to_string()]).unwrap();
/// cert.save_to_files("certs/server.crt", "certs/server.key").unwrap();
/// ```
pub fn generate_self_signed_cert(
    names: &[String],
) -> Result<SelfSignedCertificate, SelfSignedError> {
    let mut params = CertificateParams::default();

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, "minitunnel relay");
    dn.push(DnType::OrganizationName, "minitunnel");
    params.distinguished_name = dn;

    let mut sans = vec![
        dns_name("localhost")?,
        SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        SanType::IpAddress(IpAddr::V6(Ipv6Addr::LOCALHOST)),
    ];
    for name in names {
        let san = match name.parse::<IpAddr>() {
            Ok(ip) => SanType::IpAddress(ip),
            Err(_) => dns_name(name)?,
        };
        if !sans.contains(&san) {
            sans.push(san);
        }
    }
    params.subject_alt_names = sans;

    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_err(|e| SelfSignedError::GenerationFailed(e.to_string()))?;
    params.not_before = time::OffsetDateTime::from_unix_timestamp(now.as_secs() as i64)
        .map_err(|e| SelfSignedError::GenerationFailed(e.to_string()))?;
    params.not_after = time::OffsetDateTime::from_unix_timestamp((now + VALIDITY).as_secs() as i64)
        .map_err(|e| SelfSignedError::GenerationFailed(e.to_string()))?;

    params.serial_number = Some(rcgen::SerialNumber::from(rand::random::<u64>()));

    let key_pair =
        KeyPair::generate().map_err(|e| SelfSignedError::KeyGenerationFailed(e.to_string()))?;

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| SelfSignedError::GenerationFailed(e.to_string()))?;

    debug!("Generated self-signed certificate for {} extra name(s)", names.len());

    Ok(SelfSignedCertificate {
        cert_der: CertificateDer::from(cert.der().to_vec()),
        key_der: PrivateKeyDer::try_from(key_pair.serialize_der())
            .map_err(|e| SelfSignedError::KeyGenerationFailed(e.to_string()))?,
        pem_cert: cert.pem(),
        pem_key: key_pair.serialize_pem(),
    })
}

fn dns_name(name: &str) -> Result<SanType, SelfSignedError> {
    Ia5String::try_from(name)
        .map(SanType::DnsName)
        .map_err(|_| SelfSignedError::InvalidName(name.to_string()))
}

/// A self-signed certificate with its private key
pub struct SelfSignedCertificate {
    /// Certificate in DER format
    pub cert_der: CertificateDer<'static>,

    /// Private key in DER format
    pub key_der: PrivateKeyDer<'static>,

    /// Certificate in PEM format
    pub pem_cert: String,

    /// Private key in PEM format
    pub pem_key: String,
}

impl SelfSignedCertificate {
    /// Save certificate and key to PEM files, creating parent directories
    pub fn save_to_files(
        &self,
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
    ) -> std::io::Result<()> {
        for path in [cert_path.as_ref(), key_path.as_ref()] {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }
        std::fs::write(cert_path, &self.pem_cert)?;
        std::fs::write(key_path, &self.pem_key)?;
        Ok(())
    }
}
