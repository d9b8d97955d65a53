//! Certificate handling for the relay's QUIC endpoint
//!
//! Loads PEM certificate chains and private keys from disk and generates
//! self-signed certificates for development and tests.

pub mod pem;
pub mod self_signed;

pub use pem::{load_certs, load_private_key, CertError};
pub use self_signed::{generate_self_signed_cert, SelfSignedCertificate, SelfSignedError};
