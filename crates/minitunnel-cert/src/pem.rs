//! PEM file loading

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CertError {
    #[error("Failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No certificates found in {0}")]
    NoCertificates(String),

    #[error("No private key found in {0}")]
    NoPrivateKey(String),
}

fn open(path: &Path) -> Result<BufReader<File>, CertError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| CertError::Open {
            path: path.display().to_string(),
            source,
        })
}

/// Load every certificate of a PEM chain
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, CertError> {
    let mut reader = open(path)?;

    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| CertError::Parse {
            path: path.display().to_string(),
            source,
        })?;

    if certs.is_empty() {
        return Err(CertError::NoCertificates(path.display().to_string()));
    }

    Ok(certs)
}

/// Load the first private key (PKCS#8, PKCS#1 or SEC1) of a PEM file
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, CertError> {
    let mut reader = open(path)?;

    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| CertError::Parse {
            path: path.display().to_string(),
            source,
        })?
        .ok_or_else(|| CertError::NoPrivateKey(path.display().to_string()))
}
