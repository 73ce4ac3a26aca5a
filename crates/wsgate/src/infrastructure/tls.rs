//! TLS material loading for `wss://` clients.
//!
//! The certificate chain and private key are read once at startup from PEM
//! files. The key may live in the certificate file itself (the common
//! "combined PEM" layout), which is what happens when no key path is given.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use thiserror::Error;
use tokio_rustls::TlsAcceptor;
use tracing::debug;

/// Errors raised while loading TLS material.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificates found in {0}")]
    NoCertificates(PathBuf),

    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),

    #[error("invalid TLS configuration: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Builds a [`TlsAcceptor`] from PEM files.
///
/// `key` defaults to `cert` when `None`.
///
/// # Errors
///
/// Returns [`TlsError`] when a file cannot be read, holds no usable
/// certificate or key, or the pair is rejected by rustls.
pub fn load_tls_acceptor(cert: &Path, key: Option<&Path>) -> Result<TlsAcceptor, TlsError> {
    let key = key.unwrap_or(cert);
    let certs = load_certs(cert)?;
    let private_key = load_private_key(key)?;
    debug!(
        "loaded {} certificate(s) from {} and key from {}",
        certs.len(),
        cert.display(),
        key.display()
    );

    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()?
    .with_no_client_auth()
    .with_single_cert(certs, private_key)?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
