//! Server certificates for `wss://` listeners.

use crate::config::ServerTlsConfig;
use rustls::ServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio_rustls::TlsAcceptor;
use tracing::info;

#[derive(Debug, Error)]
pub enum ServerTlsError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("no certificates found in {0}")]
    NoCertificates(PathBuf),

    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),

    #[error("invalid certificate or key: {0}")]
    Config(#[from] rustls::Error),
}

/// Build a TLS acceptor from a PEM certificate chain and private key.
pub fn acceptor(config: &ServerTlsConfig) -> Result<TlsAcceptor, ServerTlsError> {
    let certs = load_certs(&config.cert)?;
    let key = load_private_key(&config.key)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let server_config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    info!(cert = %config.cert.display(), "TLS enabled");
    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

/// Load a certificate chain from a PEM file.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ServerTlsError> {
    let read_error = |source| ServerTlsError::Read {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = BufReader::new(File::open(path).map_err(read_error)?);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(read_error)?;
    if certs.is_empty() {
        return Err(ServerTlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

/// Load the first private key (PKCS#1, PKCS#8 or SEC1) from a PEM file.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ServerTlsError> {
    let read_error = |source| ServerTlsError::Read {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = BufReader::new(File::open(path).map_err(read_error)?);
    rustls_pemfile::private_key(&mut reader)
        .map_err(read_error)?
        .ok_or_else(|| ServerTlsError::NoPrivateKey(path.to_path_buf()))
}
