//! Client-side TLS for `https` and `wss` hops.

use super::config::TlsPolicy;
use crate::error::DialError;
use crate::stream::BoxedIo;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::io;
use std::sync::Arc;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

/// Build a client configuration for `policy`.
///
/// Skip-verify still checks handshake signatures; it only accepts any
/// certificate chain.
pub fn client_config(policy: &TlsPolicy) -> Result<Arc<ClientConfig>, DialError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| DialError::TlsConfig(e.to_string()))?;

    let config = if policy.insecure_skip_verify {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(SkipServerVerification(provider)))
            .with_no_client_auth()
    } else {
        builder
            .with_root_certificates(native_roots()?)
            .with_no_client_auth()
    };

    Ok(Arc::new(config))
}

fn native_roots() -> Result<RootCertStore, DialError> {
    let loaded = rustls_native_certs::load_native_certs();
    for e in &loaded.errors {
        warn!(error = %e, "failed to load a native root certificate");
    }

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(loaded.certs);
    debug!(added, ignored, "loaded native root certificates");

    if roots.is_empty() {
        return Err(DialError::TlsConfig(
            "no trusted root certificates available".to_string(),
        ));
    }
    Ok(roots)
}

/// Run the TLS handshake over `io`.
pub async fn connect(
    io: BoxedIo,
    server_name: &str,
    config: Arc<ClientConfig>,
) -> Result<BoxedIo, DialError> {
    let tls_error = |source: io::Error| DialError::Tls {
        server_name: server_name.to_string(),
        source,
    };

    let name = ServerName::try_from(server_name.to_string())
        .map_err(|e| tls_error(io::Error::new(io::ErrorKind::InvalidInput, e)))?;
    let stream = TlsConnector::from(config)
        .connect(name, io)
        .await
        .map_err(tls_error)?;

    Ok(Box::new(stream))
}

#[derive(Debug)]
struct SkipServerVerification(Arc<CryptoProvider>);

impl ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
