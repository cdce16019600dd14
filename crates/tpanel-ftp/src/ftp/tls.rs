//! TLS helpers for explicit FTPS (RFC 4217).
//!
//! One `ClientConfig` is built per client and shared by the control channel
//! and every protected data channel, so data handshakes can resume the
//! control channel's session.

use crate::ftp::error::{FtpError, FtpResult};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

/// Build the client TLS configuration.
///
/// With `verify` the OS trust store decides; without it every chain is
/// accepted and the certificate callback is the only gate.
pub fn build_client_config(verify: bool) -> FtpResult<Arc<ClientConfig>> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| FtpError::tls(format!("TLS protocol setup: {}", e)))?;

    let config = if verify {
        builder
            .with_root_certificates(native_roots()?)
            .with_no_client_auth()
    } else {
        log::warn!("FTPS certificate verification disabled; relying on certificate callback");
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCert(provider)))
            .with_no_client_auth()
    };
    Ok(Arc::new(config))
}

fn native_roots() -> FtpResult<RootCertStore> {
    let loaded = rustls_native_certs::load_native_certs();
    for err in &loaded.errors {
        log::warn!("native root certificates: {}", err);
    }
    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(loaded.certs);
    log::debug!("loaded {} native roots ({} ignored)", added, ignored);
    if roots.is_empty() {
        return Err(FtpError::tls("no usable root certificates in the OS trust store"));
    }
    Ok(roots)
}

/// Run a client handshake over `tcp`.
pub async fn handshake(
    config: &Arc<ClientConfig>,
    server_name: &str,
    tcp: TcpStream,
) -> FtpResult<TlsStream<TcpStream>> {
    let name = ServerName::try_from(server_name.to_string())
        .map_err(|e| FtpError::tls(format!("invalid TLS server name '{}': {}", server_name, e)))?;
    TlsConnector::from(config.clone())
        .connect(name, tcp)
        .await
        .map_err(|e| {
            FtpError::tls(format!("TLS handshake with {}: {}", server_name, e))
                .with_os_code(e.raw_os_error())
        })
}

/// End-entity certificate presented by the server, if any.
pub fn peer_certificate(stream: &TlsStream<TcpStream>) -> Option<CertificateDer<'static>> {
    stream
        .get_ref()
        .1
        .peer_certificates()
        .and_then(|chain| chain.first())
        .map(|cert| cert.clone().into_owned())
}

// ─── Permissive verifier ─────────────────────────────────────────────

/// Accepts any certificate chain but still checks handshake signatures.
#[derive(Debug)]
struct AcceptAnyCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCert {
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
