//! TLS settings built from caller-supplied PEM material (rustls, ring provider).
//!
//! - [`TlsClientSettings`]: CA bundle plus a switch to skip server verification.
//! - [`TlsServerSettings`]: certificate chain plus private key.

use std::io;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig, SignatureScheme};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::error::{Error, Result};

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Client-side TLS: which roots to trust and whether to check the server at all.
#[derive(Clone)]
pub struct TlsClientSettings {
    config: Arc<ClientConfig>,
    verify_server: bool,
}

impl std::fmt::Debug for TlsClientSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsClientSettings")
            .field("verify_server", &self.verify_server)
            .finish_non_exhaustive()
    }
}

impl TlsClientSettings {
    /// Build from a PEM CA bundle. The bundle must contain at least one usable
    /// certificate even when `verify_server` is false.
    pub fn from_pem(ca_pem: &[u8], verify_server: bool) -> Result<Self> {
        let roots = root_store(ca_pem)?;
        let provider = provider();
        let builder =
            ClientConfig::builder_with_provider(provider.clone()).with_safe_default_protocol_versions()?;
        let config = if verify_server {
            builder.with_root_certificates(roots).with_no_client_auth()
        } else {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(SkipServerVerification {
                    algorithms: provider.signature_verification_algorithms,
                }))
                .with_no_client_auth()
        };
        Ok(Self {
            config: Arc::new(config),
            verify_server,
        })
    }

    pub fn verify_server(&self) -> bool {
        self.verify_server
    }

    pub fn connector(&self) -> TlsConnector {
        TlsConnector::from(self.config.clone())
    }
}

/// Server-side TLS: the certificate chain presented to clients and its key.
#[derive(Clone)]
pub struct TlsServerSettings {
    config: Arc<ServerConfig>,
}

impl std::fmt::Debug for TlsServerSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsServerSettings").finish_non_exhaustive()
    }
}

impl TlsServerSettings {
    /// Build from a PEM certificate chain and a PEM private key (PKCS#8, PKCS#1 or SEC1).
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self> {
        let certs = parse_certs(cert_pem)?;
        let key = parse_private_key(key_pem)?;
        let config = ServerConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_single_cert(certs, key)?;
        Ok(Self {
            config: Arc::new(config),
        })
    }

    pub fn acceptor(&self) -> TlsAcceptor {
        TlsAcceptor::from(self.config.clone())
    }
}

/// SNI / verification name for `host` (DNS name or IP literal).
pub fn server_name(host: &str) -> Result<ServerName<'static>> {
    ServerName::try_from(host.to_string())
        .map_err(|e| Error::Tls(format!("invalid server name {host}: {e}")))
}

fn parse_certs(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = pem;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<io::Result<Vec<_>>>()
        .map_err(|e| Error::Tls(format!("parse certificates: {e}")))?;
    if certs.is_empty() {
        return Err(Error::Tls("no certificates found in pem".to_string()));
    }
    Ok(certs)
}

fn parse_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>> {
    let mut reader = pem;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| Error::Tls(format!("parse private key: {e}")))?
        .ok_or_else(|| Error::Tls("no private key found in pem".to_string()))
}

fn root_store(ca_pem: &[u8]) -> Result<RootCertStore> {
    let mut store = RootCertStore::empty();
    let (added, ignored) = store.add_parsable_certificates(parse_certs(ca_pem)?);
    if added == 0 {
        return Err(Error::Tls(format!("cannot load ca certs ({ignored} rejected)")));
    }
    Ok(store)
}

/// Accepts any server certificate. Handshake signatures are still checked so the
/// peer must hold the key of the certificate it presents.
#[derive(Debug)]
struct SkipServerVerification {
    algorithms: WebPkiSupportedAlgorithms,
}

impl ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn material() -> (String, String) {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        (cert.cert.pem(), cert.key_pair.serialize_pem())
    }

    #[test]
    fn server_settings_from_generated_pem() {
        let (cert, key) = material();
        assert!(TlsServerSettings::from_pem(cert.as_bytes(), key.as_bytes()).is_ok());
    }

    #[test]
    fn client_settings_with_and_without_verification() {
        let (cert, _) = material();
        let verified = TlsClientSettings::from_pem(cert.as_bytes(), true).unwrap();
        assert!(verified.verify_server());
        let unverified = TlsClientSettings::from_pem(cert.as_bytes(), false).unwrap();
        assert!(!unverified.verify_server());
    }

    #[test]
    fn garbage_ca_is_rejected_even_without_verification() {
        let err = TlsClientSettings::from_pem(b"not a pem", false).unwrap_err();
        assert!(matches!(err, Error::Tls(_)));
    }

    #[test]
    fn missing_key_is_rejected() {
        let (cert, _) = material();
        let err = TlsServerSettings::from_pem(cert.as_bytes(), cert.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::Tls(msg) if msg.contains("private key")));
    }

    #[test]
    fn server_name_accepts_dns_and_ip() {
        assert!(server_name("localhost").is_ok());
        assert!(server_name("127.0.0.1").is_ok());
        assert!(server_name("bad name!").is_err());
    }
}
