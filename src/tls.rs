//! TLS configuration for secure TCP endpoints.
//!
//! A [`TlsConfig`] attached to a TCP client wraps the connection in a
//! client-side TLS session after connect; a [`ServerTlsConfig`] attached
//! to a TCP server wraps every accepted connection in a server-side
//! session before the peer is constructed.
//!
//! # Custom CA certificates
//!
//! ```ignore
//! use seine::tls::{Certificate, TlsConfig};
//!
//! let ca = Certificate::from_pem_file("/path/to/ca.crt")?;
//! let tls = TlsConfig::new().add_root_certificate(ca);
//! ```
//!
//! # Server identity and mutual TLS
//!
//! ```ignore
//! use seine::tls::{Identity, ServerTlsConfig};
//!
//! let identity = Identity::from_pem_files("/path/to/server.crt", "/path/to/server.key")?;
//! let tls = ServerTlsConfig::new(identity).require_client_auth(ca);
//! ```

use std::io::{BufReader, Cursor};
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore, ServerConfig};

use crate::error::{NetError, Result};

/// Minimum TLS protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsVersion {
    /// TLS 1.2 (default minimum).
    #[default]
    Tls1_2,
    /// TLS 1.3 only.
    Tls1_3,
}

impl TlsVersion {
    fn to_rustls_versions(self) -> Vec<&'static rustls::SupportedProtocolVersion> {
        match self {
            TlsVersion::Tls1_2 => vec![&rustls::version::TLS12, &rustls::version::TLS13],
            TlsVersion::Tls1_3 => vec![&rustls::version::TLS13],
        }
    }
}

/// A certificate, or chain of certificates, in DER form.
#[derive(Clone)]
pub struct Certificate {
    der_certs: Vec<CertificateDer<'static>>,
}

impl std::fmt::Debug for Certificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Certificate")
            .field("cert_count", &self.der_certs.len())
            .finish()
    }
}

impl Certificate {
    /// Load a certificate (or chain) from PEM-encoded bytes.
    pub fn from_pem(pem_data: impl AsRef<[u8]>) -> Result<Self> {
        let mut reader = BufReader::new(Cursor::new(pem_data.as_ref()));
        let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| NetError::Tls(format!("Failed to parse PEM certificate: {}", e)))?;

        if certs.is_empty() {
            return Err(NetError::Tls("No certificates found in PEM data".into()));
        }

        Ok(Self { der_certs: certs })
    }

    /// Load a certificate from a PEM-encoded file.
    pub fn from_pem_file(path: impl AsRef<Path>) -> Result<Self> {
        let pem_data = std::fs::read(path.as_ref()).map_err(|e| {
            NetError::Tls(format!(
                "Failed to read certificate file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_pem(pem_data)
    }

    /// Wrap DER-encoded bytes as a certificate.
    pub fn from_der(der_data: impl Into<Vec<u8>>) -> Self {
        Self {
            der_certs: vec![CertificateDer::from(der_data.into())],
        }
    }

    fn der_certs(&self) -> &[CertificateDer<'static>] {
        &self.der_certs
    }
}

/// A certificate chain plus its private key: a client identity for
/// mutual TLS, or a server's own identity.
pub struct Identity {
    cert_chain: Vec<CertificateDer<'static>>,
    private_key: PrivateKeyDer<'static>,
}

impl Clone for Identity {
    fn clone(&self) -> Self {
        Self {
            cert_chain: self.cert_chain.clone(),
            private_key: self.private_key.clone_key(),
        }
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("cert_count", &self.cert_chain.len())
            .field("has_key", &true)
            .finish()
    }
}

impl Identity {
    /// Create an identity from PEM-encoded certificate and key bytes.
    ///
    /// The certificate may be a chain, leaf first.
    pub fn from_pem(cert_pem: impl AsRef<[u8]>, key_pem: impl AsRef<[u8]>) -> Result<Self> {
        let mut cert_reader = BufReader::new(Cursor::new(cert_pem.as_ref()));
        let cert_chain: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_reader)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| NetError::Tls(format!("Failed to parse certificate PEM: {}", e)))?;

        if cert_chain.is_empty() {
            return Err(NetError::Tls("No certificates found in PEM data".into()));
        }

        let mut key_reader = BufReader::new(Cursor::new(key_pem.as_ref()));
        let private_key = rustls_pemfile::private_key(&mut key_reader)
            .map_err(|e| NetError::Tls(format!("Failed to parse private key PEM: {}", e)))?
            .ok_or_else(|| NetError::Tls("No private key found in PEM data".into()))?;

        Ok(Self {
            cert_chain,
            private_key,
        })
    }

    /// Create an identity from PEM-encoded files.
    pub fn from_pem_files(
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
    ) -> Result<Self> {
        let cert_pem = std::fs::read(cert_path.as_ref()).map_err(|e| {
            NetError::Tls(format!(
                "Failed to read certificate file '{}': {}",
                cert_path.as_ref().display(),
                e
            ))
        })?;
        let key_pem = std::fs::read(key_path.as_ref()).map_err(|e| {
            NetError::Tls(format!(
                "Failed to read key file '{}': {}",
                key_path.as_ref().display(),
                e
            ))
        })?;
        Self::from_pem(cert_pem, key_pem)
    }

    fn cert_chain(&self) -> &[CertificateDer<'static>] {
        &self.cert_chain
    }

    fn private_key(&self) -> &PrivateKeyDer<'static> {
        &self.private_key
    }
}

/// TLS configuration for a TCP client.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// Additional root certificates to trust.
    pub root_certificates: Vec<Certificate>,
    /// Whether to use only the provided root certificates (no system roots).
    pub use_only_custom_roots: bool,
    /// Client identity for mutual TLS.
    pub identity: Option<Identity>,
    /// Minimum TLS version.
    pub min_version: TlsVersion,
    /// Accept invalid/self-signed certificates (DANGEROUS - testing only).
    pub danger_accept_invalid_certs: bool,
}

impl TlsConfig {
    /// Create a new TLS configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a root certificate to trust.
    pub fn add_root_certificate(mut self, cert: Certificate) -> Self {
        self.root_certificates.push(cert);
        self
    }

    /// Use only custom root certificates (disable the bundled web roots).
    pub fn use_only_custom_roots(mut self) -> Self {
        self.use_only_custom_roots = true;
        self
    }

    /// Set the client identity for mutual TLS.
    pub fn identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Set the minimum TLS version.
    pub fn min_version(mut self, version: TlsVersion) -> Self {
        self.min_version = version;
        self
    }

    /// Accept invalid certificates (DANGEROUS - for testing only).
    ///
    /// # Warning
    ///
    /// This disables certificate verification and makes the connection
    /// vulnerable to man-in-the-middle attacks.
    pub fn danger_accept_invalid_certs(mut self) -> Self {
        self.danger_accept_invalid_certs = true;
        self
    }

    /// Build the rustls client configuration this config describes.
    pub fn build_client_config(&self) -> Result<Arc<ClientConfig>> {
        if self.danger_accept_invalid_certs {
            return self.build_dangerous_client_config();
        }

        let root_store = self.build_root_store()?;
        let versions = self.min_version.to_rustls_versions();

        let builder = ClientConfig::builder_with_protocol_versions(&versions)
            .with_root_certificates(root_store);

        let config = if let Some(ref identity) = self.identity {
            builder
                .with_client_auth_cert(
                    identity.cert_chain().to_vec(),
                    identity.private_key().clone_key(),
                )
                .map_err(|e| NetError::Tls(format!("Invalid client certificate: {}", e)))?
        } else {
            builder.with_no_client_auth()
        };

        Ok(Arc::new(config))
    }

    fn build_dangerous_client_config(&self) -> Result<Arc<ClientConfig>> {
        let versions = self.min_version.to_rustls_versions();

        let builder = ClientConfig::builder_with_protocol_versions(&versions)
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(DangerousVerifier));

        let config = if let Some(ref identity) = self.identity {
            builder
                .with_client_auth_cert(
                    identity.cert_chain().to_vec(),
                    identity.private_key().clone_key(),
                )
                .map_err(|e| NetError::Tls(format!("Invalid client certificate: {}", e)))?
        } else {
            builder.with_no_client_auth()
        };

        Ok(Arc::new(config))
    }

    fn build_root_store(&self) -> Result<RootCertStore> {
        let mut root_store = RootCertStore::empty();

        if !self.use_only_custom_roots {
            root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        }

        for cert in &self.root_certificates {
            for der_cert in cert.der_certs() {
                root_store.add(der_cert.clone()).map_err(|e| {
                    NetError::Tls(format!("Failed to add root certificate: {}", e))
                })?;
            }
        }

        if root_store.is_empty() {
            return Err(NetError::Tls(
                "No root certificates available. Either add custom certificates or \
                 don't use use_only_custom_roots()"
                    .into(),
            ));
        }

        Ok(root_store)
    }
}

/// TLS configuration for a TCP server.
#[derive(Debug, Clone)]
pub struct ServerTlsConfig {
    /// The server's own certificate chain and key.
    pub identity: Identity,
    /// Roots used to verify client certificates. Setting any makes
    /// client authentication mandatory.
    pub client_auth_roots: Vec<Certificate>,
    /// Minimum TLS version.
    pub min_version: TlsVersion,
}

impl ServerTlsConfig {
    /// Create a server TLS configuration presenting `identity`.
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            client_auth_roots: Vec::new(),
            min_version: TlsVersion::default(),
        }
    }

    /// Require clients to present a certificate issued by `root`.
    pub fn require_client_auth(mut self, root: Certificate) -> Self {
        self.client_auth_roots.push(root);
        self
    }

    /// Set the minimum TLS version.
    pub fn min_version(mut self, version: TlsVersion) -> Self {
        self.min_version = version;
        self
    }

    /// Build the rustls server configuration this config describes.
    pub fn build_server_config(&self) -> Result<Arc<ServerConfig>> {
        let versions = self.min_version.to_rustls_versions();
        let builder = ServerConfig::builder_with_protocol_versions(&versions);

        let builder = if self.client_auth_roots.is_empty() {
            builder.with_no_client_auth()
        } else {
            let mut roots = RootCertStore::empty();
            for cert in &self.client_auth_roots {
                for der_cert in cert.der_certs() {
                    roots.add(der_cert.clone()).map_err(|e| {
                        NetError::Tls(format!("Failed to add client-auth root: {}", e))
                    })?;
                }
            }
            let verifier = rustls::server::WebPkiClientVerifier::builder(Arc::new(roots))
                .build()
                .map_err(|e| NetError::Tls(format!("Invalid client-auth roots: {}", e)))?;
            builder.with_client_cert_verifier(verifier)
        };

        let config = builder
            .with_single_cert(
                self.identity.cert_chain().to_vec(),
                self.identity.private_key().clone_key(),
            )
            .map_err(|e| NetError::Tls(format!("Invalid server certificate: {}", e)))?;

        Ok(Arc::new(config))
    }
}

/// A certificate verifier that accepts everything, used when
/// `danger_accept_invalid_certs` is enabled.
#[derive(Debug)]
struct DangerousVerifier;

impl rustls::client::danger::ServerCertVerifier for DangerousVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Install the ring crypto provider for tests.
    fn install_crypto_provider() {
        let _ = rustls::crypto::ring::default_provider().install_default();
    }

    const TEST_CA_PEM: &str = r#"-----BEGIN CERTIFICATE-----
MIIBkTCB+wIJAKHBfpegE3jEMA0GCSqGSIb3DQEBCwUAMBExDzANBgNVBAMMBnRl
c3RjYTAeFw0yMzAxMDEwMDAwMDBaFw0yNDAxMDEwMDAwMDBaMBExDzANBgNVBAMM
BnRlc3RjYTBcMA0GCSqGSIb3DQEBAQUAA0sAMEgCQQC7o96HtiK7onnPevKSE2LL
oSXwnmfYwZPV2bvfGS18lK8F+DL+42IjT3ucMXnLBhzNCLNKE8yCVK6LPlsvpNlX
AgMBAAGjUzBRMB0GA1UdDgQWBBQgHGHqPcVi1N4CG7IxDJaFMvP6XTAfBgNVHSME
GDAWgBQgHGHqPcVi1N4CG7IxDJaFMvP6XTAPBgNVHRMBAf8EBTADAQH/MA0GCSqG
SIb3DQEBCwUAA0EAGLJHfg9dS/T39L6VQLJeZcpH7mY8vKaM9dM/Zn3HMhfc0Yjv
3hxMPmPGjjpQ9JKaLI0Rq7n5oEUP+xluoAAfrQ==
-----END CERTIFICATE-----"#;

    #[test]
    fn tls_version_default() {
        assert_eq!(TlsVersion::default(), TlsVersion::Tls1_2);
    }

    #[test]
    fn tls_version_to_rustls_versions() {
        assert_eq!(TlsVersion::Tls1_2.to_rustls_versions().len(), 2);
        assert_eq!(TlsVersion::Tls1_3.to_rustls_versions().len(), 1);
    }

    #[test]
    fn certificate_from_pem() {
        let cert = Certificate::from_pem(TEST_CA_PEM).unwrap();
        assert_eq!(cert.der_certs().len(), 1);
    }

    #[test]
    fn certificate_from_der() {
        let der = vec![0x30, 0x03, 0x02, 0x01, 0x00];
        let cert = Certificate::from_der(der);
        assert_eq!(cert.der_certs().len(), 1);
    }

    #[test]
    fn certificate_from_empty_pem_fails() {
        assert!(Certificate::from_pem("not a certificate").is_err());
    }

    #[test]
    fn client_config_builder() {
        let cert = Certificate::from_pem(TEST_CA_PEM).unwrap();
        let config = TlsConfig::new()
            .add_root_certificate(cert)
            .min_version(TlsVersion::Tls1_3);

        assert_eq!(config.root_certificates.len(), 1);
        assert_eq!(config.min_version, TlsVersion::Tls1_3);
    }

    #[test]
    fn build_client_config_with_system_roots() {
        install_crypto_provider();
        assert!(TlsConfig::new().build_client_config().is_ok());
    }

    #[test]
    fn build_client_config_only_custom_roots_without_certs_fails() {
        install_crypto_provider();
        let config = TlsConfig::new().use_only_custom_roots();
        assert!(config.build_client_config().is_err());
    }

    #[test]
    fn build_dangerous_client_config() {
        install_crypto_provider();
        let config = TlsConfig::new().danger_accept_invalid_certs();
        assert!(config.build_client_config().is_ok());
    }
}
