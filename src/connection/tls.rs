//! TLS configuration and support for secure connections to MongoDB.
//!
//! Certificates arrive as PEM text (not file paths) because the producer is
//! configured through a key/value map. The resulting configuration is used by
//! [`DialStrategy::Tls`](super::DialStrategy) to upgrade each TCP connection
//! immediately after it is opened.

use crate::client::parse_bool;
use crate::{Error, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::server::ParsedCertificate;
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pemfile::Item;
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use std::io::Cursor;
use std::sync::Arc;

/// TLS configuration for secure MongoDB connections.
///
/// By default, server certificates are validated against system root
/// certificates.
///
/// # Examples
///
/// ```ignore
/// use mongo_producer::connection::TlsConfig;
///
/// // With system root certificates (production)
/// let tls = TlsConfig::builder().build()?;
///
/// // With a custom CA and a client certificate
/// let tls = TlsConfig::builder()
///     .ca_pem(ca)
///     .client_cert_pem(cert, key)
///     .build()?;
/// ```
#[derive(Clone)]
pub struct TlsConfig {
    /// Whether a custom CA bundle replaced the system roots
    custom_ca: bool,
    /// Whether a client certificate is presented
    client_auth: bool,
    /// Whether server certificate verification is disabled
    danger_accept_invalid_certs: bool,
    /// Compiled rustls ClientConfig
    client_config: Arc<ClientConfig>,
}

impl TlsConfig {
    /// Create a new TLS configuration builder.
    pub fn builder() -> TlsConfigBuilder {
        TlsConfigBuilder::default()
    }

    /// Build a configuration from the producer's string-typed TLS settings.
    ///
    /// Empty strings mean "not provided". The client certificate is only
    /// loaded when both `cert` and `key` are present. `skip_verify` is a
    /// string-encoded boolean defaulting to false.
    pub fn from_pem(cert: &str, key: &str, ca: &str, skip_verify: &str) -> Result<Self> {
        let skip = if skip_verify.is_empty() {
            false
        } else {
            parse_bool(skip_verify)
                .ok_or_else(|| Error::Parse(format!("bad value for tls verify: {}", skip_verify)))?
        };

        let mut builder = TlsConfig::builder().danger_accept_invalid_certs(skip);
        if !ca.is_empty() {
            builder = builder.ca_pem(ca);
        }
        if !cert.is_empty() && !key.is_empty() {
            builder = builder.client_cert_pem(cert, key);
        }
        builder.build()
    }

    /// Get the rustls ClientConfig for this TLS configuration.
    pub fn client_config(&self) -> Arc<ClientConfig> {
        self.client_config.clone()
    }

    /// Check if a custom CA bundle is in use.
    pub fn has_custom_ca(&self) -> bool {
        self.custom_ca
    }

    /// Check if a client certificate is presented during the handshake.
    pub fn has_client_cert(&self) -> bool {
        self.client_auth
    }

    /// Check if invalid certificates are accepted.
    pub fn danger_accept_invalid_certs(&self) -> bool {
        self.danger_accept_invalid_certs
    }
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("custom_ca", &self.custom_ca)
            .field("client_auth", &self.client_auth)
            .field(
                "danger_accept_invalid_certs",
                &self.danger_accept_invalid_certs,
            )
            .field("client_config", &"<ClientConfig>")
            .finish()
    }
}

/// Builder for TLS configuration.
#[derive(Default)]
pub struct TlsConfigBuilder {
    ca_pem: Option<String>,
    client_cert: Option<(String, String)>,
    danger_accept_invalid_certs: bool,
}

impl TlsConfigBuilder {
    /// Trust the certificates in this PEM bundle instead of the system roots.
    pub fn ca_pem(mut self, pem: impl Into<String>) -> Self {
        self.ca_pem = Some(pem.into());
        self
    }

    /// Present this certificate chain and private key (both PEM) to the server.
    pub fn client_cert_pem(mut self, cert: impl Into<String>, key: impl Into<String>) -> Self {
        self.client_cert = Some((cert.into(), key.into()));
        self
    }

    /// ⚠️ **DANGER**: Accept invalid certificates.
    ///
    /// Disables server certificate validation entirely, making the connection
    /// vulnerable to man-in-the-middle attacks.
    pub fn danger_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.danger_accept_invalid_certs = accept;
        self
    }

    /// Build the TLS configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::Parse` if:
    /// - the CA bundle is not PEM or contains no usable certificate
    /// - the client certificate or key is malformed, or they do not match
    pub fn build(self) -> Result<TlsConfig> {
        let provider = crypto_provider();

        let root_store = match &self.ca_pem {
            Some(pem) => load_ca_pem(pem)?,
            None => load_system_roots(),
        };

        let client_auth = match &self.client_cert {
            Some((cert, key)) => Some(load_key_pair(cert, key)?),
            None => None,
        };

        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::Tls(format!("unsupported protocol versions: {}", e)))?;

        let builder = if self.danger_accept_invalid_certs {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoCertificateVerification(provider)))
        } else {
            builder.with_root_certificates(root_store)
        };

        let has_client_auth = client_auth.is_some();
        let client_config = match client_auth {
            Some((certs, key)) => builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| Error::Parse(format!("bad value for tls_cert or tls_key: {}", e)))?,
            None => builder.with_no_client_auth(),
        };

        Ok(TlsConfig {
            custom_ca: self.ca_pem.is_some(),
            client_auth: has_client_auth,
            danger_accept_invalid_certs: self.danger_accept_invalid_certs,
            client_config: Arc::new(client_config),
        })
    }
}

fn crypto_provider() -> Arc<CryptoProvider> {
    CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

/// Load the trust store from PEM text.
fn load_ca_pem(pem: &str) -> Result<RootCertStore> {
    let mut reader = Cursor::new(pem.as_bytes());
    let mut root_store = RootCertStore::empty();
    let mut found_certs = 0;

    loop {
        match rustls_pemfile::read_one(&mut reader) {
            Ok(Some(Item::X509Certificate(cert))) => {
                root_store
                    .add(cert)
                    .map_err(|e| Error::Parse(format!("failed to parse tls_ca value: {}", e)))?;
                found_certs += 1;
            }
            Ok(Some(_)) => {
                // Skip non-certificate items (private keys, etc.)
            }
            Ok(None) => break,
            Err(_) => return Err(Error::Parse("failed to parse tls_ca value".into())),
        }
    }

    if found_certs == 0 {
        return Err(Error::Parse(
            "failed to parse tls_ca value: no certificates found".into(),
        ));
    }

    Ok(root_store)
}

/// System roots, falling back to the bundled Mozilla roots when none load.
fn load_system_roots() -> RootCertStore {
    let result = rustls_native_certs::load_native_certs();

    let mut store = RootCertStore::empty();
    let (added, _ignored) = store.add_parsable_certificates(result.certs);

    if added == 0 {
        tracing::debug!(
            errors = result.errors.len(),
            "no system root certificates loaded, using bundled roots"
        );
        store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    store
}

/// Load the client certificate chain and key, and check the leaf parses.
fn load_key_pair(
    cert_pem: &str,
    key_pem: &str,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let certs = rustls_pemfile::certs(&mut Cursor::new(cert_pem.as_bytes()))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| Error::Parse("bad value for tls_cert or tls_key".into()))?;

    let leaf = certs
        .first()
        .ok_or_else(|| Error::Parse("bad value for tls_cert: no certificate found".into()))?;

    ParsedCertificate::try_from(leaf)
        .map_err(|_| Error::Parse("failed to parse tls_cert or tls_key".into()))?;

    let key = rustls_pemfile::private_key(&mut Cursor::new(key_pem.as_bytes()))
        .map_err(|_| Error::Parse("bad value for tls_cert or tls_key".into()))?
        .ok_or_else(|| Error::Parse("bad value for tls_key: no private key found".into()))?;

    Ok((certs, key))
}

/// Server name for TLS SNI and certificate verification.
///
/// Accepts DNS names and IP literals; a trailing dot is ignored.
pub fn server_name(host: &str) -> Result<ServerName<'static>> {
    let host = host.trim_end_matches('.');
    if host.is_empty() {
        return Err(Error::Tls("empty hostname for TLS".into()));
    }
    ServerName::try_from(host.to_string())
        .map_err(|_| Error::Tls(format!("invalid hostname for TLS: '{}'", host)))
}

/// Verifier used when `tls_verify` asks to skip certificate checks.
///
/// Handshake signatures are still checked so the session keys are bound to
/// the presented certificate.
#[derive(Debug)]
struct NoCertificateVerification(Arc<CryptoProvider>);

impl ServerCertVerifier for NoCertificateVerification {
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
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
