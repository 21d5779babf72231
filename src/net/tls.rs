//! TLS identities and rustls configuration.
//!
//! The server identity comes from a [`CertificateProvider`]: either a freshly
//! generated self-signed certificate or PEM files from disk. Neither side
//! verifies its peer; the client accepts any server certificate.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, KeyPair,
    KeyUsagePurpose,
};
use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, ServerConfig, SignatureScheme};
use thiserror::Error;

/// How long a generated certificate stays valid.
pub const SELF_SIGNED_VALIDITY_DAYS: i64 = 365;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("certificate generation failed: {0}")]
    Generate(#[from] rcgen::Error),

    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificates found in {0:?}")]
    NoCertificates(PathBuf),

    #[error("no private key found in {0:?}")]
    NoPrivateKey(PathBuf),

    #[error(transparent)]
    Rustls(#[from] rustls::Error),
}

/// Certificate chain and private key for the listener.
#[derive(Debug)]
pub struct Identity {
    pub cert_chain: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

/// Source of the server's TLS identity.
pub trait CertificateProvider {
    fn generate(&self) -> Result<Identity, TlsError>;
}

/// Generates a throwaway certificate for `localhost` / `127.0.0.1`.
#[derive(Debug, Clone, Default)]
pub struct SelfSignedProvider;

impl CertificateProvider for SelfSignedProvider {
    fn generate(&self) -> Result<Identity, TlsError> {
        let mut params =
            CertificateParams::new(vec!["localhost".to_string(), "127.0.0.1".to_string()])?;

        let mut name = DistinguishedName::new();
        name.push(DnType::CommonName, "localhost");
        name.push(DnType::OrganizationName, "Test");
        params.distinguished_name = name;

        let now = time::OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + time::Duration::days(SELF_SIGNED_VALIDITY_DAYS);
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

        let key_pair = KeyPair::generate()?;
        let cert = params.self_signed(&key_pair)?;

        tracing::debug!(
            valid_days = SELF_SIGNED_VALIDITY_DAYS,
            "Generated self-signed certificate"
        );

        Ok(Identity {
            cert_chain: vec![cert.der().clone()],
            key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der())),
        })
    }
}

/// Loads the identity from PEM-encoded certificate and key files.
#[derive(Debug, Clone)]
pub struct PemFileProvider {
    cert_path: PathBuf,
    key_path: PathBuf,
}

impl PemFileProvider {
    pub fn new(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
        }
    }
}

impl CertificateProvider for PemFileProvider {
    fn generate(&self) -> Result<Identity, TlsError> {
        let cert_chain = rustls_pemfile::certs(&mut open(&self.cert_path)?)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| TlsError::Io {
                path: self.cert_path.clone(),
                source,
            })?;
        if cert_chain.is_empty() {
            return Err(TlsError::NoCertificates(self.cert_path.clone()));
        }

        let key = rustls_pemfile::private_key(&mut open(&self.key_path)?)
            .map_err(|source| TlsError::Io {
                path: self.key_path.clone(),
                source,
            })?
            .ok_or_else(|| TlsError::NoPrivateKey(self.key_path.clone()))?;

        Ok(Identity { cert_chain, key })
    }
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path).map(BufReader::new).map_err(|source| TlsError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(ring::default_provider())
}

/// Listener-side rustls config. Clients are not asked for certificates.
pub fn server_config(identity: Identity) -> Result<ServerConfig, TlsError> {
    let config = ServerConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(identity.cert_chain, identity.key)?;
    Ok(config)
}

/// Client-side rustls config that accepts any server certificate.
///
/// The upstream is typically a self-signed endpoint; peer identity is not checked.
pub fn insecure_client_config() -> Result<ClientConfig, TlsError> {
    let provider = crypto_provider();
    let config = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoCertVerifier { provider }))
        .with_no_client_auth();
    Ok(config)
}

// Dangerous: certificate verifier that accepts any certificate
#[derive(Debug)]
struct NoCertVerifier {
    provider: Arc<CryptoProvider>,
}

impl rustls::client::danger::ServerCertVerifier for NoCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
