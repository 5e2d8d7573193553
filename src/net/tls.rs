//! TLS trust context and trust material loading.
//!
//! A [`TrustContext`] pairs the rustls client configuration used to open
//! secure connections with the verifier that validates peer chains. It is
//! built once from configured PEM material and never mutated; a new
//! security policy means building a new context and swapping it in.

use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use rustls::client::danger::ServerCertVerifier;
use rustls::client::{VerifierBuilderError, WebPkiServerVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};
use std::fmt;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::SecurityConfig;

/// Problems with trust or identity material.
#[derive(Debug, thiserror::Error)]
pub enum TlsMaterialError {
    #[error("file not found: {0:?}")]
    NotFound(PathBuf),
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed PEM in {source_name}: {source}")]
    Pem {
        source_name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no certificates found in {0}")]
    NoCertificates(String),
    #[error("no private key found in {0}")]
    NoPrivateKey(String),
    #[error("rejected by rustls: {0}")]
    Rustls(#[from] rustls::Error),
    #[error("cannot build certificate verifier: {0}")]
    Verifier(#[from] VerifierBuilderError),
}

/// A client certificate chain and its private key, for mutual TLS.
pub struct ClientIdentity {
    pub chain: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

/// Parse every certificate in a PEM bundle.
pub fn load_certificates(
    pem: &[u8],
    source_name: &str,
) -> Result<Vec<CertificateDer<'static>>, TlsMaterialError> {
    let mut reader = BufReader::new(pem);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsMaterialError::Pem {
            source_name: source_name.to_string(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsMaterialError::NoCertificates(source_name.to_string()));
    }
    Ok(certs)
}

/// Parse the first private key (PKCS#1, PKCS#8 or SEC1) in a PEM file.
pub fn load_private_key(
    pem: &[u8],
    source_name: &str,
) -> Result<PrivateKeyDer<'static>, TlsMaterialError> {
    let mut reader = BufReader::new(pem);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| TlsMaterialError::Pem {
            source_name: source_name.to_string(),
            source,
        })?
        .ok_or_else(|| TlsMaterialError::NoPrivateKey(source_name.to_string()))
}

fn read_pem(path: &Path) -> Result<Vec<u8>, TlsMaterialError> {
    if !path.exists() {
        return Err(TlsMaterialError::NotFound(path.to_path_buf()));
    }
    std::fs::read(path).map_err(|source| TlsMaterialError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Immutable TLS connector configuration plus server verifier.
#[derive(Clone)]
pub struct TrustContext {
    config: Arc<ClientConfig>,
    verifier: Arc<WebPkiServerVerifier>,
}

impl TrustContext {
    /// Build from explicit roots and an optional client identity.
    pub fn new(
        roots: RootCertStore,
        identity: Option<ClientIdentity>,
    ) -> Result<Self, TlsMaterialError> {
        let provider: Arc<CryptoProvider> = Arc::new(rustls::crypto::ring::default_provider());
        let verifier =
            WebPkiServerVerifier::builder_with_provider(Arc::new(roots), Arc::clone(&provider))
                .build()?;

        let builder = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .with_webpki_verifier(Arc::clone(&verifier));
        let config = match identity {
            Some(identity) => builder.with_client_auth_cert(identity.chain, identity.key)?,
            None => builder.with_no_client_auth(),
        };

        Ok(Self {
            config: Arc::new(config),
            verifier,
        })
    }

    /// Trust the bundled Mozilla web roots.
    pub fn with_web_roots() -> Result<Self, TlsMaterialError> {
        let roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        Self::new(roots, None)
    }

    /// Trust exactly the certificates in a PEM bundle.
    pub fn from_ca_pem(pem: &[u8]) -> Result<Self, TlsMaterialError> {
        Self::new(roots_from_pem(pem, "CA bundle")?, None)
    }

    /// Build from configured files.
    pub fn from_security_config(config: &SecurityConfig) -> Result<Self, TlsMaterialError> {
        let roots = match &config.ca_file {
            Some(path) => roots_from_pem(&read_pem(path)?, &path.display().to_string())?,
            None => RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
        };

        let identity = match (&config.cert_file, &config.key_file) {
            (Some(cert_path), Some(key_path)) => Some(ClientIdentity {
                chain: load_certificates(&read_pem(cert_path)?, &cert_path.display().to_string())?,
                key: load_private_key(&read_pem(key_path)?, &key_path.display().to_string())?,
            }),
            _ => None,
        };

        let context = Self::new(roots, identity)?;
        tracing::debug!(
            ca_file = ?config.ca_file,
            mutual_tls = config.cert_file.is_some(),
            "Trust context built"
        );
        Ok(context)
    }

    /// Client configuration every secure connection is opened with.
    pub fn client_config(&self) -> Arc<ClientConfig> {
        Arc::clone(&self.config)
    }

    /// Verifier that validates server certificate chains.
    pub fn verifier(&self) -> Arc<dyn ServerCertVerifier> {
        self.verifier.clone()
    }

    /// Wrap a TCP connector so `https` candidates are secured with this
    /// context. `http` candidates pass through unchanged.
    pub fn https_connector(&self, http: HttpConnector) -> HttpsConnector<HttpConnector> {
        HttpsConnectorBuilder::new()
            .with_tls_config(self.config.as_ref().clone())
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .wrap_connector(http)
    }
}

impl fmt::Debug for TrustContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustContext")
            .field("client_auth", &self.config.client_auth_cert_resolver.has_certs())
            .finish()
    }
}

fn roots_from_pem(pem: &[u8], source_name: &str) -> Result<RootCertStore, TlsMaterialError> {
    let mut roots = RootCertStore::empty();
    for cert in load_certificates(pem, source_name)? {
        roots.add(cert)?;
    }
    Ok(roots)
}
