// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! TLS provisioning
//!
//! Builds the transport TLS configuration from one of the two sources a
//! [`TlsSource`] can describe. In-memory material is first encoded to PEM
//! (`CERTIFICATE` and PKCS#1 `RSA PRIVATE KEY`) so both sources go through the
//! same parser.
//!
//! Expired certificates are only logged; rejecting them is left to the peers
//! during the handshake.

use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tonic::transport::{Identity, ServerTlsConfig};
use tracing::{debug, warn};
use x509_parser::prelude::{FromDer, X509Certificate};
use zeroize::Zeroizing;

use crate::domain::server_config::TlsSource;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("TLS not configured")]
    NotConfigured,

    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    #[error("no certificate found in PEM data")]
    NoCertificate,

    #[error("invalid private key: {0}")]
    InvalidKey(String),

    #[error("TLS configuration error: {0}")]
    Config(String),
}

/// A loaded certificate chain and key, ready for either transport.
pub struct TlsConfig {
    chain: Vec<CertificateDer<'static>>,
    cert_pem: String,
    key_pem: Zeroizing<String>,
    server_config: Arc<rustls::ServerConfig>,
}

impl TlsConfig {
    /// Leaf certificate of the chain
    pub fn certificate(&self) -> &CertificateDer<'static> {
        &self.chain[0]
    }

    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }

    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    /// rustls configuration used by the HTTP transport
    pub fn rustls_config(&self) -> Arc<rustls::ServerConfig> {
        self.server_config.clone()
    }

    /// tonic configuration used by the gRPC transport
    pub fn tonic_config(&self) -> ServerTlsConfig {
        ServerTlsConfig::new().identity(Identity::from_pem(&self.cert_pem, self.key_pem.as_str()))
    }
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("chain_len", &self.chain.len())
            .finish_non_exhaustive()
    }
}

pub fn load_tls_config(source: Option<&TlsSource>) -> Result<TlsConfig, TlsError> {
    match source {
        None => Err(TlsError::NotConfigured),
        Some(TlsSource::Files { cert_path, key_path }) => {
            let cert_pem = read_pem(cert_path)?;
            let key_pem = Zeroizing::new(read_pem(key_path)?);
            debug!(cert = %cert_path.display(), key = %key_path.display(), "Loading TLS key pair");
            build(cert_pem, key_pem)
        }
        Some(TlsSource::InMemory { certificate, key }) => {
            let cert_pem = pem::encode(&pem::Pem::new("CERTIFICATE", certificate.to_vec()));
            let key_pem = key
                .to_pkcs1_pem(LineEnding::LF)
                .map_err(|e| TlsError::InvalidKey(e.to_string()))?;
            build(cert_pem, key_pem)
        }
    }
}

fn read_pem(path: &Path) -> Result<String, TlsError> {
    std::fs::read_to_string(path).map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn build(cert_pem: String, key_pem: Zeroizing<String>) -> Result<TlsConfig, TlsError> {
    let chain = rustls_pemfile::certs(&mut cert_pem.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::InvalidCertificate(e.to_string()))?;
    if chain.is_empty() {
        return Err(TlsError::NoCertificate);
    }
    warn_on_expired(&chain)?;

    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut key_pem.as_bytes())
        .map_err(|e| TlsError::InvalidKey(e.to_string()))?
        .ok_or_else(|| TlsError::InvalidKey("no private key found in PEM data".to_string()))?;

    let mut server_config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| TlsError::Config(e.to_string()))?
    .with_no_client_auth()
    .with_single_cert(chain.clone(), key)
    .map_err(|e| TlsError::InvalidKey(e.to_string()))?;
    server_config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(TlsConfig {
        chain,
        cert_pem,
        key_pem,
        server_config: Arc::new(server_config),
    })
}

fn warn_on_expired(chain: &[CertificateDer<'static>]) -> Result<(), TlsError> {
    let now = chrono::Utc::now().timestamp();
    for (index, der) in chain.iter().enumerate() {
        let (_, cert) = X509Certificate::from_der(der.as_ref())
            .map_err(|e| TlsError::InvalidCertificate(e.to_string()))?;
        let not_after = cert.validity().not_after.timestamp();
        if not_after < now {
            warn!(
                index,
                subject = %cert.subject(),
                not_after = %cert.validity().not_after,
                "Certificate in chain has expired"
            );
        }
    }
    Ok(())
}
