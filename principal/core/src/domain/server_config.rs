// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Principal Server Configuration
//
// The configuration is assembled once, before the server is constructed, by
// applying a sequence of option functions to the defaults. The first failing
// option aborts the build and its error is returned unchanged. After
// construction the configuration is never mutated.
//
// A YAML file representation (`FileConfig`) converts into the same options so
// file, CLI and programmatic configuration share one validation path.

use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::RsaPrivateKey;
use rustls::pki_types::CertificateDer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::domain::auth::AuthMethods;

pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:8443";
pub const DEFAULT_SERVER_NAME: &str = "fleetsync-principal";
pub const DEFAULT_QUEUE_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("namespace names must not be empty")]
    EmptyNamespace,

    #[error("{0} path must not be empty")]
    EmptyPath(&'static str),

    #[error("TLS is already configured from {0}; only one TLS source may be set")]
    TlsSourceConflict(&'static str),

    #[error("invalid listen address {address:?}: {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("metrics port {0} collides with the listen port")]
    MetricsPortCollision(u16),

    #[error("queue idle timeout must be greater than zero")]
    ZeroIdleTimeout,

    #[error("server name must not be empty")]
    EmptyServerName,

    #[error("could not load signing key from {path}: {reason}")]
    SigningKey { path: PathBuf, reason: String },

    #[error("could not read configuration file {path}: {reason}")]
    File { path: PathBuf, reason: String },
}

/// Where the server certificate and key come from.
#[derive(Clone)]
pub enum TlsSource {
    /// PEM encoded certificate chain and private key on disk
    Files { cert_path: PathBuf, key_path: PathBuf },
    /// DER certificate and RSA key held in memory
    InMemory {
        certificate: CertificateDer<'static>,
        key: RsaPrivateKey,
    },
}

impl TlsSource {
    pub fn describe(&self) -> &'static str {
        match self {
            TlsSource::Files { .. } => "key pair files",
            TlsSource::InMemory { .. } => "in-memory key pair",
        }
    }
}

impl fmt::Debug for TlsSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlsSource::Files { cert_path, key_path } => f
                .debug_struct("Files")
                .field("cert_path", cert_path)
                .field("key_path", key_path)
                .finish(),
            TlsSource::InMemory { certificate, .. } => f
                .debug_struct("InMemory")
                .field("certificate_len", &certificate.len())
                .field("key", &"<redacted>")
                .finish(),
        }
    }
}

/// Main transport served by the principal. The two are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Streaming gRPC
    #[default]
    Grpc,
    /// Plain HTTP with JSON bodies
    Http,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Grpc => f.write_str("grpc"),
            TransportKind::Http => f.write_str("http"),
        }
    }
}

#[derive(Clone)]
pub struct ServerConfig {
    /// Namespaces agents may register for. Empty allows every namespace.
    pub namespaces: Vec<String>,
    /// Prometheus listener port, 0 disables metrics
    pub metrics_port: u16,
    pub tls: Option<TlsSource>,
    /// Serve without TLS when no TLS source is configured
    pub insecure_plaintext: bool,
    pub transport: TransportKind,
    pub listen_address: SocketAddr,
    /// Time in-flight requests get to finish on shutdown, zero closes immediately
    pub grace_period: Duration,
    /// How long a client's queue pair survives without any connection
    pub queue_idle_timeout: Duration,
    pub server_name: String,
    /// Token signing key, generated at construction when absent
    pub signing_key: Option<RsaPrivateKey>,
    pub auth_methods: AuthMethods,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            namespaces: Vec::new(),
            metrics_port: 0,
            tls: None,
            insecure_plaintext: false,
            transport: TransportKind::default(),
            listen_address: SocketAddr::from(([0, 0, 0, 0], 8443)),
            grace_period: Duration::ZERO,
            queue_idle_timeout: DEFAULT_QUEUE_IDLE_TIMEOUT,
            server_name: DEFAULT_SERVER_NAME.to_string(),
            signing_key: None,
            auth_methods: AuthMethods::new(),
        }
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("namespaces", &self.namespaces)
            .field("metrics_port", &self.metrics_port)
            .field("tls", &self.tls)
            .field("insecure_plaintext", &self.insecure_plaintext)
            .field("transport", &self.transport)
            .field("listen_address", &self.listen_address)
            .field("grace_period", &self.grace_period)
            .field("queue_idle_timeout", &self.queue_idle_timeout)
            .field("server_name", &self.server_name)
            .field("signing_key", &self.signing_key.as_ref().map(|_| "<redacted>"))
            .field("auth_methods", &self.auth_methods)
            .finish()
    }
}

/// A single configuration mutator. Applied in order by [`ServerConfig::build`].
pub type ServerOption = Box<dyn FnOnce(&mut ServerConfig) -> Result<(), ConfigError> + Send>;

impl ServerConfig {
    /// Apply `options` to the defaults, stopping at the first error.
    pub fn build<I>(options: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = ServerOption>,
    {
        let mut config = Self::default();
        for option in options {
            option(&mut config)?;
        }
        if config.metrics_port != 0 && config.metrics_port == config.listen_address.port() {
            return Err(ConfigError::MetricsPortCollision(config.metrics_port));
        }
        Ok(config)
    }

    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    pub fn namespace_allowed(&self, namespace: &str) -> bool {
        namespace_allowed(&self.namespaces, namespace)
    }
}

/// Allow-list check shared by registration and the informer. An empty list
/// allows every namespace.
pub fn namespace_allowed(allowed: &[String], namespace: &str) -> bool {
    allowed.is_empty() || allowed.iter().any(|n| n == namespace)
}

fn set_tls(config: &mut ServerConfig, source: TlsSource) -> Result<(), ConfigError> {
    if let Some(existing) = &config.tls {
        return Err(ConfigError::TlsSourceConflict(existing.describe()));
    }
    config.tls = Some(source);
    Ok(())
}

pub fn with_namespaces<I, S>(namespaces: I) -> ServerOption
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let namespaces: Vec<String> = namespaces.into_iter().map(Into::into).collect();
    Box::new(move |config| {
        if namespaces.iter().any(|n| n.trim().is_empty()) {
            return Err(ConfigError::EmptyNamespace);
        }
        config.namespaces = namespaces;
        Ok(())
    })
}

pub fn with_metrics_port(port: u16) -> ServerOption {
    Box::new(move |config| {
        config.metrics_port = port;
        Ok(())
    })
}

pub fn with_tls_key_pair_from_path(
    cert_path: impl Into<PathBuf>,
    key_path: impl Into<PathBuf>,
) -> ServerOption {
    let cert_path = cert_path.into();
    let key_path = key_path.into();
    Box::new(move |config| {
        if cert_path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyPath("certificate"));
        }
        if key_path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyPath("private key"));
        }
        set_tls(config, TlsSource::Files { cert_path, key_path })
    })
}

pub fn with_tls_key_pair(certificate: CertificateDer<'static>, key: RsaPrivateKey) -> ServerOption {
    Box::new(move |config| set_tls(config, TlsSource::InMemory { certificate, key }))
}

pub fn with_insecure_plaintext(enabled: bool) -> ServerOption {
    Box::new(move |config| {
        config.insecure_plaintext = enabled;
        Ok(())
    })
}

pub fn with_transport(transport: TransportKind) -> ServerOption {
    Box::new(move |config| {
        config.transport = transport;
        Ok(())
    })
}

/// `true` serves gRPC, `false` plain HTTP
pub fn with_grpc(enabled: bool) -> ServerOption {
    with_transport(if enabled {
        TransportKind::Grpc
    } else {
        TransportKind::Http
    })
}

pub fn with_listen_address(address: impl Into<String>) -> ServerOption {
    let address = address.into();
    Box::new(move |config| {
        config.listen_address =
            address
                .parse()
                .map_err(|e: std::net::AddrParseError| ConfigError::InvalidListenAddress {
                    address: address.clone(),
                    reason: e.to_string(),
                })?;
        Ok(())
    })
}

pub fn with_shutdown_grace_period(period: Duration) -> ServerOption {
    Box::new(move |config| {
        config.grace_period = period;
        Ok(())
    })
}

pub fn with_queue_idle_timeout(timeout: Duration) -> ServerOption {
    Box::new(move |config| {
        if timeout.is_zero() {
            return Err(ConfigError::ZeroIdleTimeout);
        }
        config.queue_idle_timeout = timeout;
        Ok(())
    })
}

pub fn with_server_name(name: impl Into<String>) -> ServerOption {
    let name = name.into();
    Box::new(move |config| {
        if name.trim().is_empty() {
            return Err(ConfigError::EmptyServerName);
        }
        config.server_name = name;
        Ok(())
    })
}

pub fn with_signing_key(key: RsaPrivateKey) -> ServerOption {
    Box::new(move |config| {
        config.signing_key = Some(key);
        Ok(())
    })
}

/// Load a PEM encoded RSA key (PKCS#1 or PKCS#8)
pub fn with_signing_key_from_file(path: impl Into<PathBuf>) -> ServerOption {
    let path = path.into();
    Box::new(move |config| {
        config.signing_key = Some(load_signing_key(&path)?);
        Ok(())
    })
}

pub fn with_auth_methods(methods: AuthMethods) -> ServerOption {
    Box::new(move |config| {
        config.auth_methods = methods;
        Ok(())
    })
}

fn load_signing_key(path: &Path) -> Result<RsaPrivateKey, ConfigError> {
    let pem = std::fs::read_to_string(path).map_err(|e| ConfigError::SigningKey {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    RsaPrivateKey::from_pkcs1_pem(&pem)
        .or_else(|_| RsaPrivateKey::from_pkcs8_pem(&pem))
        .map_err(|e| ConfigError::SigningKey {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

/// TLS file locations as written in the configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileTlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// YAML representation of the principal configuration
///
/// ```yaml
/// namespaces: [team-a, team-b]
/// listenAddress: 0.0.0.0:8443
/// metricsPort: 9090
/// transport: grpc
/// gracePeriod: 30s
/// queueIdleTimeout: 5m
/// tls:
///   certPath: /etc/fleetsync/tls.crt
///   keyPath: /etc/fleetsync/tls.key
/// signingKeyPath: /etc/fleetsync/jwt.key
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileConfig {
    #[serde(default)]
    pub namespaces: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen_address: Option<String>,

    #[serde(default)]
    pub metrics_port: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<TransportKind>,

    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub grace_period: Option<Duration>,

    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub queue_idle_timeout: Option<Duration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<FileTlsConfig>,

    #[serde(default)]
    pub insecure_plaintext: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_key_path: Option<PathBuf>,
}

impl FileConfig {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::File {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_yaml::from_str(&content).map_err(|e| ConfigError::File {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Convert into options; fields left unset keep the defaults.
    pub fn into_options(self) -> Vec<ServerOption> {
        let mut options = vec![
            with_namespaces(self.namespaces),
            with_metrics_port(self.metrics_port),
            with_insecure_plaintext(self.insecure_plaintext),
        ];
        if let Some(address) = self.listen_address {
            options.push(with_listen_address(address));
        }
        if let Some(transport) = self.transport {
            options.push(with_transport(transport));
        }
        if let Some(period) = self.grace_period {
            options.push(with_shutdown_grace_period(period));
        }
        if let Some(timeout) = self.queue_idle_timeout {
            options.push(with_queue_idle_timeout(timeout));
        }
        if let Some(name) = self.server_name {
            options.push(with_server_name(name));
        }
        if let Some(tls) = self.tls {
            options.push(with_tls_key_pair_from_path(tls.cert_path, tls.key_path));
        }
        if let Some(path) = self.signing_key_path {
            options.push(with_signing_key_from_file(path));
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::build(Vec::new()).unwrap();
        assert_eq!(config.transport, TransportKind::Grpc);
        assert_eq!(config.listen_address.to_string(), DEFAULT_LISTEN_ADDRESS);
        assert_eq!(config.grace_period, Duration::ZERO);
        assert_eq!(config.queue_idle_timeout, DEFAULT_QUEUE_IDLE_TIMEOUT);
        assert_eq!(config.server_name, DEFAULT_SERVER_NAME);
        assert!(config.tls.is_none());
        assert!(config.signing_key.is_none());
        assert!(!config.metrics_enabled());
    }

    #[test]
    fn test_options_apply_in_order() {
        let config = ServerConfig::build(vec![
            with_grpc(false),
            with_shutdown_grace_period(Duration::from_secs(5)),
            with_grpc(true),
        ])
        .unwrap();
        assert_eq!(config.transport, TransportKind::Grpc);
        assert_eq!(config.grace_period, Duration::from_secs(5));
    }

    #[test]
    fn test_first_failing_option_aborts() {
        let err = ServerConfig::build(vec![
            with_server_name(""),
            with_listen_address("not an address"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyServerName));
    }

    #[test]
    fn test_invalid_listen_address() {
        let err = ServerConfig::build(vec![with_listen_address("localhost")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidListenAddress { .. }));
    }

    #[test]
    fn test_second_tls_source_is_rejected() {
        let err = ServerConfig::build(vec![
            with_tls_key_pair_from_path("/tls/cert.pem", "/tls/key.pem"),
            with_tls_key_pair_from_path("/other/cert.pem", "/other/key.pem"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::TlsSourceConflict("key pair files")));
    }

    #[test]
    fn test_empty_tls_paths_are_rejected() {
        let err = ServerConfig::build(vec![with_tls_key_pair_from_path("", "/tls/key.pem")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyPath("certificate")));
    }

    #[test]
    fn test_metrics_port_must_differ_from_listen_port() {
        let err = ServerConfig::build(vec![
            with_listen_address("127.0.0.1:9000"),
            with_metrics_port(9000),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::MetricsPortCollision(9000)));
    }

    #[test]
    fn test_namespace_allow_list() {
        let open = ServerConfig::build(Vec::new()).unwrap();
        assert!(open.namespace_allowed("anything"));

        let restricted = ServerConfig::build(vec![with_namespaces(["team-a"])]).unwrap();
        assert!(restricted.namespace_allowed("team-a"));
        assert!(!restricted.namespace_allowed("team-b"));
        assert!(namespace_allowed(&[], "team-b"));
        assert!(!namespace_allowed(&["team-a".to_string()], "team-b"));

        assert!(matches!(
            ServerConfig::build(vec![with_namespaces(["team-a", " "])]),
            Err(ConfigError::EmptyNamespace)
        ));
    }

    #[test]
    fn test_missing_signing_key_file() {
        let err = ServerConfig::build(vec![with_signing_key_from_file("/nonexistent/jwt.key")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::SigningKey { .. }));
    }

    #[test]
    fn test_file_config_round_trip_into_options() {
        let yaml = r#"
namespaces: [team-a, team-b]
listenAddress: 127.0.0.1:7443
metricsPort: 9090
transport: http
gracePeriod: 30s
queueIdleTimeout: 2m
serverName: principal-east
insecurePlaintext: true
"#;
        let file = FileConfig::from_yaml_str(yaml).unwrap();
        let config = ServerConfig::build(file.into_options()).unwrap();

        assert_eq!(config.namespaces, vec!["team-a", "team-b"]);
        assert_eq!(config.listen_address.port(), 7443);
        assert_eq!(config.metrics_port, 9090);
        assert_eq!(config.transport, TransportKind::Http);
        assert_eq!(config.grace_period, Duration::from_secs(30));
        assert_eq!(config.queue_idle_timeout, Duration::from_secs(120));
        assert_eq!(config.server_name, "principal-east");
        assert!(config.insecure_plaintext);
    }

    #[test]
    fn test_empty_file_config_keeps_defaults() {
        let file = FileConfig::from_yaml_str("{}").unwrap();
        let config = ServerConfig::build(file.into_options()).unwrap();
        assert_eq!(config.listen_address.to_string(), DEFAULT_LISTEN_ADDRESS);
        assert_eq!(config.transport, TransportKind::Grpc);
    }

    #[test]
    fn test_zero_idle_timeout_is_rejected() {
        assert!(matches!(
            ServerConfig::build(vec![with_queue_idle_timeout(Duration::ZERO)]),
            Err(ConfigError::ZeroIdleTimeout)
        ));
    }
}
