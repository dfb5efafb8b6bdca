// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command line flags and their translation into server options.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use fleetsync_core::domain::auth::AuthMethods;
use fleetsync_core::domain::resource::Application;
use fleetsync_core::domain::server_config::*;
use fleetsync_core::infrastructure::auth::{userpass, UserPassAuth};
use fleetsync_core::infrastructure::memory_backend::InMemoryStateBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Transport {
    Grpc,
    Http,
}

impl From<Transport> for TransportKind {
    fn from(transport: Transport) -> Self {
        match transport {
            Transport::Grpc => TransportKind::Grpc,
            Transport::Http => TransportKind::Http,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// FleetSync principal - coordinates application state with remote agents
#[derive(Debug, Parser)]
#[command(name = "fleetsync-principal")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, env = "FLEETSYNC_CONFIG_PATH", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Namespace the principal itself runs in
    #[arg(long, env = "FLEETSYNC_NAMESPACE", default_value = "fleetsync")]
    pub namespace: String,

    /// Namespaces agents may register for (comma separated, empty allows all)
    #[arg(long, env = "FLEETSYNC_ALLOWED_NAMESPACES", value_delimiter = ',')]
    pub allowed_namespaces: Vec<String>,

    /// Address of the agent-facing listener
    #[arg(long, env = "FLEETSYNC_LISTEN_ADDRESS")]
    pub listen_address: Option<String>,

    /// Prometheus metrics port (0 disables the listener)
    #[arg(long, env = "FLEETSYNC_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Agent-facing transport
    #[arg(long, env = "FLEETSYNC_TRANSPORT", value_enum)]
    pub transport: Option<Transport>,

    /// PEM certificate chain for the listener
    #[arg(long, env = "FLEETSYNC_TLS_CERT", requires = "tls_key")]
    pub tls_cert: Option<PathBuf>,

    /// PEM private key for the listener
    #[arg(long, env = "FLEETSYNC_TLS_KEY", requires = "tls_cert")]
    pub tls_key: Option<PathBuf>,

    /// Serve without TLS when no key pair is configured
    #[arg(long, env = "FLEETSYNC_INSECURE_PLAINTEXT")]
    pub insecure_plaintext: bool,

    /// How long in-flight calls may take to finish on shutdown, e.g. `30s`
    #[arg(long, env = "FLEETSYNC_GRACE_PERIOD", value_parser = humantime_serde::re::humantime::parse_duration)]
    pub grace_period: Option<Duration>,

    /// How long a disconnected agent's queues are kept, e.g. `5m`
    #[arg(long, env = "FLEETSYNC_QUEUE_IDLE_TIMEOUT", value_parser = humantime_serde::re::humantime::parse_duration)]
    pub queue_idle_timeout: Option<Duration>,

    /// Name the principal reports in its version and token issuer
    #[arg(long, env = "FLEETSYNC_SERVER_NAME")]
    pub server_name: Option<String>,

    /// RSA private key (PEM) used to sign agent tokens
    #[arg(long, env = "FLEETSYNC_SIGNING_KEY")]
    pub signing_key: Option<PathBuf>,

    /// `username:salthex:sha256hex` credential file enabling the userpass method
    #[arg(long, env = "FLEETSYNC_USERPASS_FILE")]
    pub userpass_file: Option<PathBuf>,

    /// YAML list of applications the in-memory state starts with
    #[arg(long, env = "FLEETSYNC_APPLICATIONS_FILE")]
    pub applications_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "FLEETSYNC_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, env = "FLEETSYNC_LOG_FORMAT", value_enum, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,
}

/// Load the configuration file, let flags replace its fields and convert the
/// result into server options.
pub fn server_options(cli: &Cli) -> Result<Vec<ServerOption>> {
    let mut file = match &cli.config {
        Some(path) => FileConfig::from_yaml_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => FileConfig::default(),
    };
    apply_flags(&mut file, cli);

    let mut options = file.into_options();
    if let Some(path) = &cli.userpass_file {
        options.push(with_auth_methods(auth_methods(path)?));
    }
    Ok(options)
}

fn apply_flags(file: &mut FileConfig, cli: &Cli) {
    if !cli.allowed_namespaces.is_empty() {
        file.namespaces = cli.allowed_namespaces.clone();
    }
    if let Some(address) = &cli.listen_address {
        file.listen_address = Some(address.clone());
    }
    if let Some(port) = cli.metrics_port {
        file.metrics_port = port;
    }
    if let Some(transport) = cli.transport {
        file.transport = Some(transport.into());
    }
    if let (Some(cert), Some(key)) = (&cli.tls_cert, &cli.tls_key) {
        file.tls = Some(FileTlsConfig {
            cert_path: cert.clone(),
            key_path: key.clone(),
        });
    }
    if cli.insecure_plaintext {
        file.insecure_plaintext = true;
    }
    if let Some(period) = cli.grace_period {
        file.grace_period = Some(period);
    }
    if let Some(timeout) = cli.queue_idle_timeout {
        file.queue_idle_timeout = Some(timeout);
    }
    if let Some(name) = &cli.server_name {
        file.server_name = Some(name.clone());
    }
    if let Some(path) = &cli.signing_key {
        file.signing_key_path = Some(path.clone());
    }
}

fn auth_methods(userpass_file: &Path) -> Result<AuthMethods> {
    let users = UserPassAuth::from_file(userpass_file)
        .with_context(|| format!("Failed to load credentials from {}", userpass_file.display()))?;
    let mut methods = AuthMethods::new();
    methods
        .register(userpass::METHOD_NAME, Arc::new(users))
        .context("Failed to register authentication method")?;
    Ok(methods)
}

pub fn load_backend(applications_file: Option<&Path>) -> Result<InMemoryStateBackend> {
    let Some(path) = applications_file else {
        return Ok(InMemoryStateBackend::new());
    };
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let applications: Vec<Application> = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse applications in {}", path.display()))?;
    Ok(InMemoryStateBackend::with_applications(applications))
}
