// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Coordination Server
//!
//! Owns every component of the principal and the root cancellation token they
//! all derive from.
//!
//! # Lifecycle
//!
//! ```text
//! Server::new ──► start ──► (serving) ──► shutdown
//!    │              │                        │
//!    │              ├─ transport (gRPC|HTTP) ├─ cancel root token
//!    │              ├─ metrics listener      └─ transport teardown
//!    │              ├─ event processor           (grace period)
//!    │              └─ informer, wait ≤ 1s for sync
//!    └─ options, signing key, issuer, registry seed, informer wiring
//! ```
//!
//! `start` and `shutdown` take `&mut self`: one caller at a time. Errors
//! before the background workers run are returned from `start`; later ones
//! arrive on the error channel handed to `start`.

use rand_core::OsRng;
use rsa::RsaPrivateKey;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::app_manager::ApplicationManager;
use crate::application::authentication::HandshakeService;
use crate::application::event_processor::EventProcessor;
use crate::application::sync_pipeline::SyncPipeline;
use crate::domain::agent_mode::AgentMode;
use crate::domain::auth::{AuthMethods, IssuerError, TokenIssuer};
use crate::domain::backend::StateBackend;
use crate::domain::events::EventEmitter;
use crate::domain::server_config::{ConfigError, ServerConfig, ServerOption};
use crate::infrastructure::agent_registry::AgentModeRegistry;
use crate::infrastructure::auth::AuthGate;
use crate::infrastructure::informer::{ApplicationInformer, InformerError};
use crate::infrastructure::issuer::JwtIssuer;
use crate::infrastructure::metrics::{spawn_metrics_listener, MetricsError};
use crate::infrastructure::queue::SendRecvQueues;
use crate::infrastructure::tls::{self, TlsConfig, TlsError};
use crate::presentation::transport::{ActiveTransport, TransportError};
use crate::presentation::TransportContext;

pub const NAME: &str = "fleetsync-principal";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name every token minted by the principal carries as issuer
pub const ISSUER_NAME: &str = "fleetsync-principal";

/// Client seeded into the registry at construction, usable before any agent
/// registers.
pub const BOOTSTRAP_CLIENT_ID: &str = "fleetsync";
pub const BOOTSTRAP_NAMESPACE: &str = "fleetsync";

const SIGNING_KEY_BITS: usize = 2048;
const WAIT_FOR_SYNCED: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("could not generate signing key: {0}")]
    SigningKey(String),

    #[error("could not create token issuer: {0}")]
    Issuer(#[from] IssuerError),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("application informer failed: {0}")]
    Informer(#[from] InformerError),

    #[error(transparent)]
    Metrics(#[from] MetricsError),

    #[error("server already started")]
    AlreadyStarted,

    #[error("server has been shut down")]
    Stopped,

    #[error("no server running")]
    NotRunning,
}

pub struct Server {
    config: ServerConfig,
    namespace: String,
    cancel: CancellationToken,
    issuer: Arc<dyn TokenIssuer>,
    auth: Arc<AuthGate>,
    registry: Arc<AgentModeRegistry>,
    queues: Arc<SendRecvQueues>,
    app_manager: Arc<ApplicationManager>,
    informer: Arc<ApplicationInformer>,
    handshake: Arc<HandshakeService>,
    emitter: EventEmitter,
    transport: Option<ActiveTransport>,
    volatile_signing_key: bool,
}

impl Server {
    /// Build a server from `options`, applied in order.
    ///
    /// The root token is a child of `parent`: cancelling `parent` stops the
    /// server as well. Without a configured signing key a volatile one is
    /// generated, which rules out running more than one replica.
    pub fn new(
        parent: &CancellationToken,
        backend: Arc<dyn StateBackend>,
        namespace: impl Into<String>,
        options: Vec<ServerOption>,
    ) -> Result<Self, ServerError> {
        let mut config = ServerConfig::build(options)?;
        let namespace = namespace.into();
        let cancel = parent.child_token();

        let volatile_signing_key = config.signing_key.is_none();
        let signing_key = match config.signing_key.take() {
            Some(key) => key,
            None => {
                warn!("Generating and using a volatile token signing key - multiple replicas not possible");
                RsaPrivateKey::new(&mut OsRng, SIGNING_KEY_BITS)
                    .map_err(|e| ServerError::SigningKey(e.to_string()))?
            }
        };
        let issuer: Arc<dyn TokenIssuer> = Arc::new(JwtIssuer::new(ISSUER_NAME, &signing_key)?);
        config.signing_key = Some(signing_key);

        let auth = Arc::new(AuthGate::new(config.auth_methods.clone(), issuer.clone()));

        let registry = Arc::new(AgentModeRegistry::new());
        registry.set_client_namespace(BOOTSTRAP_CLIENT_ID, BOOTSTRAP_NAMESPACE);
        registry.set_mode(BOOTSTRAP_NAMESPACE, AgentMode::Autonomous);

        let queues = Arc::new(SendRecvQueues::new());
        let emitter = EventEmitter::new(config.server_name.clone());
        let app_manager = Arc::new(ApplicationManager::new(backend.clone(), true));

        let pipeline = Arc::new(SyncPipeline::new(
            queues.clone(),
            registry.clone(),
            emitter.clone(),
        ));
        let informer = Arc::new(ApplicationInformer::new(
            backend,
            config.namespaces.clone(),
            pipeline,
        ));

        let handshake = Arc::new(HandshakeService::new(
            auth.clone(),
            registry.clone(),
            config.namespaces.clone(),
        ));

        Ok(Self {
            config,
            namespace,
            cancel,
            issuer,
            auth,
            registry,
            queues,
            app_manager,
            informer,
            handshake,
            emitter,
            transport: None,
            volatile_signing_key,
        })
    }

    /// Start the configured transport and the background workers, then wait
    /// up to one second for the informer to sync.
    pub async fn start(&mut self, errors: mpsc::Sender<ServerError>) -> Result<(), ServerError> {
        if self.transport.is_some() {
            return Err(ServerError::AlreadyStarted);
        }
        if self.cancel.is_cancelled() {
            return Err(ServerError::Stopped);
        }

        info!(
            "Starting {} (server) v{} (ns={}, allowed_namespaces={:?})",
            NAME, VERSION, self.namespace, self.config.namespaces
        );

        let tls = match self.load_tls_config() {
            Ok(tls) => Some(tls),
            Err(TlsError::NotConfigured) if self.config.insecure_plaintext => {
                warn!("TLS not configured, serving plaintext");
                None
            }
            Err(e) => return Err(e.into()),
        };

        let ctx = TransportContext {
            auth: self.auth.clone(),
            handshake: self.handshake.clone(),
            queues: self.queues.clone(),
            drain: CancellationToken::new(),
            version: format!("{} v{}", self.config.server_name, VERSION),
        };
        let transport = ActiveTransport::start(
            self.config.transport,
            self.config.listen_address,
            tls,
            ctx,
            self.cancel.clone(),
            errors.clone(),
        )
        .await?;
        self.transport = Some(transport);

        if self.config.metrics_enabled() {
            self.start_metrics(errors.clone()).await;
        }

        Arc::new(EventProcessor::new(
            self.queues.clone(),
            self.registry.clone(),
            self.app_manager.clone(),
        )
        .with_idle_timeout(self.config.queue_idle_timeout))
        .start(self.cancel.clone());

        {
            let informer = self.informer.clone();
            let cancel = self.cancel.clone();
            let errors = errors.clone();
            tokio::spawn(async move {
                if let Err(e) = informer.run(cancel).await {
                    error!("Application informer stopped: {}", e);
                    let _ = errors.send(e.into()).await;
                }
            });
        }

        if self.informer.wait_for_sync(WAIT_FOR_SYNCED).await {
            info!("Informer synced and ready");
        } else {
            warn!(
                "Informer not synced after {:?}, serving before the initial state is known",
                WAIT_FOR_SYNCED
            );
        }

        Ok(())
    }

    async fn start_metrics(&self, errors: mpsc::Sender<ServerError>) {
        match spawn_metrics_listener(self.config.metrics_port, self.cancel.clone()) {
            Ok(handle) => {
                tokio::spawn(async move {
                    if let Ok(Err(e)) = handle.await {
                        let _ = errors.send(e.into()).await;
                    }
                });
            }
            Err(e) => {
                error!("{}", e);
                let _ = errors.send(e.into()).await;
            }
        }
    }

    /// Cancel the root token, then tear down the active transport.
    ///
    /// Fails with "no server running" when no transport was started. Not
    /// idempotent: a second call fails the same way.
    pub async fn shutdown(&mut self) -> Result<(), ServerError> {
        debug!("Shutdown requested");
        self.cancel.cancel();

        let transport = self.transport.take().ok_or(ServerError::NotRunning)?;
        let grace = self.config.grace_period;
        if grace.is_zero() {
            info!("Closing server");
        } else {
            info!(
                "Server shutdown requested, allowing client connections to shut down for {:?}",
                grace
            );
        }
        transport.shutdown(grace).await?;
        Ok(())
    }

    pub fn load_tls_config(&self) -> Result<TlsConfig, TlsError> {
        tls::load_tls_config(self.config.tls.as_ref())
    }

    pub fn token_issuer(&self) -> Arc<dyn TokenIssuer> {
        self.issuer.clone()
    }

    pub fn auth_gate(&self) -> Arc<AuthGate> {
        self.auth.clone()
    }

    pub fn auth_methods(&self) -> Arc<AuthMethods> {
        self.auth.methods()
    }

    pub fn registry(&self) -> Arc<AgentModeRegistry> {
        self.registry.clone()
    }

    pub fn queues(&self) -> Arc<SendRecvQueues> {
        self.queues.clone()
    }

    pub fn app_manager(&self) -> Arc<ApplicationManager> {
        self.app_manager.clone()
    }

    pub fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Address the active transport listens on
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.as_ref().map(ActiveTransport::local_addr)
    }

    /// Serving, informer synced and not shutting down
    pub fn is_ready(&self) -> bool {
        self.transport.is_some() && self.informer.has_synced() && !self.cancel.is_cancelled()
    }

    pub fn uses_volatile_signing_key(&self) -> bool {
        self.volatile_signing_key
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::server_config::{with_server_name, with_signing_key};
    use crate::infrastructure::memory_backend::InMemoryStateBackend;
    use std::sync::OnceLock;

    fn key() -> RsaPrivateKey {
        static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
        KEY.get_or_init(|| RsaPrivateKey::new(&mut OsRng, 2048).unwrap())
            .clone()
    }

    fn server(options: Vec<ServerOption>) -> Result<Server, ServerError> {
        Server::new(
            &CancellationToken::new(),
            Arc::new(InMemoryStateBackend::new()),
            "fleetsync",
            options,
        )
    }

    #[test]
    fn test_option_error_surfaces_unmodified() {
        let err = server(vec![with_server_name("")]).err().unwrap();
        assert!(matches!(err, ServerError::Config(ConfigError::EmptyServerName)));
        assert_eq!(err.to_string(), ConfigError::EmptyServerName.to_string());
    }

    #[test]
    fn test_registry_is_seeded() {
        let server = server(vec![with_signing_key(key())]).unwrap();
        let registry = server.registry();
        assert_eq!(registry.mode(BOOTSTRAP_NAMESPACE), AgentMode::Autonomous);
        assert_eq!(
            registry.namespace_for_client(BOOTSTRAP_CLIENT_ID).unwrap(),
            BOOTSTRAP_NAMESPACE
        );
        assert!(!server.uses_volatile_signing_key());
        assert!(!server.is_ready());
        assert!(server.local_addr().is_none());
    }

    #[test]
    fn test_parent_cancellation_reaches_server() {
        let parent = CancellationToken::new();
        let server = Server::new(
            &parent,
            Arc::new(InMemoryStateBackend::new()),
            "fleetsync",
            vec![with_signing_key(key())],
        )
        .unwrap();
        parent.cancel();
        assert!(server.cancellation_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_shutdown_without_transport_fails() {
        let mut server = server(vec![with_signing_key(key())]).unwrap();
        let err = server.shutdown().await.unwrap_err();
        assert!(matches!(err, ServerError::NotRunning));
        assert_eq!(err.to_string(), "no server running");
    }

    #[tokio::test]
    async fn test_start_without_tls_fails_synchronously() {
        let mut server = server(vec![with_signing_key(key())]).unwrap();
        let (tx, _rx) = mpsc::channel(1);
        let err = server.start(tx).await.unwrap_err();
        assert!(matches!(err, ServerError::Tls(TlsError::NotConfigured)));
        assert!(server.local_addr().is_none());
    }
}
