// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Transport Multiplexer
//
// Starts exactly one main listener (gRPC or plain HTTP) and tears it down in
// two phases:
//
// 1. The root cancellation token fires: the listener stops accepting and
//    in-flight calls keep running.
// 2. `ActiveTransport::shutdown` waits up to the grace period for them, then
//    cancels the drain token seen by long-running handlers and force-closes
//    whatever is left.
//
// Binding happens synchronously in `start` so address errors surface to the
// caller; failures while serving go to the error channel.

use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::grpc::{AuthLayer, AuthenticationService, EventStreamService, VersionService};
use super::{http, TransportContext};
use crate::domain::server_config::TransportKind;
use crate::infrastructure::tls::TlsConfig;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("could not listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid transport TLS configuration: {0}")]
    Tls(String),

    #[error("{kind} transport failed: {reason}")]
    Serve { kind: TransportKind, reason: String },

    #[error("in-flight requests did not finish within the {0:?} grace period, connections were closed")]
    GracePeriodExceeded(Duration),
}

pub struct ActiveTransport {
    kind: TransportKind,
    local_addr: SocketAddr,
    task: JoinHandle<()>,
    drain: CancellationToken,
    http_handle: Option<axum_server::Handle>,
}

impl ActiveTransport {
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve `kind` on `addr` until `root` is cancelled. `tls: None` serves
    /// plaintext. The drain token of `ctx` is owned by the returned handle.
    pub async fn start<E>(
        kind: TransportKind,
        addr: SocketAddr,
        tls: Option<TlsConfig>,
        ctx: TransportContext,
        root: CancellationToken,
        errors: mpsc::Sender<E>,
    ) -> Result<Self, TransportError>
    where
        E: From<TransportError> + Send + 'static,
    {
        let listener = bind(addr)?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| TransportError::Bind { addr, source })?;
        let drain = ctx.drain.clone();

        let (task, http_handle) = match kind {
            TransportKind::Grpc => (
                serve_grpc(listener, local_addr, tls, ctx, root, errors)?,
                None,
            ),
            TransportKind::Http => {
                let handle = axum_server::Handle::new();
                let task = serve_http(listener, tls, ctx, root, handle.clone(), errors);
                (task, Some(handle))
            }
        };

        info!(transport = %kind, address = %local_addr, "Transport listening");
        Ok(Self {
            kind,
            local_addr,
            task,
            drain,
            http_handle,
        })
    }

    /// Wait up to `grace` for in-flight calls, then force close. A zero grace
    /// period closes immediately. Expects the root token to be cancelled
    /// already so no new connections are accepted.
    pub async fn shutdown(mut self, grace: Duration) -> Result<(), TransportError> {
        if grace.is_zero() {
            self.force_close();
            let _ = (&mut self.task).await;
            info!(transport = %self.kind, "Transport closed");
            return Ok(());
        }

        match tokio::time::timeout(grace, &mut self.task).await {
            Ok(_) => {
                info!(transport = %self.kind, "Transport drained");
                Ok(())
            }
            Err(_) => {
                warn!(transport = %self.kind, ?grace, "Grace period exceeded, closing connections");
                self.force_close();
                let _ = (&mut self.task).await;
                Err(TransportError::GracePeriodExceeded(grace))
            }
        }
    }

    fn force_close(&self) {
        self.drain.cancel();
        if let Some(handle) = &self.http_handle {
            handle.shutdown();
        }
        self.task.abort();
    }
}

fn bind(addr: SocketAddr) -> Result<std::net::TcpListener, TransportError> {
    let listener =
        std::net::TcpListener::bind(addr).map_err(|source| TransportError::Bind { addr, source })?;
    listener
        .set_nonblocking(true)
        .map_err(|source| TransportError::Bind { addr, source })?;
    Ok(listener)
}

fn serve_grpc<E>(
    listener: std::net::TcpListener,
    addr: SocketAddr,
    tls: Option<TlsConfig>,
    ctx: TransportContext,
    root: CancellationToken,
    errors: mpsc::Sender<E>,
) -> Result<JoinHandle<()>, TransportError>
where
    E: From<TransportError> + Send + 'static,
{
    let listener = tokio::net::TcpListener::from_std(listener)
        .map_err(|source| TransportError::Bind { addr, source })?;

    let mut builder = tonic::transport::Server::builder();
    if let Some(tls) = &tls {
        builder = builder
            .tls_config(tls.tonic_config())
            .map_err(|e| TransportError::Tls(e.to_string()))?;
    }

    let router = builder
        .layer(AuthLayer::new(ctx.auth.clone()))
        .add_service(VersionService::new(ctx.version.clone()).into_server())
        .add_service(AuthenticationService::new(ctx.handshake.clone()).into_server())
        .add_service(EventStreamService::new(ctx.queues.clone(), ctx.drain.clone()).into_server());

    let incoming = TcpListenerStream::new(listener);
    let stop_accepting = root.cancelled_owned();

    Ok(tokio::spawn(async move {
        if let Err(e) = router
            .serve_with_incoming_shutdown(incoming, stop_accepting)
            .await
        {
            error!("gRPC transport failed: {}", e);
            let _ = errors
                .send(E::from(TransportError::Serve {
                    kind: TransportKind::Grpc,
                    reason: e.to_string(),
                }))
                .await;
        }
    }))
}

fn serve_http<E>(
    listener: std::net::TcpListener,
    tls: Option<TlsConfig>,
    ctx: TransportContext,
    root: CancellationToken,
    handle: axum_server::Handle,
    errors: mpsc::Sender<E>,
) -> JoinHandle<()>
where
    E: From<TransportError> + Send + 'static,
{
    let app = http::router(ctx).into_make_service();

    {
        let handle = handle.clone();
        tokio::spawn(async move {
            root.cancelled().await;
            // Stop accepting, let in-flight requests finish.
            handle.graceful_shutdown(None);
        });
    }

    tokio::spawn(async move {
        let result = match tls {
            Some(tls) => {
                let config = axum_server::tls_rustls::RustlsConfig::from_config(tls.rustls_config());
                axum_server::from_tcp_rustls(listener, config)
                    .handle(handle)
                    .serve(app)
                    .await
            }
            None => axum_server::from_tcp(listener).handle(handle).serve(app).await,
        };
        if let Err(e) = result {
            error!("HTTP transport failed: {}", e);
            let _ = errors
                .send(E::from(TransportError::Serve {
                    kind: TransportKind::Http,
                    reason: e.to_string(),
                }))
                .await;
        }
    })
}
