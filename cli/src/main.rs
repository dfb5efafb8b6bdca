// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # FleetSync Principal
//!
//! The `fleetsync-principal` binary runs the agent coordination server.
//!
//! Configuration is layered: the YAML file given with `--config` first, then
//! command line flags (or their `FLEETSYNC_*` environment variables). The
//! application state lives in memory and can be seeded from a YAML list of
//! applications with `--applications-file`.
//!
//! The process stops on Ctrl+C, SIGTERM, or the first runtime error reported
//! by the server.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use fleetsync_core::Server;

mod options;

use options::{Cli, LogFormat};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level, cli.log_format)?;

    let backend = Arc::new(options::load_backend(cli.applications_file.as_deref())?);
    let server_options = options::server_options(&cli)?;

    let root = CancellationToken::new();
    let mut server = Server::new(&root, backend, cli.namespace.clone(), server_options)
        .context("Failed to create principal")?;

    let (errors_tx, mut errors) = mpsc::channel(16);
    server
        .start(errors_tx)
        .await
        .context("Failed to start principal")?;
    if let Some(addr) = server.local_addr() {
        info!("Principal serving on {}", addr);
    }

    let failure = tokio::select! {
        _ = shutdown_signal() => None,
        Some(e) = errors.recv() => {
            error!("Principal failed: {}", e);
            Some(e)
        }
    };

    if let Err(e) = server.shutdown().await {
        warn!("Shutdown incomplete: {}", e);
    }
    root.cancel();

    match failure {
        Some(e) => Err(e).context("Principal stopped after a runtime error"),
        None => {
            info!("Principal stopped");
            Ok(())
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: LogFormat) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
