// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Prometheus metrics
//!
//! Metric names used across the principal and the listener that exports them.
//! The listener runs next to the main transport on its own port and stops with
//! the root cancellation token.

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const AGENT_MODE_CHANGES_TOTAL: &str = "fleetsync_agent_mode_changes_total";
pub const AGENT_AUTHENTICATIONS_TOTAL: &str = "fleetsync_agent_authentications_total";
pub const EVENTS_ROUTED_TOTAL: &str = "fleetsync_events_routed_total";
pub const EVENTS_UNROUTED_TOTAL: &str = "fleetsync_events_unrouted_total";
pub const EVENTS_PROCESSED_TOTAL: &str = "fleetsync_events_processed_total";
pub const EVENTS_REJECTED_TOTAL: &str = "fleetsync_events_rejected_total";
pub const APPLICATION_OPERATIONS_TOTAL: &str = "fleetsync_application_operations_total";
pub const CONNECTED_AGENTS: &str = "fleetsync_connected_agents";

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("could not start metrics listener on {addr}: {reason}")]
    Build { addr: SocketAddr, reason: String },

    #[error("metrics listener failed: {0}")]
    Serve(String),
}

/// Bind the Prometheus listener on `0.0.0.0:port` and serve it until `cancel`
/// fires. Bind errors are returned immediately; serve errors through the
/// task's result.
pub fn spawn_metrics_listener(
    port: u16,
    cancel: CancellationToken,
) -> Result<JoinHandle<Result<(), MetricsError>>, MetricsError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let (recorder, exporter) = PrometheusBuilder::new()
        .with_http_listener(addr)
        .build()
        .map_err(|e| MetricsError::Build {
            addr,
            reason: e.to_string(),
        })?;

    // Only the first recorder in a process can become global; later listeners
    // still serve, just without the process-wide counters.
    if metrics::set_global_recorder(recorder).is_err() {
        debug!("Global metrics recorder already installed");
    }

    info!("Metrics listener started on {}", addr);
    Ok(tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Metrics listener stopped");
                Ok(())
            }
            result = exporter => result.map_err(|e| MetricsError::Serve(format!("{:?}", e))),
        }
    }))
}
