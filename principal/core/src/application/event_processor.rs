// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Inbound event processor
//!
//! Background task draining the receive queues filled by connected agents and
//! applying the events to the state backend.
//!
//! # Rules
//!
//! | mode        | create | spec-update | status-update | delete |
//! |-------------|--------|-------------|---------------|--------|
//! | autonomous  | yes    | yes         | yes           | yes    |
//! | managed     | no     | no          | yes           | no     |
//! | unknown     | no     | no          | no            | no     |
//!
//! Agents may only touch applications in the namespace they authenticated for.
//!
//! Each cycle also expires queue pairs of clients that stayed away longer than
//! the idle timeout.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::app_manager::{ApplicationManager, ManagerError};
use crate::domain::agent_mode::AgentMode;
use crate::domain::events::{Event, EventType};
use crate::domain::server_config::DEFAULT_QUEUE_IDLE_TIMEOUT;
use crate::infrastructure::agent_registry::{AgentModeRegistry, RegistryError};
use crate::infrastructure::metrics::{
    EVENTS_PROCESSED_TOTAL, EVENTS_REJECTED_TOTAL, EVENTS_UNROUTED_TOTAL,
};
use crate::infrastructure::queue::SendRecvQueues;

pub const DEFAULT_PROCESS_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("client {client} may not modify applications in namespace {namespace}")]
    NamespaceMismatch { client: String, namespace: String },

    #[error("{event_type} events are not accepted from {mode} agents")]
    Rejected { mode: AgentMode, event_type: EventType },

    #[error(transparent)]
    Manager(#[from] ManagerError),
}

pub struct EventProcessor {
    queues: Arc<SendRecvQueues>,
    registry: Arc<AgentModeRegistry>,
    manager: Arc<ApplicationManager>,
    interval: Duration,
    idle_timeout: Duration,
}

impl EventProcessor {
    pub fn new(
        queues: Arc<SendRecvQueues>,
        registry: Arc<AgentModeRegistry>,
        manager: Arc<ApplicationManager>,
    ) -> Self {
        Self {
            queues,
            registry,
            manager,
            interval: DEFAULT_PROCESS_INTERVAL,
            idle_timeout: DEFAULT_QUEUE_IDLE_TIMEOUT,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run(cancel).await;
        })
    }

    async fn run(&self, cancel: CancellationToken) {
        info!(interval_ms = self.interval.as_millis() as u64, "Starting inbound event processor");

        let mut tick = interval(self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let processed = self.process_pending().await;
                    if processed > 0 {
                        debug!(processed, "Inbound event cycle completed");
                    }
                    self.expire_idle_queues();
                }
                _ = cancel.cancelled() => {
                    info!("Inbound event processor stopped");
                    break;
                }
            }
        }
    }

    /// Drain every receive queue once. Returns the number of events handled.
    pub async fn process_pending(&self) -> usize {
        let mut handled = 0;
        for client in self.queues.names() {
            let Ok(queue) = self.queues.recv_queue(&client) else {
                continue;
            };
            while let Some(event) = queue.try_next() {
                handled += 1;
                match self.process_event(&client, &event).await {
                    Ok(()) => {
                        metrics::counter!(EVENTS_PROCESSED_TOTAL, "type" => event.event_type.as_str())
                            .increment(1);
                    }
                    Err(e) => {
                        warn!(
                            client = %client,
                            event = %event.event_type,
                            application = %event.application.key(),
                            "Rejected inbound event: {}", e
                        );
                        metrics::counter!(EVENTS_REJECTED_TOTAL, "type" => event.event_type.as_str())
                            .increment(1);
                    }
                }
            }
        }
        handled
    }

    /// Remove queue pairs idle for longer than the idle timeout. Returns the
    /// number of pairs removed.
    pub fn expire_idle_queues(&self) -> usize {
        let expired = self.queues.sweep_idle(self.idle_timeout);
        for pair in &expired {
            if pair.dropped > 0 {
                warn!(
                    client = %pair.client_id,
                    dropped = pair.dropped,
                    "Expired idle queue pair with undelivered events"
                );
                metrics::counter!(EVENTS_UNROUTED_TOTAL, "reason" => "expired")
                    .increment(pair.dropped as u64);
            } else {
                debug!(client = %pair.client_id, "Expired idle queue pair");
            }
        }
        expired.len()
    }

    pub async fn process_event(&self, client: &str, event: &Event) -> Result<(), ProcessError> {
        let namespace = self.registry.namespace_for_client(client)?;
        let app = &event.application;
        if app.namespace != namespace {
            return Err(ProcessError::NamespaceMismatch {
                client: client.to_string(),
                namespace: app.namespace.clone(),
            });
        }

        let mode = self.registry.mode(&namespace);
        match (mode, event.event_type) {
            (AgentMode::Autonomous, EventType::Create) => {
                self.manager.create(app.clone()).await?;
            }
            (AgentMode::Autonomous, EventType::SpecUpdate) => {
                self.manager.update_spec(app.clone()).await?;
            }
            (AgentMode::Autonomous, EventType::Delete) => {
                self.manager.delete(&app.namespace, &app.name).await?;
            }
            (AgentMode::Autonomous | AgentMode::Managed, EventType::StatusUpdate) => {
                self.manager.update_status(app.clone()).await?;
            }
            (mode, event_type) => return Err(ProcessError::Rejected { mode, event_type }),
        }
        Ok(())
    }
}
