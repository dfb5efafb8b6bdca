// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Sync Pipeline - routes informer changes to agent send queues
//
// Registered as the informer's event handler at construction. A change in
// namespace `ns` is pushed only when `ns` is managed, to every client the
// registry maps to `ns`. Autonomous namespaces own their state and unknown
// namespaces have no agent, so neither receives pushes. Events for clients
// without a queue are logged and counted.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::events::{Event, EventEmitter, EventType};
use crate::domain::informer::ApplicationEventHandler;
use crate::domain::resource::Application;
use crate::infrastructure::agent_registry::AgentModeRegistry;
use crate::infrastructure::metrics::{EVENTS_ROUTED_TOTAL, EVENTS_UNROUTED_TOTAL};
use crate::infrastructure::queue::{QueueError, SendRecvQueues};

pub struct SyncPipeline {
    queues: Arc<SendRecvQueues>,
    registry: Arc<AgentModeRegistry>,
    emitter: EventEmitter,
}

impl SyncPipeline {
    pub fn new(
        queues: Arc<SendRecvQueues>,
        registry: Arc<AgentModeRegistry>,
        emitter: EventEmitter,
    ) -> Self {
        Self {
            queues,
            registry,
            emitter,
        }
    }

    pub fn queues(&self) -> Arc<SendRecvQueues> {
        self.queues.clone()
    }

    /// Put `event` on the send queue of `client_id`.
    pub fn deliver(&self, client_id: &str, event: Event) -> Result<(), QueueError> {
        self.queues.send_queue(client_id)?.add(event);
        Ok(())
    }

    fn route(&self, event_type: EventType, application: &Application) {
        let namespace = application.namespace.as_str();
        let mode = self.registry.mode(namespace);
        if !mode.is_managed() {
            debug!(namespace, %mode, event = %event_type, "Not pushing change to non-managed namespace");
            return;
        }

        let clients = self.registry.clients_in_namespace(namespace);
        if clients.is_empty() {
            warn!(namespace, event = %event_type, application = %application.name, "No agent connected for managed namespace");
            metrics::counter!(EVENTS_UNROUTED_TOTAL, "reason" => "no-client").increment(1);
            return;
        }

        for client in clients {
            let event = self.emitter.application_event(event_type, application.clone());
            match self.deliver(&client, event) {
                Ok(()) => {
                    debug!(client = %client, event = %event_type, application = %application.key(), "Queued event for agent");
                    metrics::counter!(EVENTS_ROUTED_TOTAL, "type" => event_type.as_str()).increment(1);
                }
                Err(e) => {
                    warn!(client = %client, event = %event_type, "Could not route event: {}", e);
                    metrics::counter!(EVENTS_UNROUTED_TOTAL, "reason" => "no-queue").increment(1);
                }
            }
        }
    }
}

impl ApplicationEventHandler for SyncPipeline {
    fn on_created(&self, application: &Application) {
        self.route(EventType::Create, application);
    }

    fn on_updated(&self, old: &Application, new: &Application) {
        if old.spec == new.spec && old.labels == new.labels {
            debug!(application = %new.key(), "Spec unchanged, not pushing update");
            return;
        }
        self.route(EventType::SpecUpdate, new);
    }

    fn on_deleted(&self, application: &Application) {
        self.route(EventType::Delete, application);
    }
}
