// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Agent Mode Registry
//
// Tracks the operating mode of every tenant namespace and which namespace a
// connected client identity belongs to. Both maps sit behind a single
// read/write lock and are never handed out, so every access goes through one
// of the four operations below.

use parking_lot::RwLock;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

use crate::domain::agent_mode::AgentMode;
use crate::infrastructure::metrics::AGENT_MODE_CHANGES_TOTAL;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no namespace mapping for client {0}")]
    NoMapping(String),
}

#[derive(Default)]
struct RegistryState {
    namespaces: HashMap<String, AgentMode>,
    clients: HashMap<String, String>,
}

#[derive(Default)]
pub struct AgentModeRegistry {
    state: RwLock<RegistryState>,
}

impl AgentModeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mode of `namespace`, [`AgentMode::Unknown`] when nothing was registered.
    pub fn mode(&self, namespace: &str) -> AgentMode {
        self.state
            .read()
            .namespaces
            .get(namespace)
            .copied()
            .unwrap_or_default()
    }

    /// Overwrite the mode of `namespace`. Any mode may replace any other.
    pub fn set_mode(&self, namespace: &str, mode: AgentMode) {
        let previous = self
            .state
            .write()
            .namespaces
            .insert(namespace.to_string(), mode);
        if previous != Some(mode) {
            debug!(namespace, %mode, "Agent mode changed");
            metrics::counter!(AGENT_MODE_CHANGES_TOTAL, "mode" => mode.as_str()).increment(1);
        }
    }

    pub fn namespace_for_client(&self, client_id: &str) -> Result<String, RegistryError> {
        self.state
            .read()
            .clients
            .get(client_id)
            .cloned()
            .ok_or_else(|| RegistryError::NoMapping(client_id.to_string()))
    }

    pub fn set_client_namespace(&self, client_id: &str, namespace: &str) {
        self.state
            .write()
            .clients
            .insert(client_id.to_string(), namespace.to_string());
    }

    /// Clients currently mapped to `namespace`, sorted.
    pub fn clients_in_namespace(&self, namespace: &str) -> Vec<String> {
        let state = self.state.read();
        let mut clients: Vec<String> = state
            .clients
            .iter()
            .filter(|(_, ns)| ns.as_str() == namespace)
            .map(|(client, _)| client.clone())
            .collect();
        clients.sort();
        clients
    }
}
