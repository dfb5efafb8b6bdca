// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Application Events - units exchanged between the principal and its agents
//
// Outbound events are produced from informer callbacks and queued per client.
// Inbound events are pushed by agents and drained by the event processor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::resource::Application;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    Create,
    SpecUpdate,
    StatusUpdate,
    Delete,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Create => "create",
            EventType::SpecUpdate => "spec-update",
            EventType::StatusUpdate => "status-update",
            EventType::Delete => "delete",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    /// Name of the emitting party (server name or agent name)
    pub source: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub time: DateTime<Utc>,
    pub application: Application,
}

/// Stamps events with an id, a source and a timestamp.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    source: String,
}

impl EventEmitter {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn application_event(&self, event_type: EventType, application: Application) -> Event {
        Event {
            id: Uuid::new_v4(),
            source: self.source.clone(),
            event_type,
            time: Utc::now(),
            application,
        }
    }
}
