// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Agent operating modes
//!
//! The mode describes who owns the applications of a namespace:
//!
//! - **Managed**: the principal is the source of truth and pushes changes to the agent
//! - **Autonomous**: the agent is the source of truth and reports to the principal
//! - **Unknown**: no agent has registered for the namespace yet

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    #[default]
    Unknown,
    Managed,
    Autonomous,
}

impl AgentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentMode::Unknown => "unknown",
            AgentMode::Managed => "managed",
            AgentMode::Autonomous => "autonomous",
        }
    }

    pub fn is_managed(&self) -> bool {
        matches!(self, AgentMode::Managed)
    }

    pub fn is_autonomous(&self) -> bool {
        matches!(self, AgentMode::Autonomous)
    }
}

impl fmt::Display for AgentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid agent mode: {0:?}")]
pub struct ParseAgentModeError(pub String);

impl FromStr for AgentMode {
    type Err = ParseAgentModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(AgentMode::Unknown),
            "managed" => Ok(AgentMode::Managed),
            "autonomous" => Ok(AgentMode::Autonomous),
            other => Err(ParseAgentModeError(other.to_string())),
        }
    }
}
