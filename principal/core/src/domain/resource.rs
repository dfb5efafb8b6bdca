// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Synchronized application resource
//!
//! The principal does not interpret the application payload: `spec` and
//! `status` are carried as opaque JSON documents.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub name: String,
    pub namespace: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default)]
    pub spec: Value,

    #[serde(default)]
    pub status: Value,

    /// Monotonic version assigned by the state backend on every write
    #[serde(default)]
    pub resource_version: u64,
}

impl Application {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, spec: Value) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            labels: BTreeMap::new(),
            spec,
            status: Value::Null,
            resource_version: 0,
        }
    }

    /// `namespace/name`, unique within a backend
    pub fn key(&self) -> String {
        application_key(&self.namespace, &self.name)
    }
}

pub fn application_key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}
