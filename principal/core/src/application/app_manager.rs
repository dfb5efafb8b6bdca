// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Application manager
//!
//! Applies application changes to the state backend. Spec and status are
//! written separately so an agent reporting status never clobbers a spec it
//! does not own.

use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::domain::backend::{BackendError, StateBackend};
use crate::domain::resource::{application_key, Application};
use crate::infrastructure::metrics::APPLICATION_OPERATIONS_TOTAL;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("application {0} not found")]
    NotFound(String),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub struct ApplicationManager {
    backend: Arc<dyn StateBackend>,
    allow_upsert: bool,
}

impl ApplicationManager {
    pub fn new(backend: Arc<dyn StateBackend>, allow_upsert: bool) -> Self {
        Self {
            backend,
            allow_upsert,
        }
    }

    pub fn allows_upsert(&self) -> bool {
        self.allow_upsert
    }

    /// Create `application`. With upsert allowed an existing application has
    /// its spec and labels replaced instead.
    pub async fn create(&self, application: Application) -> Result<Application, ManagerError> {
        match self.backend.create(application.clone()).await {
            Ok(created) => {
                record("create");
                Ok(created)
            }
            Err(BackendError::AlreadyExists(key)) if self.allow_upsert => {
                debug!(key = %key, "Application exists, updating instead");
                self.update_spec(application).await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Replace spec and labels, keeping the stored status. Unchanged specs are
    /// not written.
    pub async fn update_spec(&self, application: Application) -> Result<Application, ManagerError> {
        let mut existing = self.existing(&application.namespace, &application.name).await?;
        if existing.spec == application.spec && existing.labels == application.labels {
            return Ok(existing);
        }
        existing.spec = application.spec;
        existing.labels = application.labels;
        let updated = self.backend.update(existing).await?;
        record("update-spec");
        Ok(updated)
    }

    /// Replace the status, keeping the stored spec.
    pub async fn update_status(&self, application: Application) -> Result<Application, ManagerError> {
        let mut existing = self.existing(&application.namespace, &application.name).await?;
        existing.status = application.status;
        let updated = self.backend.update(existing).await?;
        record("update-status");
        Ok(updated)
    }

    pub async fn delete(&self, namespace: &str, name: &str) -> Result<Application, ManagerError> {
        let deleted = self.backend.delete(namespace, name).await.map_err(|e| match e {
            BackendError::NotFound(key) => ManagerError::NotFound(key),
            other => ManagerError::Backend(other),
        })?;
        record("delete");
        Ok(deleted)
    }

    pub async fn get(&self, namespace: &str, name: &str) -> Result<Option<Application>, ManagerError> {
        Ok(self.backend.get(namespace, name).await?)
    }

    pub async fn list(&self, namespace: Option<&str>) -> Result<Vec<Application>, ManagerError> {
        Ok(self.backend.list(namespace).await?)
    }

    async fn existing(&self, namespace: &str, name: &str) -> Result<Application, ManagerError> {
        self.backend
            .get(namespace, name)
            .await?
            .ok_or_else(|| ManagerError::NotFound(application_key(namespace, name)))
    }
}

fn record(operation: &'static str) {
    metrics::counter!(APPLICATION_OPERATIONS_TOTAL, "operation" => operation).increment(1);
}
