// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! State backend contract
//!
//! The upstream declarative-state store the principal reads from and writes
//! to. Implementations must deliver every committed write on the stream
//! returned by [`StateBackend::watch`].

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::domain::resource::Application;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("application {0} already exists")]
    AlreadyExists(String),

    #[error("application {0} not found")]
    NotFound(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Added(Application),
    Modified(Application),
    Deleted(Application),
}

#[async_trait]
pub trait StateBackend: Send + Sync {
    /// List applications, optionally restricted to one namespace
    async fn list(&self, namespace: Option<&str>) -> Result<Vec<Application>, BackendError>;

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Application>, BackendError>;

    async fn create(&self, application: Application) -> Result<Application, BackendError>;

    async fn update(&self, application: Application) -> Result<Application, BackendError>;

    async fn delete(&self, namespace: &str, name: &str) -> Result<Application, BackendError>;

    /// Stream of changes committed after the call
    fn watch(&self) -> BoxStream<'static, WatchEvent>;
}
