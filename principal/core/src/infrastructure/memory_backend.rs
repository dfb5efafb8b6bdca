// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// In-memory State Backend
//
// Keeps applications in a sorted map and publishes every committed write on a
// tokio broadcast channel. State is lost on restart.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

use crate::domain::backend::{BackendError, StateBackend, WatchEvent};
use crate::domain::resource::{application_key, Application};

const WATCH_CAPACITY: usize = 1024;

struct Store {
    applications: BTreeMap<String, Application>,
    last_version: u64,
}

pub struct InMemoryStateBackend {
    store: RwLock<Store>,
    sender: broadcast::Sender<WatchEvent>,
}

impl Default for InMemoryStateBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStateBackend {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            store: RwLock::new(Store {
                applications: BTreeMap::new(),
                last_version: 0,
            }),
            sender,
        }
    }

    /// Backend pre-populated with `applications`. Duplicate keys keep the last entry.
    pub fn with_applications(applications: impl IntoIterator<Item = Application>) -> Self {
        let backend = Self::new();
        {
            let mut store = backend.store.write();
            for mut app in applications {
                store.last_version += 1;
                app.resource_version = store.last_version;
                store.applications.insert(app.key(), app);
            }
        }
        backend
    }

    fn publish(&self, event: WatchEvent) {
        // No receivers is fine: nobody is watching yet.
        let _ = self.sender.send(event);
    }
}

#[async_trait]
impl StateBackend for InMemoryStateBackend {
    async fn list(&self, namespace: Option<&str>) -> Result<Vec<Application>, BackendError> {
        let store = self.store.read();
        Ok(store
            .applications
            .values()
            .filter(|app| namespace.is_none_or(|ns| app.namespace == ns))
            .cloned()
            .collect())
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Application>, BackendError> {
        Ok(self
            .store
            .read()
            .applications
            .get(&application_key(namespace, name))
            .cloned())
    }

    async fn create(&self, mut application: Application) -> Result<Application, BackendError> {
        let created = {
            let mut store = self.store.write();
            let key = application.key();
            if store.applications.contains_key(&key) {
                return Err(BackendError::AlreadyExists(key));
            }
            store.last_version += 1;
            application.resource_version = store.last_version;
            store.applications.insert(key, application.clone());
            application
        };
        self.publish(WatchEvent::Added(created.clone()));
        Ok(created)
    }

    async fn update(&self, mut application: Application) -> Result<Application, BackendError> {
        let updated = {
            let mut store = self.store.write();
            let key = application.key();
            if !store.applications.contains_key(&key) {
                return Err(BackendError::NotFound(key));
            }
            store.last_version += 1;
            application.resource_version = store.last_version;
            store.applications.insert(key, application.clone());
            application
        };
        self.publish(WatchEvent::Modified(updated.clone()));
        Ok(updated)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<Application, BackendError> {
        let key = application_key(namespace, name);
        let removed = self
            .store
            .write()
            .applications
            .remove(&key)
            .ok_or(BackendError::NotFound(key))?;
        self.publish(WatchEvent::Deleted(removed.clone()));
        Ok(removed)
    }

    fn watch(&self) -> BoxStream<'static, WatchEvent> {
        BroadcastStream::new(self.sender.subscribe())
            .filter_map(|result| async move {
                match result {
                    Ok(event) => Some(event),
                    Err(e) => {
                        warn!("State backend watcher lagged: {}", e);
                        None
                    }
                }
            })
            .boxed()
    }
}
