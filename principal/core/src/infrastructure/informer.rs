// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Application Informer
//
// Watches the state backend and turns its change stream into handler
// callbacks. The informer opens the watch before listing so no write between
// the two is lost, replays the listing as creations, reports itself synced and
// then follows the watch until cancelled.

use futures::StreamExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::domain::backend::{BackendError, StateBackend, WatchEvent};
use crate::domain::informer::ApplicationEventHandler;
use crate::domain::resource::Application;
use crate::domain::server_config::namespace_allowed;

#[derive(Debug, Error)]
pub enum InformerError {
    #[error("initial listing failed: {0}")]
    Backend(#[from] BackendError),

    #[error("state backend watch stream closed")]
    WatchClosed,
}

pub struct ApplicationInformer {
    backend: Arc<dyn StateBackend>,
    namespaces: Vec<String>,
    handler: Arc<dyn ApplicationEventHandler>,
    cache: RwLock<HashMap<String, Application>>,
    synced: watch::Sender<bool>,
}

impl ApplicationInformer {
    /// `namespaces` restricts the informer; an empty list watches everything.
    pub fn new(
        backend: Arc<dyn StateBackend>,
        namespaces: Vec<String>,
        handler: Arc<dyn ApplicationEventHandler>,
    ) -> Self {
        let (synced, _) = watch::channel(false);
        Self {
            backend,
            namespaces,
            handler,
            cache: RwLock::new(HashMap::new()),
            synced,
        }
    }

    fn watches(&self, namespace: &str) -> bool {
        namespace_allowed(&self.namespaces, namespace)
    }

    pub fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Wait until the initial listing was delivered, at most `timeout`.
    pub async fn wait_for_sync(&self, timeout: Duration) -> bool {
        let mut rx = self.synced.subscribe();
        let synced = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|synced| *synced)).await,
            Ok(Ok(_))
        );
        synced
    }

    /// Last observed state of `namespace/name`
    pub fn cached(&self, key: &str) -> Option<Application> {
        self.cache.read().get(key).cloned()
    }

    pub async fn run(&self, cancel: CancellationToken) -> Result<(), InformerError> {
        let mut changes = self.backend.watch();

        let initial = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            listed = self.backend.list(None) => listed?,
        };
        let mut count = 0usize;
        for app in initial.into_iter().filter(|a| self.watches(&a.namespace)) {
            self.cache.write().insert(app.key(), app.clone());
            self.handler.on_created(&app);
            count += 1;
        }
        self.synced.send_replace(true);
        info!(applications = count, "Application informer synced");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Application informer stopped");
                    return Ok(());
                }
                change = changes.next() => match change {
                    Some(event) => self.dispatch(event),
                    None => return Err(InformerError::WatchClosed),
                },
            }
        }
    }

    fn dispatch(&self, event: WatchEvent) {
        match event {
            WatchEvent::Added(app) | WatchEvent::Modified(app) => {
                if !self.watches(&app.namespace) {
                    return;
                }
                let key = app.key();
                let previous = {
                    let mut cache = self.cache.write();
                    // Already seen through the initial listing or a newer write
                    let stale = cache
                        .get(&key)
                        .is_some_and(|cached| cached.resource_version >= app.resource_version);
                    if stale {
                        debug!(key = %key, "Skipping stale application change");
                        return;
                    }
                    cache.insert(key, app.clone())
                };
                match previous {
                    Some(old) => self.handler.on_updated(&old, &app),
                    None => self.handler.on_created(&app),
                }
            }
            WatchEvent::Deleted(app) => {
                if !self.watches(&app.namespace) {
                    return;
                }
                let removed = self.cache.write().remove(&app.key());
                self.handler.on_deleted(removed.as_ref().unwrap_or(&app));
            }
        }
    }
}
