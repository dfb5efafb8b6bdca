// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::resource::Application;

/// Callbacks invoked by the application informer for every observed change.
///
/// Callbacks run on the informer worker and must not block.
pub trait ApplicationEventHandler: Send + Sync {
    fn on_created(&self, application: &Application);
    fn on_updated(&self, old: &Application, new: &Application);
    fn on_deleted(&self, application: &Application);
}
