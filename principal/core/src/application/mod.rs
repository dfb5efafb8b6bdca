// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod app_manager;
pub mod authentication;
pub mod event_processor;
pub mod sync_pipeline;

pub use app_manager::{ApplicationManager, ManagerError};
pub use authentication::{HandshakeService, IssuedTokens, ACCESS_TOKEN_TTL, REFRESH_TOKEN_TTL};
pub use event_processor::{EventProcessor, ProcessError};
pub use sync_pipeline::SyncPipeline;
