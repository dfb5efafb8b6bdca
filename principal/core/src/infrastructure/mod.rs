// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod agent_registry;
pub mod auth;
pub mod informer;
pub mod issuer;
pub mod memory_backend;
pub mod metrics;
pub mod queue;
pub mod tls;

pub use agent_registry::{AgentModeRegistry, RegistryError};
pub use auth::{is_no_auth, AuthGate, NO_AUTH_ENDPOINTS};
pub use informer::{ApplicationInformer, InformerError};
pub use issuer::JwtIssuer;
pub use memory_backend::InMemoryStateBackend;
pub use queue::{EventQueue, QueueError, SendRecvQueues};
pub use tls::{load_tls_config, TlsConfig, TlsError};
