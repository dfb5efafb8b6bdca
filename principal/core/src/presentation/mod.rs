// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Agent-facing transports
//!
//! The principal serves either gRPC ([`grpc`]) or plain HTTP ([`http`]);
//! [`transport`] starts and stops whichever one is configured. Both expose the
//! same endpoint identifiers and go through the same authentication gate.

pub mod grpc;
pub mod http;
pub mod transport;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::application::authentication::HandshakeService;
use crate::infrastructure::auth::AuthGate;
use crate::infrastructure::queue::SendRecvQueues;

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct TransportContext {
    pub auth: Arc<AuthGate>,
    pub handshake: Arc<HandshakeService>,
    pub queues: Arc<SendRecvQueues>,
    /// Cancelled when in-flight handlers must give up (grace period over)
    pub drain: CancellationToken,
    /// `<server name> v<version>`
    pub version: String,
}
