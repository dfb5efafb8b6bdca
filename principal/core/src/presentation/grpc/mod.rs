// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! gRPC transport
//!
//! Generated service definitions plus their implementations and the tower
//! layer that enforces the authentication gate on every call.

pub mod auth_layer;
pub mod services;

pub mod versionapi {
    tonic::include_proto!("versionapi");
}

pub mod authapi {
    tonic::include_proto!("authapi");
}

pub mod eventstreamapi {
    tonic::include_proto!("eventstreamapi");
}

pub use auth_layer::AuthLayer;
pub use services::{AuthenticationService, EventStreamService, VersionService};
