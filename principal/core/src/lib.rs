// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! FleetSync principal core
//!
//! Server-side coordination point for remote agents synchronizing
//! declarative application state.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Wires the domain, application, infrastructure and
//!   presentation layers into the [`server::Server`] lifecycle

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;
pub mod server;

pub use domain::*;
pub use server::{Server, ServerError};
