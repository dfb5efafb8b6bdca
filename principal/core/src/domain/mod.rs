// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Mod
//!
//! Provides the domain types shared by every layer of the principal.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Implements mod

pub mod agent_mode;
pub mod resource;
pub mod auth;
pub mod backend;
pub mod events;
pub mod informer;
pub mod server_config;
