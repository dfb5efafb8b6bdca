// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Build Script for fleetsync-principal-core
//!
//! Compiles the Protocol Buffer definitions of the three agent-facing gRPC
//! services:
//!
//! - `../../proto/versionapi.proto` - version negotiation
//! - `../../proto/authapi.proto` - authentication handshake
//! - `../../proto/eventstreamapi.proto` - bidirectional event stream
//!
//! Generated code is placed in `OUT_DIR` and included via `tonic::include_proto!`
//! in `src/presentation/grpc/mod.rs`.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Implements internal responsibilities for build

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set PROTOC environment variable to point to the vendored protoc binary
    std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path().unwrap());

    let protos = [
        "../../proto/versionapi.proto",
        "../../proto/authapi.proto",
        "../../proto/eventstreamapi.proto",
    ];

    tonic_prost_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&protos, &["../../proto"])?;

    for proto in protos {
        println!("cargo:rerun-if-changed={}", proto);
    }

    Ok(())
}
