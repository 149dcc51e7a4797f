// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Build Script for aegis-edge-core
//!
//! Compiles the Protocol Buffer definition of the outbound identity-lookup
//! RPC spoken to the orchestration layer's validation service.
//!
//! Uses `tonic-build` with a vendored `protoc` so the build has no host
//! toolchain requirement. Generated code is included via
//! `tonic::include_proto!` in `src/infrastructure/validation.rs`.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Point prost at the vendored protoc binary
    std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path().unwrap());

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(
            &["../../proto/edge_validation.proto"],
            &["../../proto"],
        )?;

    println!("cargo:rerun-if-changed=../../proto/edge_validation.proto");

    Ok(())
}
