//! Build script for Medic Core
//!
//! Compiles Protocol Buffer definitions using tonic-build to generate
//! Rust code for the inter-service gRPC surface.

use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let proto_file = "proto/medic.proto";

    let out_dir = PathBuf::from(std::env::var("OUT_DIR").unwrap());

    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .build_transport(true)
        .compile_well_known_types(false)
        .out_dir(&out_dir)
        // Serde derives so event-bus consumers can reuse the wire types
        .type_attribute(".", "#[derive(serde::Serialize, serde::Deserialize)]")
        .type_attribute(".", "#[serde(rename_all = \"camelCase\")]")
        .compile(&[proto_file], &["proto/"])?;

    println!("cargo:rerun-if-changed={}", proto_file);
    println!("cargo:rerun-if-changed=build.rs");

    Ok(())
}
