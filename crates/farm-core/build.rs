/// Builds the gRPC client and server code for the `farm.proto` definition
/// using `tonic-prost-build`.
///
/// This code generation step processes the Protocol Buffer definitions located
/// in the `proto` directory and emits Rust modules with gRPC bindings into the
/// crate's `OUT_DIR`.
///
/// # Dataset Deserialization
///
/// `Item`, `Record` and `RecordDatabase` additionally derive
/// `serde::Deserialize` so the server can load its dataset straight from a
/// protobuf-JSON style document (camelCase field names, proto3 defaults for
/// missing fields). The original proto field name `source_id` is accepted as
/// well as `sourceId`.
///
/// # Files and Paths
///
/// - Proto file: `proto/farm.proto`
/// - Includes: `proto/`
/// - Descriptor set: `$OUT_DIR/farm_descriptor.bin` (used by gRPC reflection)
///
/// # Panics
///
/// This function will `panic!` if code generation fails.
use std::env;
use std::path::PathBuf;

const SERDE_ATTRIBUTES: &str = concat!(
    "#[derive(serde::Deserialize)]\n",
    "#[serde(default, rename_all = \"camelCase\", deny_unknown_fields)]",
);

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let descriptor_path = out_dir.join("farm_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();

    config
        .type_attribute(".farm.Item", SERDE_ATTRIBUTES)
        .type_attribute(".farm.Record", SERDE_ATTRIBUTES)
        .type_attribute(".farm.RecordDatabase", SERDE_ATTRIBUTES)
        .field_attribute(".farm.Item.source_id", "#[serde(alias = \"source_id\")]")
        .file_descriptor_set_path(&descriptor_path);

    tonic_prost_build::configure()
        .compile_with_config(config, &["proto/farm.proto"], &["proto"])
        .unwrap();

    println!("cargo:rerun-if-changed=proto/farm.proto");
}
