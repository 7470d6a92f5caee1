//! # CRD Generator
//!
//! Generates the CustomResourceDefinition YAML for `SecretExport` and `SecretImport`
//! from the Rust type definitions.
//!
//! ## Usage
//!
//! ```bash
//! # Generate CRD YAML
//! cargo run --bin crdgen > config/crd/secret-sharing.yaml
//!
//! # Generate and apply directly
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use kube::core::CustomResourceExt;
use secret_share_controller::crd::{SecretExport, SecretImport};

fn main() {
    let documents = [
        serde_yaml::to_string(&SecretExport::crd()),
        serde_yaml::to_string(&SecretImport::crd()),
    ];

    println!("# This file is auto-generated by crdgen");
    println!("# DO NOT EDIT THIS FILE MANUALLY");
    println!("# Fix schema issues in the Rust types under src/crd/");
    println!("#");
    for document in documents {
        match document {
            Ok(yaml) => {
                println!("---");
                print!("{yaml}");
            }
            Err(e) => {
                eprintln!("Failed to serialize CRD to YAML: {e}");
                std::process::exit(1);
            }
        }
    }
}
