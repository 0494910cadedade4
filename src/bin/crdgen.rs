//! CRD YAML Generator
//!
//! This binary generates Kubernetes CRD manifests for the workflow records
//! defined by the snapshot-mover-operator.
//!
//! Usage: cargo run --bin crdgen > deploy/crds/all.yaml

use snapshot_mover_operator::crd::generate_crds;

fn main() -> anyhow::Result<()> {
    for crd in generate_crds()? {
        println!("---");
        print!("{}", crd);
    }
    Ok(())
}
