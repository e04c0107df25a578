//! Prints the CustomResourceDefinition manifests for all operator CRDs.
//!
//! Usage: `cargo run -p crds --bin crdgen > config/crd/zap-operator.yaml`

use crds::{ZapScan, ZapScheduledScan};
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crds = [ZapScan::crd(), ZapScheduledScan::crd()];
    for crd in crds {
        print!("---\n{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
