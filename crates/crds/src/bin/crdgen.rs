//! Prints the CRD manifests as YAML.
//!
//! `cargo run -p crds --bin crdgen > config/crd/sriov-fec-node-config.yaml`

use crds::SriovFecNodeConfig;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&SriovFecNodeConfig::crd())?);
    Ok(())
}
