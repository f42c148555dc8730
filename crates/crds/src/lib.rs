//! SR-IOV FEC CRD Definitions
//!
//! The `SriovFecNodeConfig` custom resource and the status types it carries.

pub mod conditions;
pub mod inventory;
pub mod sriov_fec_node_config;

pub use conditions::*;
pub use inventory::*;
pub use sriov_fec_node_config::*;
