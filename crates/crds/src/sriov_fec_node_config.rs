//! SriovFecNodeConfig CRD
//!
//! Desired SR-IOV FEC accelerator layout for a single node. One resource
//! exists per node, named after the node, in the daemon's namespace.

use crate::conditions::{Condition, ConditionSet, CONDITION_CONFIGURED};
use crate::inventory::InventorySnapshot;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[kube(
    group = "dcops.microscaler.io",
    version = "v1alpha1",
    kind = "SriovFecNodeConfig",
    namespaced,
    status = "SriovFecNodeConfigStatus",
    shortname = "sfnc",
    printcolumn = r#"{"name":"Configured","type":"string","jsonPath":".status.conditions[?(@.type==\"Configured\")].status"}"#,
    printcolumn = r#"{"name":"Reason","type":"string","jsonPath":".status.conditions[?(@.type==\"Configured\")].reason"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SriovFecNodeConfigSpec {
    /// Physical functions to configure, applied in order
    #[serde(default)]
    pub physical_functions: Vec<PhysicalFunctionConfig>,

    /// Skip evicting workloads before reconfiguring (the node is still cordoned)
    #[serde(default)]
    pub drain_skip: bool,
}

/// Configuration for one accelerator physical function.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PhysicalFunctionConfig {
    /// PCI address of the PF (e.g. "0000:af:00.0")
    pub pci_address: String,

    /// Kernel driver the PF is bound to (e.g. "pci-pf-stub", "igb_uio")
    pub pf_driver: String,

    /// Kernel driver every VF is bound to (e.g. "vfio-pci")
    pub vf_driver: String,

    /// Number of virtual functions to create
    pub vf_amount: u32,

    /// Optional baseband device programming
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bb_dev_config: Option<BbDevConfig>,
}

/// Baseband device configuration passed to `pf_bb_config`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct BbDevConfig {
    /// ACC100 queue layout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acc100: Option<Acc100Config>,
}

/// ACC100 eASIC queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Acc100Config {
    /// Program the PF itself (true) or hand queues to VFs (false)
    pub pf_mode: bool,

    /// Number of VF bundles
    pub num_vf_bundles: u32,

    /// Maximum queue size
    pub max_queue_size: u32,

    #[serde(rename = "uplink4G")]
    #[schemars(rename = "uplink4G")]
    pub uplink_4g: QueueGroupConfig,

    #[serde(rename = "downlink4G")]
    #[schemars(rename = "downlink4G")]
    pub downlink_4g: QueueGroupConfig,

    #[serde(rename = "uplink5G")]
    #[schemars(rename = "uplink5G")]
    pub uplink_5g: QueueGroupConfig,

    #[serde(rename = "downlink5G")]
    #[schemars(rename = "downlink5G")]
    pub downlink_5g: QueueGroupConfig,
}

/// Queue group layout for one direction/technology.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueueGroupConfig {
    pub num_queue_groups: u32,
    pub num_aqs_per_groups: u32,
    pub aq_depth_log2: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SriovFecNodeConfigStatus {
    /// Accelerators discovered on the node at the last status write
    #[serde(default)]
    pub inventory: InventorySnapshot,

    /// Status conditions; holds at most one `Configured` entry
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl SriovFecNodeConfigStatus {
    /// Conditions keyed by type.
    pub fn condition_set(&self) -> ConditionSet {
        ConditionSet::from_list(&self.conditions)
    }
}

impl SriovFecNodeConfig {
    /// Empty placeholder for a node that has no resource yet.
    pub fn placeholder(node_name: &str, namespace: &str) -> Self {
        Self {
            metadata: ObjectMeta {
                name: Some(node_name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: SriovFecNodeConfigSpec::default(),
            status: None,
        }
    }

    /// `metadata.generation`, 0 if the API server hasn't assigned one.
    pub fn generation(&self) -> i64 {
        self.metadata.generation.unwrap_or(0)
    }

    /// The current `Configured` condition, if any.
    pub fn configured_condition(&self) -> Option<&Condition> {
        self.status
            .as_ref()
            .and_then(|s| s.conditions.iter().rev().find(|c| c.type_ == CONDITION_CONFIGURED))
    }

    /// The stored inventory snapshot, default when no status was written yet.
    pub fn stored_inventory(&self) -> InventorySnapshot {
        self.status
            .as_ref()
            .map(|s| s.inventory.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_defaults_when_fields_missing() {
        let spec: SriovFecNodeConfigSpec = serde_json::from_str("{}").unwrap();
        assert!(spec.physical_functions.is_empty());
        assert!(!spec.drain_skip);
    }

    #[test]
    fn test_spec_wire_names() {
        let json = serde_json::json!({
            "physicalFunctions": [{
                "pciAddress": "0000:af:00.0",
                "pfDriver": "pci-pf-stub",
                "vfDriver": "vfio-pci",
                "vfAmount": 2,
                "bbDevConfig": {
                    "acc100": {
                        "pfMode": false,
                        "numVfBundles": 2,
                        "maxQueueSize": 1024,
                        "uplink4G": {"numQueueGroups": 2, "numAqsPerGroups": 16, "aqDepthLog2": 4},
                        "downlink4G": {"numQueueGroups": 2, "numAqsPerGroups": 16, "aqDepthLog2": 4},
                        "uplink5G": {"numQueueGroups": 2, "numAqsPerGroups": 16, "aqDepthLog2": 4},
                        "downlink5G": {"numQueueGroups": 2, "numAqsPerGroups": 16, "aqDepthLog2": 4}
                    }
                }
            }],
            "drainSkip": true
        });
        let spec: SriovFecNodeConfigSpec = serde_json::from_value(json).unwrap();
        assert!(spec.drain_skip);
        let pf = &spec.physical_functions[0];
        assert_eq!(pf.vf_amount, 2);
        let acc = pf.bb_dev_config.as_ref().and_then(|b| b.acc100.as_ref()).unwrap();
        assert_eq!(acc.uplink_5g.num_aqs_per_groups, 16);
    }

    #[test]
    fn test_placeholder_is_empty() {
        let cfg = SriovFecNodeConfig::placeholder("worker-1", "vran");
        assert_eq!(cfg.metadata.name.as_deref(), Some("worker-1"));
        assert_eq!(cfg.metadata.namespace.as_deref(), Some("vran"));
        assert!(cfg.spec.physical_functions.is_empty());
        assert_eq!(cfg.generation(), 0);
        assert!(cfg.configured_condition().is_none());
    }
}
