//! Accelerator inventory snapshot
//!
//! Discovered SR-IOV accelerators as reported in the resource status.
//! Comparison is an explicit field-by-field check (`matches`) so drift
//! detection only depends on the fields listed here.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct InventorySnapshot {
    /// Accelerators, sorted by PCI address
    #[serde(default)]
    pub sriov_accelerators: Vec<SriovAccelerator>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct SriovAccelerator {
    pub vendor_id: String,
    pub device_id: String,
    pub pci_address: String,
    /// Driver the PF is bound to, empty if unbound
    #[serde(default)]
    pub driver: String,
    /// `sriov_totalvfs`
    #[serde(default)]
    pub max_virtual_functions: u32,
    #[serde(default)]
    pub virtual_functions: Vec<VirtualFunction>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct VirtualFunction {
    pub pci_address: String,
    #[serde(default)]
    pub driver: String,
    pub device_id: String,
}

impl InventorySnapshot {
    /// True when both snapshots describe the same devices in the same order.
    pub fn matches(&self, other: &Self) -> bool {
        self.sriov_accelerators.len() == other.sriov_accelerators.len()
            && self
                .sriov_accelerators
                .iter()
                .zip(&other.sriov_accelerators)
                .all(|(a, b)| a.matches(b))
    }

    /// Looks up an accelerator by PF address.
    pub fn accelerator(&self, pci_address: &str) -> Option<&SriovAccelerator> {
        self.sriov_accelerators
            .iter()
            .find(|a| a.pci_address == pci_address)
    }
}

impl SriovAccelerator {
    pub fn matches(&self, other: &Self) -> bool {
        self.vendor_id == other.vendor_id
            && self.device_id == other.device_id
            && self.pci_address == other.pci_address
            && self.driver == other.driver
            && self.max_virtual_functions == other.max_virtual_functions
            && self.virtual_functions.len() == other.virtual_functions.len()
            && self
                .virtual_functions
                .iter()
                .zip(&other.virtual_functions)
                .all(|(a, b)| a.matches(b))
    }
}

impl VirtualFunction {
    pub fn matches(&self, other: &Self) -> bool {
        self.pci_address == other.pci_address
            && self.driver == other.driver
            && self.device_id == other.device_id
    }
}

impl PartialEq for InventorySnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.matches(other)
    }
}

impl Eq for InventorySnapshot {}
