//! Accelerator discovery configuration
//!
//! Loaded once at start-up from `accelerators.json` and shared read-only
//! afterwards. Example:
//!
//! ```json
//! {
//!   "VendorID": {"8086": "Intel Corporation"},
//!   "Class": "12",
//!   "SubClass": "00",
//!   "Devices": {"0d8f": "FPGA_5GNR", "5052": "FPGA_LTE", "0d5c": "ACC100"},
//!   "NodeLabel": "intel.com/fec-accelerator-present"
//! }
//! ```

use crate::error::AgentError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// Which PCI devices are treated as SR-IOV accelerators.
#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct AcceleratorDiscoveryConfig {
    /// Vendor ID (hex, no `0x`) to vendor name
    #[serde(rename = "VendorID")]
    pub vendor_id: BTreeMap<String, String>,

    /// PCI class (hex byte)
    pub class: String,

    /// PCI subclass (hex byte)
    pub sub_class: String,

    /// Device ID (hex, no `0x`) to product name
    pub devices: BTreeMap<String, String>,

    /// Node label advertised when an accelerator is present
    #[serde(default)]
    pub node_label: String,
}

impl AcceleratorDiscoveryConfig {
    /// Reads and validates the configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| AgentError::io(path, e))?;
        let config = Self::from_json(&raw)?;
        info!(
            path = %path.display(),
            vendors = config.vendor_id.len(),
            devices = config.devices.len(),
            "loaded accelerator discovery config"
        );
        Ok(config)
    }

    pub fn from_json(raw: &str) -> Result<Self, AgentError> {
        let mut config: Self = serde_json::from_str(raw)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    fn normalize(&mut self) {
        self.vendor_id = std::mem::take(&mut self.vendor_id)
            .into_iter()
            .map(|(k, v)| (normalize_hex(&k), v))
            .collect();
        self.devices = std::mem::take(&mut self.devices)
            .into_iter()
            .map(|(k, v)| (normalize_hex(&k), v))
            .collect();
        self.class = normalize_hex(&self.class);
        self.sub_class = normalize_hex(&self.sub_class);
    }

    fn validate(&self) -> Result<(), AgentError> {
        if self.vendor_id.is_empty() {
            return Err(AgentError::DiscoveryConfig("VendorID must not be empty".to_string()));
        }
        if self.devices.is_empty() {
            return Err(AgentError::DiscoveryConfig("Devices must not be empty".to_string()));
        }
        for (field, value) in [("Class", &self.class), ("SubClass", &self.sub_class)] {
            if u8::from_str_radix(value, 16).is_err() {
                return Err(AgentError::DiscoveryConfig(format!(
                    "{} must be a hex byte, got {:?}",
                    field, value
                )));
            }
        }
        Ok(())
    }

    /// True if a device with these sysfs attributes is a supported accelerator.
    ///
    /// `class_code` is the 24-bit value of the sysfs `class` file
    /// (class, subclass, prog-if).
    pub fn matches(&self, vendor: &str, device: &str, class_code: u32) -> bool {
        let class = format!("{:02x}", (class_code >> 16) & 0xff);
        let sub_class = format!("{:02x}", (class_code >> 8) & 0xff);
        self.vendor_id.contains_key(&normalize_hex(vendor))
            && self.devices.contains_key(&normalize_hex(device))
            && class == self.class
            && sub_class == self.sub_class
    }
}

/// Lower-cases a hex string and strips an optional `0x` prefix.
pub(crate) fn normalize_hex(value: &str) -> String {
    let trimmed = value.trim();
    trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed)
        .to_ascii_lowercase()
}
