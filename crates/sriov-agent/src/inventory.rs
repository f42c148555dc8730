//! Sysfs accelerator inventory

use crate::agent_trait::InventoryReader;
use crate::discovery::{normalize_hex, AcceleratorDiscoveryConfig};
use crate::error::AgentError;
use crds::{InventorySnapshot, SriovAccelerator, VirtualFunction};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Scans `<sysfs>/bus/pci/devices` for accelerators listed in the discovery config.
#[derive(Debug, Clone)]
pub struct SysfsInventoryReader {
    sysfs_root: PathBuf,
    config: Arc<AcceleratorDiscoveryConfig>,
}

impl SysfsInventoryReader {
    pub fn new(sysfs_root: impl Into<PathBuf>, config: Arc<AcceleratorDiscoveryConfig>) -> Self {
        Self {
            sysfs_root: sysfs_root.into(),
            config,
        }
    }

    fn devices_dir(&self) -> PathBuf {
        pci_devices_dir(&self.sysfs_root)
    }

    async fn read_accelerator(&self, pci_address: &str) -> Result<Option<SriovAccelerator>, AgentError> {
        let dir = self.devices_dir().join(pci_address);
        let vendor = read_trimmed(&dir.join("vendor")).await?;
        let device = read_trimmed(&dir.join("device")).await?;
        let class = read_trimmed(&dir.join("class")).await?;
        let class_code = u32::from_str_radix(&normalize_hex(&class), 16).unwrap_or(0);

        if !self.config.matches(&vendor, &device, class_code) {
            return Ok(None);
        }

        // PFs without SR-IOV capability have no sriov_totalvfs
        let max_vfs = match read_trimmed(&dir.join("sriov_totalvfs")).await {
            Ok(v) => v.parse().unwrap_or(0),
            Err(_) => 0,
        };

        let mut virtual_functions = Vec::new();
        for vf_address in virtfn_addresses(&dir).await? {
            let vf_dir = self.devices_dir().join(&vf_address);
            virtual_functions.push(VirtualFunction {
                driver: bound_driver(&vf_dir).await.unwrap_or_default(),
                device_id: normalize_hex(&read_trimmed(&vf_dir.join("device")).await?),
                pci_address: vf_address,
            });
        }

        Ok(Some(SriovAccelerator {
            vendor_id: normalize_hex(&vendor),
            device_id: normalize_hex(&device),
            pci_address: pci_address.to_string(),
            driver: bound_driver(&dir).await.unwrap_or_default(),
            max_virtual_functions: max_vfs,
            virtual_functions,
        }))
    }
}

#[async_trait::async_trait]
impl InventoryReader for SysfsInventoryReader {
    async fn read_inventory(&self) -> Result<InventorySnapshot, AgentError> {
        let devices_dir = self.devices_dir();
        let mut entries = tokio::fs::read_dir(&devices_dir)
            .await
            .map_err(|e| AgentError::io(&devices_dir, e))?;

        let mut accelerators = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AgentError::io(&devices_dir, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            match self.read_accelerator(&name).await {
                Ok(Some(acc)) => accelerators.push(acc),
                Ok(None) => {}
                // Devices can disappear mid-scan (e.g. VFs being torn down)
                Err(e) => warn!(pci_address = %name, error = %e, "skipping unreadable PCI device"),
            }
        }

        accelerators.sort_by(|a, b| a.pci_address.cmp(&b.pci_address));
        debug!(count = accelerators.len(), "read accelerator inventory");
        Ok(InventorySnapshot {
            sriov_accelerators: accelerators,
        })
    }
}

pub(crate) fn pci_devices_dir(sysfs_root: &Path) -> PathBuf {
    sysfs_root.join("bus").join("pci").join("devices")
}

pub(crate) async fn read_trimmed(path: &Path) -> Result<String, AgentError> {
    tokio::fs::read_to_string(path)
        .await
        .map(|s| s.trim().to_string())
        .map_err(|e| AgentError::io(path, e))
}

/// Name of the driver bound to the device at `device_dir`, `None` if unbound.
pub(crate) async fn bound_driver(device_dir: &Path) -> Option<String> {
    tokio::fs::read_link(device_dir.join("driver"))
        .await
        .ok()
        .and_then(|target| target.file_name().map(|n| n.to_string_lossy().into_owned()))
}

/// VF addresses behind the `virtfnN` links of a PF, in VF index order.
pub(crate) async fn virtfn_addresses(pf_dir: &Path) -> Result<Vec<String>, AgentError> {
    let mut entries = tokio::fs::read_dir(pf_dir)
        .await
        .map_err(|e| AgentError::io(pf_dir, e))?;

    let mut vfs = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| AgentError::io(pf_dir, e))?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(index) = name.strip_prefix("virtfn").and_then(|i| i.parse::<u32>().ok()) else {
            continue;
        };
        let target = tokio::fs::read_link(entry.path())
            .await
            .map_err(|e| AgentError::io(entry.path(), e))?;
        if let Some(address) = target.file_name() {
            vfs.push((index, address.to_string_lossy().into_owned()));
        }
    }

    vfs.sort_by_key(|(index, _)| *index);
    Ok(vfs.into_iter().map(|(_, address)| address).collect())
}
