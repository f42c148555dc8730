//! Node hardware configurator
//!
//! Implements [`HardwareConfigurator`] on top of sysfs, the kernel
//! controller and `pf_bb_config`.

use crate::agent_trait::{HardwareConfigurator, InventoryReader};
use crate::bbdev;
use crate::command::{run_checked, CommandRunner};
use crate::error::AgentError;
use crate::inventory::{bound_driver, pci_devices_dir, virtfn_addresses};
use crate::kernel::KernelController;
use crds::{InventorySnapshot, PhysicalFunctionConfig, SriovFecNodeConfigSpec};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Programs accelerators on the local node.
pub struct NodeConfigurator {
    kernel: KernelController,
    inventory: Arc<dyn InventoryReader>,
    runner: Arc<dyn CommandRunner>,
    sysfs_root: PathBuf,
    bbdev_config_dir: PathBuf,
}

impl std::fmt::Debug for NodeConfigurator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeConfigurator")
            .field("kernel", &self.kernel)
            .field("sysfs_root", &self.sysfs_root)
            .field("bbdev_config_dir", &self.bbdev_config_dir)
            .finish_non_exhaustive()
    }
}

impl NodeConfigurator {
    pub fn new(
        kernel: KernelController,
        inventory: Arc<dyn InventoryReader>,
        runner: Arc<dyn CommandRunner>,
        sysfs_root: impl Into<PathBuf>,
        bbdev_config_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            kernel,
            inventory,
            runner,
            sysfs_root: sysfs_root.into(),
            bbdev_config_dir: bbdev_config_dir.into(),
        }
    }

    fn device_dir(&self, pci_address: &str) -> PathBuf {
        pci_devices_dir(&self.sysfs_root).join(pci_address)
    }

    /// Binds `pci_address` to `driver` through `driver_override`.
    async fn bind_driver(&self, pci_address: &str, driver: &str) -> Result<(), AgentError> {
        let dir = self.device_dir(pci_address);
        let current = bound_driver(&dir).await;
        if current.as_deref() == Some(driver) {
            debug!(pci_address, driver, "driver already bound");
            return Ok(());
        }

        let drivers_dir = self.sysfs_root.join("bus").join("pci").join("drivers");
        if let Some(current) = current {
            write_sysfs(&drivers_dir.join(current).join("unbind"), pci_address).await?;
        }
        write_sysfs(&dir.join("driver_override"), driver).await?;
        write_sysfs(&self.sysfs_root.join("bus").join("pci").join("drivers_probe"), pci_address).await?;
        info!(pci_address, driver, "bound driver");
        Ok(())
    }

    async fn configure_pf(&self, pf: &PhysicalFunctionConfig) -> Result<(), AgentError> {
        info!(
            pci_address = %pf.pci_address,
            pf_driver = %pf.pf_driver,
            vf_driver = %pf.vf_driver,
            vf_amount = pf.vf_amount,
            "configuring physical function"
        );

        self.bind_driver(&pf.pci_address, &pf.pf_driver).await?;

        // The kernel refuses to change a non-zero VF count directly
        let numvfs = self.device_dir(&pf.pci_address).join("sriov_numvfs");
        write_sysfs(&numvfs, "0").await?;
        if pf.vf_amount > 0 {
            write_sysfs(&numvfs, &pf.vf_amount.to_string()).await?;
        }

        for vf in virtfn_addresses(&self.device_dir(&pf.pci_address)).await? {
            self.bind_driver(&vf, &pf.vf_driver).await?;
        }

        if let Some(acc100) = pf.bb_dev_config.as_ref().and_then(|b| b.acc100.as_ref()) {
            let path = self
                .bbdev_config_dir
                .join(format!("{}.ini", pf.pci_address.replace(':', "_")));
            tokio::fs::create_dir_all(&self.bbdev_config_dir)
                .await
                .map_err(|e| AgentError::io(&self.bbdev_config_dir, e))?;
            tokio::fs::write(&path, bbdev::render_acc100(acc100))
                .await
                .map_err(|e| AgentError::io(&path, e))?;

            let args = vec![
                "ACC100".to_string(),
                "-c".to_string(),
                path.display().to_string(),
                "-p".to_string(),
                pf.pci_address.clone(),
            ];
            run_checked(self.runner.as_ref(), "pf_bb_config", &args).await?;
            info!(pci_address = %pf.pci_address, "programmed baseband device");
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl HardwareConfigurator for NodeConfigurator {
    async fn missing_kernel_params(&self) -> Result<bool, AgentError> {
        Ok(!self.kernel.missing_params().await?.is_empty())
    }

    async fn install_kernel_params(&self) -> Result<(), AgentError> {
        let missing = self.kernel.missing_params().await?;
        self.kernel.add_params(&missing).await
    }

    async fn request_reboot(&self) -> Result<(), AgentError> {
        self.kernel.reboot().await
    }

    async fn apply_config(&self, spec: &SriovFecNodeConfigSpec) -> Result<(), AgentError> {
        let inventory = self.inventory.read_inventory().await?;
        validate_spec(spec, &inventory)?;
        for pf in &spec.physical_functions {
            self.configure_pf(pf).await?;
        }
        Ok(())
    }
}

/// Checks a spec against the node's accelerators before touching anything.
pub fn validate_spec(spec: &SriovFecNodeConfigSpec, inventory: &InventorySnapshot) -> Result<(), AgentError> {
    let mut seen = HashSet::new();
    for pf in &spec.physical_functions {
        if !is_pci_address(&pf.pci_address) {
            return Err(AgentError::InvalidConfig(format!(
                "{:?} is not a PCI address",
                pf.pci_address
            )));
        }
        if !seen.insert(pf.pci_address.as_str()) {
            return Err(AgentError::InvalidConfig(format!(
                "physical function {} configured more than once",
                pf.pci_address
            )));
        }
        if pf.pf_driver.is_empty() || pf.vf_driver.is_empty() {
            return Err(AgentError::InvalidConfig(format!(
                "physical function {} needs both pfDriver and vfDriver",
                pf.pci_address
            )));
        }
        let Some(acc) = inventory.accelerator(&pf.pci_address) else {
            return Err(AgentError::DeviceNotFound(pf.pci_address.clone()));
        };
        if pf.vf_amount > acc.max_virtual_functions {
            return Err(AgentError::InvalidConfig(format!(
                "physical function {} supports at most {} VFs, {} requested",
                pf.pci_address, acc.max_virtual_functions, pf.vf_amount
            )));
        }
    }
    Ok(())
}

/// `DDDD:BB:DD.F` with hex digits.
fn is_pci_address(value: &str) -> bool {
    let Some((domain, rest)) = value.split_once(':') else {
        return false;
    };
    let Some((bus, rest)) = rest.split_once(':') else {
        return false;
    };
    let Some((device, function)) = rest.split_once('.') else {
        return false;
    };
    let hex = |s: &str, len: usize| s.len() == len && s.chars().all(|c| c.is_ascii_hexdigit());
    hex(domain, 4) && hex(bus, 2) && hex(device, 2) && function.len() == 1 && matches!(function.as_bytes()[0], b'0'..=b'7')
}

async fn write_sysfs(path: &Path, value: &str) -> Result<(), AgentError> {
    tokio::fs::write(path, value)
        .await
        .map_err(|e| AgentError::io(path, e))
}
