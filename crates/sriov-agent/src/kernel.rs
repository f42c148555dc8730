//! Kernel boot parameters and reboot
//!
//! The accelerators need the IOMMU in passthrough mode. Parameters are read
//! from the running kernel's command line and added through the host's boot
//! tooling, run inside `chroot <host-root>`.

use crate::command::{run_checked, CommandRunner};
use crate::error::AgentError;
use crate::inventory::read_trimmed;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Boot parameters that must be present on the running kernel.
pub const REQUIRED_KERNEL_PARAMS: [&str; 2] = ["intel_iommu=on", "iommu=pt"];

/// Tool used to persist boot parameters on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelArgsTool {
    /// `rpm-ostree kargs` on ostree-based hosts (RHCOS, Fedora CoreOS)
    RpmOstree,
    /// `grubby` on package-based hosts
    Grubby,
}

/// Checks and installs kernel boot parameters.
pub struct KernelController {
    host_root: PathBuf,
    cmdline_path: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

impl std::fmt::Debug for KernelController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelController")
            .field("host_root", &self.host_root)
            .field("cmdline_path", &self.cmdline_path)
            .finish_non_exhaustive()
    }
}

impl KernelController {
    pub fn new(host_root: impl Into<PathBuf>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            host_root: host_root.into(),
            cmdline_path: PathBuf::from("/proc/cmdline"),
            runner,
        }
    }

    /// Reads the kernel command line from another file (tests).
    #[must_use]
    pub fn with_cmdline_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cmdline_path = path.into();
        self
    }

    /// Required parameters absent from the running kernel's command line.
    pub async fn missing_params(&self) -> Result<Vec<String>, AgentError> {
        let cmdline = read_trimmed(&self.cmdline_path).await?;
        let present: Vec<&str> = cmdline.split_whitespace().collect();
        Ok(REQUIRED_KERNEL_PARAMS
            .iter()
            .filter(|p| !present.contains(p))
            .map(|p| (*p).to_string())
            .collect())
    }

    pub async fn detect_tool(&self) -> KernelArgsTool {
        let marker = self.host_root.join("run").join("ostree-booted");
        if tokio::fs::try_exists(&marker).await.unwrap_or(false) {
            KernelArgsTool::RpmOstree
        } else {
            KernelArgsTool::Grubby
        }
    }

    /// Persists `params` in the host boot configuration.
    pub async fn add_params(&self, params: &[String]) -> Result<(), AgentError> {
        if params.is_empty() {
            return Ok(());
        }
        let tool = self.detect_tool().await;
        let mut args = vec![self.host_root.display().to_string()];
        match tool {
            KernelArgsTool::RpmOstree => {
                args.push("rpm-ostree".to_string());
                args.push("kargs".to_string());
                args.extend(params.iter().map(|p| format!("--append={}", p)));
            }
            KernelArgsTool::Grubby => {
                args.push("grubby".to_string());
                args.push("--update-kernel=ALL".to_string());
                args.push(format!("--args={}", params.join(" ")));
            }
        }

        info!(?tool, ?params, "adding kernel parameters");
        run_checked(self.runner.as_ref(), "chroot", &args).await?;
        Ok(())
    }

    pub async fn reboot(&self) -> Result<(), AgentError> {
        info!("requesting host reboot");
        let args = vec![
            self.host_root.display().to_string(),
            "systemctl".to_string(),
            "reboot".to_string(),
        ];
        run_checked(self.runner.as_ref(), "chroot", &args).await?;
        Ok(())
    }
}
