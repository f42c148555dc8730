//! Capability traits consumed by the reconciler
//!
//! Concrete implementations live in this crate; tests use the mocks from
//! `mock` (feature `test-util`). All methods must be `Send` to run on
//! Tokio's work-stealing runtime.

use crate::error::AgentError;
use crds::{InventorySnapshot, SriovFecNodeConfigSpec};

/// Reads the accelerator inventory of the local node.
#[async_trait::async_trait]
pub trait InventoryReader: Send + Sync {
    async fn read_inventory(&self) -> Result<InventorySnapshot, AgentError>;
}

/// Applies host-level configuration.
#[async_trait::async_trait]
pub trait HardwareConfigurator: Send + Sync {
    /// True if any required kernel boot parameter is absent from the running kernel
    async fn missing_kernel_params(&self) -> Result<bool, AgentError>;

    /// Adds the missing boot parameters; they take effect after a reboot
    async fn install_kernel_params(&self) -> Result<(), AgentError>;

    /// Asks the host to reboot
    async fn request_reboot(&self) -> Result<(), AgentError>;

    /// Programs PFs and VFs to match the spec
    async fn apply_config(&self, spec: &SriovFecNodeConfigSpec) -> Result<(), AgentError>;
}
