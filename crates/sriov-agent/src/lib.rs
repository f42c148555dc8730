//! SR-IOV accelerator host agent
//!
//! Host-side capabilities used by the SR-IOV FEC node daemon:
//!
//! - **Discovery**: which PCI devices count as accelerators (`accelerators.json`)
//! - **Inventory**: sysfs scan of accelerator PFs and their VFs
//! - **Kernel parameters**: IOMMU boot arguments, installed via `rpm-ostree` or `grubby`
//! - **Device programming**: PF/VF driver binding, VF creation, `pf_bb_config`
//!
//! The reconciler only sees the [`InventoryReader`] and [`HardwareConfigurator`]
//! traits; enable the `test-util` feature for in-memory mocks.

pub mod bbdev;
pub mod command;
pub mod configurator;
pub mod discovery;
pub mod error;
pub mod inventory;
pub mod kernel;
#[path = "trait.rs"]
pub mod agent_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use agent_trait::{HardwareConfigurator, InventoryReader};
pub use command::{CommandOutput, CommandRunner, HostCommandRunner};
pub use configurator::NodeConfigurator;
pub use discovery::AcceleratorDiscoveryConfig;
pub use error::AgentError;
pub use inventory::SysfsInventoryReader;
pub use kernel::{KernelArgsTool, KernelController, REQUIRED_KERNEL_PARAMS};
#[cfg(any(test, feature = "test-util"))]
pub use mock::{HardwareCall, MockCommandRunner, MockHardwareConfigurator, MockInventoryReader};
