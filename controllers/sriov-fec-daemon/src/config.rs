//! Daemon configuration.
//!
//! Read once from environment variables at start-up.

use crate::error::ControllerError;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

const DEFAULT_NAMESPACE: &str = "vran-acceleration-operators";
const DEFAULT_DISCOVERY_CONFIG: &str = "/sriov_config/config/accelerators.json";
const DEFAULT_HOST_ROOT: &str = "/host";
const DEFAULT_SYSFS_ROOT: &str = "/sys";
const DEFAULT_BBDEV_CONFIG_DIR: &str = "/sriov_workdir/bbdev";
const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 90;
const DEFAULT_METRICS_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Runtime configuration of the node daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    /// Node this daemon runs on; also the name of its SriovFecNodeConfig
    pub node_name: String,
    /// Namespace of the SriovFecNodeConfig and device plugin pods
    pub namespace: String,
    pub discovery_config_path: PathBuf,
    /// Host filesystem mount used for `chroot` commands
    pub host_root: PathBuf,
    pub sysfs_root: PathBuf,
    /// Where rendered `pf_bb_config` files are written
    pub bbdev_config_dir: PathBuf,
    /// Upper bound for evicted pods to terminate
    pub drain_timeout: Duration,
    pub metrics_bind_address: SocketAddr,
}

impl DaemonConfig {
    /// Loads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the configuration through `lookup` (tests pass a map).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let node_name = var("NODENAME").ok_or_else(|| {
            ControllerError::InvalidConfig("NODENAME environment variable is required".to_string())
        })?;

        let drain_timeout = match var("SRIOV_DRAIN_TIMEOUT_SECS") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|e| {
                ControllerError::InvalidConfig(format!(
                    "SRIOV_DRAIN_TIMEOUT_SECS must be a number of seconds, got {:?}: {}",
                    raw, e
                ))
            })?,
            None => DEFAULT_DRAIN_TIMEOUT_SECS,
        };

        let bind = var("METRICS_BIND_ADDRESS").unwrap_or_else(|| DEFAULT_METRICS_BIND_ADDRESS.to_string());
        let metrics_bind_address = bind.parse().map_err(|e| {
            ControllerError::InvalidConfig(format!("METRICS_BIND_ADDRESS {:?} is invalid: {}", bind, e))
        })?;

        let path = |key: &str, default: &str| PathBuf::from(var(key).unwrap_or_else(|| default.to_string()));

        Ok(Self {
            node_name,
            namespace: var("NAMESPACE").unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            discovery_config_path: path("SRIOV_DISCOVERY_CONFIG", DEFAULT_DISCOVERY_CONFIG),
            host_root: path("SRIOV_HOST_ROOT", DEFAULT_HOST_ROOT),
            sysfs_root: path("SRIOV_SYSFS_ROOT", DEFAULT_SYSFS_ROOT),
            bbdev_config_dir: path("SRIOV_BBDEV_CONFIG_DIR", DEFAULT_BBDEV_CONFIG_DIR),
            drain_timeout: Duration::from_secs(drain_timeout),
            metrics_bind_address,
        })
    }

    pub fn log(&self) {
        info!("Configuration:");
        info!("  Node: {}", self.node_name);
        info!("  Namespace: {}", self.namespace);
        info!("  Discovery config: {}", self.discovery_config_path.display());
        info!("  Host root: {}", self.host_root.display());
        info!("  Sysfs root: {}", self.sysfs_root.display());
        info!("  BBDev config dir: {}", self.bbdev_config_dir.display());
        info!("  Drain timeout: {}s", self.drain_timeout.as_secs());
        info!("  Metrics/probes: {}", self.metrics_bind_address);
    }
}
