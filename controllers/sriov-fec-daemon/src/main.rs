//! SR-IOV FEC Node Daemon
//!
//! Runs on every node with FEC accelerators and reconciles the node's
//! `SriovFecNodeConfig`:
//! - programs PFs and VFs (driver binding, VF count, `pf_bb_config`)
//! - installs the IOMMU kernel parameters and reboots when they are missing
//! - restarts the SR-IOV device plugin so it picks up the new VFs
//! - reports the accelerator inventory and a `Configured` condition in status

mod backoff;
mod config;
mod controller;
mod drain;
mod error;
mod metrics;
mod predicate;
mod reconciler;
mod restarter;
mod status;
mod store;
mod watcher;
#[cfg(test)]
mod test_utils;

use crate::config::DaemonConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // kube's rustls-tls needs a process-wide crypto provider; an error only
    // means one is already installed
    let _ = rustls::crypto::ring::default_provider().install_default();

    info!("Starting SR-IOV FEC daemon");

    let config = DaemonConfig::from_env()?;
    config.log();

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
