//! Main controller implementation.
//!
//! Wires the host capabilities, the API clients and the reconciler together
//! and runs the watcher next to the probe/metrics server.

use crate::config::DaemonConfig;
use crate::drain::DrainHelper;
use crate::error::ControllerError;
use crate::metrics::{self, Metrics};
use crate::reconciler::{Reconciler, ReconcilerDeps};
use crate::restarter::WorkloadRestarter;
use crate::status::StatusManager;
use crate::store::{KubeNodeConfigStore, KubePodClient};
use crate::watcher::Watcher;
use crds::SriovFecNodeConfig;
use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client};
use sriov_agent::{
    AcceleratorDiscoveryConfig, CommandRunner, HostCommandRunner, InventoryReader, KernelController,
    NodeConfigurator, SysfsInventoryReader,
};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Node daemon: one watcher plus the probe server.
pub struct Controller {
    watcher: JoinHandle<Result<(), ControllerError>>,
    probe_server: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance and starts its background tasks.
    pub async fn new(config: DaemonConfig) -> Result<Self, ControllerError> {
        info!(node = %config.node_name, "Initializing SR-IOV FEC daemon");

        let discovery = AcceleratorDiscoveryConfig::load(&config.discovery_config_path).map_err(|e| {
            ControllerError::InvalidConfig(format!(
                "failed to load accelerator discovery config {}: {}",
                config.discovery_config_path.display(),
                e
            ))
        })?;
        let discovery = Arc::new(discovery);

        let kube_client = Client::try_default().await?;
        let node_config_api: Api<SriovFecNodeConfig> = Api::namespaced(kube_client.clone(), &config.namespace);
        let pod_api: Api<Pod> = Api::namespaced(kube_client.clone(), &config.namespace);

        // Host capabilities
        let runner: Arc<dyn CommandRunner> = Arc::new(HostCommandRunner);
        let inventory: Arc<dyn InventoryReader> =
            Arc::new(SysfsInventoryReader::new(&config.sysfs_root, discovery));
        let hardware = Arc::new(NodeConfigurator::new(
            KernelController::new(&config.host_root, runner.clone()),
            inventory.clone(),
            runner,
            &config.sysfs_root,
            &config.bbdev_config_dir,
        ));

        let store = Arc::new(KubeNodeConfigStore::new(node_config_api.clone()));
        let metrics = Arc::new(Metrics::new()?);
        let deps = ReconcilerDeps {
            store: store.clone(),
            inventory: inventory.clone(),
            hardware,
            access: Arc::new(DrainHelper::new(kube_client, &config.node_name, config.drain_timeout)),
            restarter: WorkloadRestarter::new(Arc::new(KubePodClient::new(pod_api)), &config.node_name),
            status: StatusManager::new(store, inventory, metrics.clone()),
        };
        let reconciler = Arc::new(Reconciler::new(&config.node_name, &config.namespace, deps));

        // The watch also recreates it on demand; this only saves a pass
        if let Err(e) = reconciler.ensure_node_config().await {
            warn!(node = %config.node_name, error = %e, "failed to create SriovFecNodeConfig at start-up");
        }

        let ready = Arc::new(AtomicBool::new(false));
        let watcher_instance = Watcher::new(reconciler, node_config_api, metrics.clone(), ready.clone());
        let watcher = tokio::spawn(async move { watcher_instance.watch().await });

        let bind_address = config.metrics_bind_address;
        let probe_server = tokio::spawn(async move { metrics::serve(bind_address, metrics, ready).await });

        Ok(Self { watcher, probe_server })
    }

    /// Runs the controller until shutdown.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("SR-IOV FEC daemon running");

        // Both tasks run forever; whichever exits first ends the daemon
        tokio::select! {
            result = &mut self.watcher => {
                result.map_err(|e| ControllerError::Watch(format!("SriovFecNodeConfig watcher panicked: {}", e)))??;
            }
            result = &mut self.probe_server => {
                result.map_err(|e| ControllerError::Watch(format!("probe server panicked: {}", e)))??;
            }
        }

        Ok(())
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller").finish_non_exhaustive()
    }
}
