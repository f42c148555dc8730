//! Device plugin restart.
//!
//! The SR-IOV device plugin only discovers VFs at start-up, so after the
//! accelerators are reprogrammed its pod on this node is deleted and the
//! DaemonSet brings up a fresh one.

use crate::error::ControllerError;
use crate::store::PodClient;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::info;

/// Label selector of the device plugin DaemonSet pods.
pub const DEVICE_PLUGIN_SELECTOR: &str = "app=sriov-device-plugin-daemonset";

/// Deletes the dependent workload's pods scheduled on this node.
pub struct WorkloadRestarter {
    pods: Arc<dyn PodClient>,
    node_name: String,
    label_selector: String,
}

impl WorkloadRestarter {
    pub fn new(pods: Arc<dyn PodClient>, node_name: impl Into<String>) -> Self {
        Self {
            pods,
            node_name: node_name.into(),
            label_selector: DEVICE_PLUGIN_SELECTOR.to_string(),
        }
    }

    fn on_this_node(&self, pod: &Pod) -> bool {
        pod.spec.as_ref().and_then(|s| s.node_name.as_deref()) == Some(self.node_name.as_str())
    }

    /// Deletes every matching pod on this node once; returns how many.
    ///
    /// No matching pod is an error: the plugin is expected to run wherever
    /// accelerators get configured.
    pub async fn restart(&self) -> Result<usize, ControllerError> {
        let pods: Vec<Pod> = self
            .pods
            .list(&self.label_selector)
            .await?
            .into_iter()
            .filter(|p| self.on_this_node(p))
            .collect();

        if pods.is_empty() {
            return Err(ControllerError::DependentWorkloadMissing(format!(
                "no pods matching {} found on node {}",
                self.label_selector, self.node_name
            )));
        }

        for pod in &pods {
            let name = pod.name_any();
            self.pods
                .delete(&name)
                .await
                .map_err(|e| ControllerError::PodDeletion {
                    pod: name.clone(),
                    source: Box::new(e),
                })?;
            info!(pod = %name, node = %self.node_name, "deleted device plugin pod");
        }
        Ok(pods.len())
    }
}

impl std::fmt::Debug for WorkloadRestarter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkloadRestarter")
            .field("node_name", &self.node_name)
            .field("label_selector", &self.label_selector)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;

    #[tokio::test]
    async fn test_deletes_only_pods_on_this_node() {
        let pods = Arc::new(InMemoryPodClient::new());
        pods.add(device_plugin_pod("plugin-a", "worker-1"));
        pods.add(device_plugin_pod("plugin-b", "worker-2"));
        let restarter = WorkloadRestarter::new(pods.clone(), "worker-1");

        assert_eq!(restarter.restart().await.unwrap(), 1);
        assert_eq!(pods.deleted(), vec!["plugin-a".to_string()]);
        assert_eq!(pods.selectors(), vec![DEVICE_PLUGIN_SELECTOR.to_string()]);
    }

    #[tokio::test]
    async fn test_no_pods_on_node_is_an_error() {
        let pods = Arc::new(InMemoryPodClient::new());
        pods.add(device_plugin_pod("plugin-b", "worker-2"));
        let restarter = WorkloadRestarter::new(pods.clone(), "worker-1");

        let err = restarter.restart().await.unwrap_err();
        assert!(matches!(err, ControllerError::DependentWorkloadMissing(_)));
        assert!(pods.deleted().is_empty());
    }

    #[tokio::test]
    async fn test_delete_failure_aborts() {
        let pods = Arc::new(InMemoryPodClient::new());
        pods.add(device_plugin_pod("plugin-a", "worker-1"));
        pods.add(device_plugin_pod("plugin-c", "worker-1"));
        pods.fail_deletes("forbidden");
        let restarter = WorkloadRestarter::new(pods.clone(), "worker-1");

        let err = restarter.restart().await.unwrap_err();
        match err {
            ControllerError::PodDeletion { pod, source } => {
                assert_eq!(pod, "plugin-a");
                assert!(source.to_string().contains("forbidden"));
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(pods.delete_attempts(), 1);
    }
}
