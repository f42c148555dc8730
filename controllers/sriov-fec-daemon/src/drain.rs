//! Exclusive node access.
//!
//! Hardware reconfiguration runs inside [`ExclusiveAccess::run_exclusive`]:
//! the node is cordoned, optionally drained, the remediation step runs, and
//! the node is uncordoned again unless the step asked to keep it (a reboot
//! is pending and the new kernel parameters aren't live yet).

use crate::error::ControllerError;
use futures::future::BoxFuture;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{EvictParams, ListParams, Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use serde_json::json;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Result of a remediation step.
#[derive(Debug)]
pub enum RemediationOutcome {
    /// Configuration applied
    Completed,
    /// Configuration attempted and failed
    Failed(ControllerError),
    /// Host reboot requested; keep exclusive access across it
    PendingRestart,
}

impl RemediationOutcome {
    /// True if the coordinator must give up exclusive access after this outcome.
    pub fn releases_access(&self) -> bool {
        !matches!(self, Self::PendingRestart)
    }
}

/// Remediation work to run while holding exclusive access.
pub type RemediationStep<'a> = BoxFuture<'a, RemediationOutcome>;

/// Runs a remediation step with exclusive access to the node.
#[async_trait::async_trait]
pub trait ExclusiveAccess: Send + Sync {
    /// Errors are coordination failures only; failures of the step itself
    /// come back as [`RemediationOutcome::Failed`].
    async fn run_exclusive(
        &self,
        should_drain: bool,
        step: RemediationStep<'_>,
    ) -> Result<RemediationOutcome, ControllerError>;
}

const MIRROR_POD_ANNOTATION: &str = "kubernetes.io/config.mirror";
const EVICTION_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Cordons and drains the node through the API server.
pub struct DrainHelper {
    client: Client,
    node_name: String,
    nodes: Api<Node>,
    pods: Api<Pod>,
    drain_timeout: Duration,
}

impl DrainHelper {
    pub fn new(client: Client, node_name: impl Into<String>, drain_timeout: Duration) -> Self {
        Self {
            node_name: node_name.into(),
            nodes: Api::all(client.clone()),
            pods: Api::all(client.clone()),
            client,
            drain_timeout,
        }
    }

    async fn set_unschedulable(&self, unschedulable: bool) -> Result<(), ControllerError> {
        let patch = json!({ "spec": { "unschedulable": unschedulable } });
        self.nodes
            .patch(&self.node_name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| {
                let action = if unschedulable { "cordon" } else { "uncordon" };
                ControllerError::Coordination(format!("failed to {} node {}: {}", action, self.node_name, e))
            })?;
        info!(node = %self.node_name, unschedulable, "updated node schedulability");
        Ok(())
    }

    async fn pods_to_evict(&self) -> Result<Vec<Pod>, ControllerError> {
        let params = ListParams::default().fields(&format!("spec.nodeName={}", self.node_name));
        let pods = self.pods.list(&params).await.map_err(|e| {
            ControllerError::Coordination(format!("failed to list pods on node {}: {}", self.node_name, e))
        })?;
        Ok(pods.items.into_iter().filter(is_evictable).collect())
    }

    async fn drain(&self) -> Result<(), ControllerError> {
        let pods = self.pods_to_evict().await?;
        info!(node = %self.node_name, pods = pods.len(), "draining node");

        for pod in &pods {
            let namespace = pod.namespace().unwrap_or_default();
            let name = pod.name_any();
            let api: Api<Pod> = Api::namespaced(self.client.clone(), &namespace);
            match api.evict(&name, &EvictParams::default()).await {
                Ok(_) => debug!(pod = %name, namespace = %namespace, "evicted pod"),
                Err(kube::Error::Api(ae)) if ae.code == 404 => {}
                Err(e) => {
                    return Err(ControllerError::Coordination(format!(
                        "failed to evict pod {}/{}: {}",
                        namespace, name, e
                    )));
                }
            }
        }

        let deadline = Instant::now() + self.drain_timeout;
        loop {
            let remaining = self.pods_to_evict().await?;
            if remaining.is_empty() {
                info!(node = %self.node_name, "node drained");
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ControllerError::Coordination(format!(
                    "timed out after {}s waiting for {} pod(s) to leave node {}",
                    self.drain_timeout.as_secs(),
                    remaining.len(),
                    self.node_name
                )));
            }
            tokio::time::sleep(EVICTION_POLL_INTERVAL).await;
        }
    }
}

impl std::fmt::Debug for DrainHelper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrainHelper")
            .field("node_name", &self.node_name)
            .field("drain_timeout", &self.drain_timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl ExclusiveAccess for DrainHelper {
    async fn run_exclusive(
        &self,
        should_drain: bool,
        step: RemediationStep<'_>,
    ) -> Result<RemediationOutcome, ControllerError> {
        self.set_unschedulable(true).await?;

        if should_drain {
            if let Err(e) = self.drain().await {
                if let Err(uncordon) = self.set_unschedulable(false).await {
                    warn!(node = %self.node_name, error = %uncordon, "failed to uncordon after drain failure");
                }
                return Err(e);
            }
        } else {
            info!(node = %self.node_name, "drain skipped");
        }

        let outcome = step.await;

        if outcome.releases_access() {
            self.set_unschedulable(false).await?;
        } else {
            info!(node = %self.node_name, "leaving node cordoned until it restarts");
        }
        Ok(outcome)
    }
}

/// Pods a drain has to evict: everything except DaemonSet-managed pods,
/// static (mirror) pods and pods that already finished.
fn is_evictable(pod: &Pod) -> bool {
    let daemonset_owned = pod
        .owner_references()
        .iter()
        .any(|o| o.kind == "DaemonSet" && o.controller == Some(true));
    let mirror = pod.annotations().contains_key(MIRROR_POD_ANNOTATION);
    let finished = pod
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .is_some_and(|phase| phase == "Succeeded" || phase == "Failed");
    !(daemonset_owned || mirror || finished)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::PodStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
    use std::collections::BTreeMap;

    fn pod(name: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_plain_pod_is_evicted() {
        assert!(is_evictable(&pod("web-0")));
    }

    #[test]
    fn test_daemonset_and_mirror_pods_are_kept() {
        let mut ds = pod("sriov-device-plugin-abc");
        ds.metadata.owner_references = Some(vec![OwnerReference {
            api_version: "apps/v1".to_string(),
            kind: "DaemonSet".to_string(),
            name: "sriov-device-plugin".to_string(),
            uid: "uid-1".to_string(),
            controller: Some(true),
            ..Default::default()
        }]);
        assert!(!is_evictable(&ds));

        let mut mirror = pod("kube-apiserver-worker-1");
        mirror.metadata.annotations = Some(BTreeMap::from([(
            MIRROR_POD_ANNOTATION.to_string(),
            "hash".to_string(),
        )]));
        assert!(!is_evictable(&mirror));
    }

    #[test]
    fn test_finished_pods_are_kept() {
        let mut done = pod("job-xyz");
        done.status = Some(PodStatus {
            phase: Some("Succeeded".to_string()),
            ..Default::default()
        });
        assert!(!is_evictable(&done));
    }

    #[test]
    fn test_only_pending_restart_keeps_access() {
        assert!(RemediationOutcome::Completed.releases_access());
        assert!(RemediationOutcome::Failed(ControllerError::Api("x".to_string())).releases_access());
        assert!(!RemediationOutcome::PendingRestart.releases_access());
    }
}
