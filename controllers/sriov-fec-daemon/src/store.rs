//! Kubernetes API access used by the reconciler.
//!
//! The reconciler talks to the API server only through [`NodeConfigStore`]
//! and [`PodClient`], so tests can run against in-memory implementations.

use crate::error::ControllerError;
use crds::{SriovFecNodeConfig, SriovFecNodeConfigStatus};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::Api;
use serde_json::json;
use tracing::debug;

/// Reads and writes SriovFecNodeConfig resources in the daemon's namespace.
#[async_trait::async_trait]
pub trait NodeConfigStore: Send + Sync {
    /// Fetches a resource; `Ok(None)` when it doesn't exist.
    async fn get(&self, name: &str) -> Result<Option<SriovFecNodeConfig>, ControllerError>;

    /// Creates a resource. Returns `false` if it already existed.
    async fn create(&self, config: &SriovFecNodeConfig) -> Result<bool, ControllerError>;

    /// Replaces the status subresource without touching the spec.
    async fn patch_status(&self, name: &str, status: &SriovFecNodeConfigStatus) -> Result<(), ControllerError>;
}

/// Lists and deletes pods in the daemon's namespace.
#[async_trait::async_trait]
pub trait PodClient: Send + Sync {
    async fn list(&self, label_selector: &str) -> Result<Vec<Pod>, ControllerError>;

    async fn delete(&self, name: &str) -> Result<(), ControllerError>;
}

/// [`NodeConfigStore`] backed by the API server.
#[derive(Clone)]
pub struct KubeNodeConfigStore {
    api: Api<SriovFecNodeConfig>,
}

impl KubeNodeConfigStore {
    pub fn new(api: Api<SriovFecNodeConfig>) -> Self {
        Self { api }
    }
}

#[async_trait::async_trait]
impl NodeConfigStore for KubeNodeConfigStore {
    async fn get(&self, name: &str) -> Result<Option<SriovFecNodeConfig>, ControllerError> {
        Ok(self.api.get_opt(name).await?)
    }

    async fn create(&self, config: &SriovFecNodeConfig) -> Result<bool, ControllerError> {
        match self.api.create(&PostParams::default(), config).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn patch_status(&self, name: &str, status: &SriovFecNodeConfigStatus) -> Result<(), ControllerError> {
        // Merge patch replaces lists wholesale, so the single Configured
        // condition never ends up duplicated server-side
        let patch = json!({ "status": status });
        self.api
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        debug!(name, "patched SriovFecNodeConfig status");
        Ok(())
    }
}

/// [`PodClient`] backed by the API server.
#[derive(Clone)]
pub struct KubePodClient {
    api: Api<Pod>,
}

impl KubePodClient {
    pub fn new(api: Api<Pod>) -> Self {
        Self { api }
    }
}

#[async_trait::async_trait]
impl PodClient for KubePodClient {
    async fn list(&self, label_selector: &str) -> Result<Vec<Pod>, ControllerError> {
        let pods = self.api.list(&ListParams::default().labels(label_selector)).await?;
        Ok(pods.items)
    }

    async fn delete(&self, name: &str) -> Result<(), ControllerError> {
        self.api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }
}
