//! Test utilities for unit testing the reconciler
//!
//! In-memory stand-ins for the API server and the node coordinator, plus
//! builders for the resources the tests pass around.

use crate::drain::{ExclusiveAccess, RemediationOutcome, RemediationStep};
use crate::error::ControllerError;
use crate::restarter::DEVICE_PLUGIN_SELECTOR;
use crate::store::{NodeConfigStore, PodClient};
use crds::{
    InventorySnapshot, PhysicalFunctionConfig, SriovAccelerator, SriovFecNodeConfig, SriovFecNodeConfigSpec,
    SriovFecNodeConfigStatus, VirtualFunction,
};
use k8s_openapi::api::core::v1::{Pod, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

pub const TEST_NAMESPACE: &str = "vran-acceleration-operators";
pub const TEST_PF: &str = "0000:af:00.0";

/// Helper to create a SriovFecNodeConfig with a given generation
pub fn node_config(name: &str, generation: i64, physical_functions: Vec<PhysicalFunctionConfig>) -> SriovFecNodeConfig {
    SriovFecNodeConfig {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            generation: Some(generation),
            ..Default::default()
        },
        spec: SriovFecNodeConfigSpec {
            physical_functions,
            drain_skip: false,
        },
        status: None,
    }
}

/// Helper to create a PF entry with two vfio-pci VFs
pub fn physical_function(pci_address: &str) -> PhysicalFunctionConfig {
    PhysicalFunctionConfig {
        pci_address: pci_address.to_string(),
        pf_driver: "pci-pf-stub".to_string(),
        vf_driver: "vfio-pci".to_string(),
        vf_amount: 2,
        bb_dev_config: None,
    }
}

/// One ACC100 at [`TEST_PF`] with `vfs` VFs bound to vfio-pci
pub fn accelerator_inventory(vfs: usize) -> InventorySnapshot {
    let virtual_functions = (0..vfs)
        .map(|i| VirtualFunction {
            pci_address: format!("0000:b0:00.{}", i),
            driver: "vfio-pci".to_string(),
            device_id: "0d5d".to_string(),
        })
        .collect();
    InventorySnapshot {
        sriov_accelerators: vec![SriovAccelerator {
            vendor_id: "8086".to_string(),
            device_id: "0d5c".to_string(),
            pci_address: TEST_PF.to_string(),
            driver: "pci-pf-stub".to_string(),
            max_virtual_functions: 16,
            virtual_functions,
        }],
    }
}

/// Helper to create a device plugin pod scheduled on `node`
pub fn device_plugin_pod(name: &str, node: &str) -> Pod {
    let (key, value) = DEVICE_PLUGIN_SELECTOR.split_once('=').unwrap_or_default();
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            labels: Some(BTreeMap::from([(key.to_string(), value.to_string())])),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: Some(node.to_string()),
            ..Default::default()
        }),
        status: None,
    }
}

/// In-memory [`NodeConfigStore`]
///
/// Mimics the API server closely enough for the reconciler: `create`
/// assigns generation 1, spec updates bump the generation and status
/// patches leave it alone.
#[derive(Debug, Default)]
pub struct InMemoryNodeConfigStore {
    objects: Mutex<HashMap<String, SriovFecNodeConfig>>,
    creates: AtomicUsize,
    gets: AtomicUsize,
    status_writes: Mutex<Vec<SriovFecNodeConfigStatus>>,
    status_write_error: Mutex<Option<String>>,
    get_failures: Mutex<HashMap<usize, String>>,
    vanish_on_get: Mutex<Option<usize>>,
}

impl InMemoryNodeConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `config` as-is and returns it.
    pub fn insert(&self, config: SriovFecNodeConfig) -> SriovFecNodeConfig {
        self.objects
            .lock()
            .unwrap()
            .insert(config.name_any(), config.clone());
        config
    }

    /// Replaces the spec and bumps the generation, like a user edit.
    pub fn update_spec(&self, name: &str, spec: SriovFecNodeConfigSpec) -> SriovFecNodeConfig {
        let mut objects = self.objects.lock().unwrap();
        let config = objects.get_mut(name).unwrap();
        config.spec = spec;
        config.metadata.generation = Some(config.generation() + 1);
        config.clone()
    }

    /// Deletes `name`, like `kubectl delete`.
    pub fn remove(&self, name: &str) {
        self.objects.lock().unwrap().remove(name);
    }

    pub fn get_now(&self, name: &str) -> Option<SriovFecNodeConfig> {
        self.objects.lock().unwrap().get(name).cloned()
    }

    pub fn status(&self, name: &str) -> Option<SriovFecNodeConfigStatus> {
        self.get_now(name).and_then(|c| c.status)
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    /// Every status successfully written, in order.
    pub fn status_writes(&self) -> Vec<SriovFecNodeConfigStatus> {
        self.status_writes.lock().unwrap().clone()
    }

    /// Reasons of the `Configured` condition of every status written.
    pub fn written_reasons(&self) -> Vec<String> {
        self.status_writes()
            .iter()
            .filter_map(|s| s.conditions.first().map(|c| c.reason.clone()))
            .collect()
    }

    /// Makes every status patch fail with `message`.
    pub fn fail_status_writes(&self, message: impl Into<String>) {
        *self.status_write_error.lock().unwrap() = Some(message.into());
    }

    /// Makes the `call`-th get (0-based, counted over the store's lifetime) fail.
    pub fn fail_get_call(&self, call: usize, message: impl Into<String>) {
        self.get_failures.lock().unwrap().insert(call, message.into());
    }

    /// Deletes the requested object right before the `call`-th get is served.
    pub fn vanish_on_get_call(&self, call: usize) {
        *self.vanish_on_get.lock().unwrap() = Some(call);
    }
}

#[async_trait::async_trait]
impl NodeConfigStore for InMemoryNodeConfigStore {
    async fn get(&self, name: &str) -> Result<Option<SriovFecNodeConfig>, ControllerError> {
        let call = self.gets.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.get_failures.lock().unwrap().remove(&call) {
            return Err(ControllerError::Api(message));
        }
        if *self.vanish_on_get.lock().unwrap() == Some(call) {
            self.remove(name);
        }
        Ok(self.get_now(name))
    }

    async fn create(&self, config: &SriovFecNodeConfig) -> Result<bool, ControllerError> {
        let mut objects = self.objects.lock().unwrap();
        let name = config.name_any();
        if objects.contains_key(&name) {
            return Ok(false);
        }
        let mut created = config.clone();
        created.metadata.generation = Some(1);
        objects.insert(name, created);
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn patch_status(&self, name: &str, status: &SriovFecNodeConfigStatus) -> Result<(), ControllerError> {
        if let Some(message) = self.status_write_error.lock().unwrap().as_ref() {
            return Err(ControllerError::Api(message.clone()));
        }
        let mut objects = self.objects.lock().unwrap();
        let config = objects
            .get_mut(name)
            .ok_or_else(|| ControllerError::Api(format!("sriovfecnodeconfigs \"{}\" not found", name)))?;
        config.status = Some(status.clone());
        self.status_writes.lock().unwrap().push(status.clone());
        Ok(())
    }
}

/// In-memory [`PodClient`]
#[derive(Debug, Default)]
pub struct InMemoryPodClient {
    pods: Mutex<Vec<Pod>>,
    selectors: Mutex<Vec<String>>,
    deleted: Mutex<Vec<String>>,
    delete_attempts: AtomicUsize,
    delete_error: Mutex<Option<String>>,
}

impl InMemoryPodClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, pod: Pod) {
        self.pods.lock().unwrap().push(pod);
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    /// Label selectors passed to `list`, in order.
    pub fn selectors(&self) -> Vec<String> {
        self.selectors.lock().unwrap().clone()
    }

    pub fn delete_attempts(&self) -> usize {
        self.delete_attempts.load(Ordering::SeqCst)
    }

    pub fn fail_deletes(&self, message: impl Into<String>) {
        *self.delete_error.lock().unwrap() = Some(message.into());
    }
}

fn matches_selector(pod: &Pod, selector: &str) -> bool {
    let labels = pod.labels();
    selector
        .split(',')
        .filter_map(|term| term.split_once('='))
        .all(|(k, v)| labels.get(k.trim()).map(String::as_str) == Some(v.trim()))
}

#[async_trait::async_trait]
impl PodClient for InMemoryPodClient {
    async fn list(&self, label_selector: &str) -> Result<Vec<Pod>, ControllerError> {
        self.selectors.lock().unwrap().push(label_selector.to_string());
        Ok(self
            .pods
            .lock()
            .unwrap()
            .iter()
            .filter(|p| matches_selector(p, label_selector))
            .cloned()
            .collect())
    }

    async fn delete(&self, name: &str) -> Result<(), ControllerError> {
        self.delete_attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.delete_error.lock().unwrap().as_ref() {
            return Err(ControllerError::Api(message.clone()));
        }
        self.pods.lock().unwrap().retain(|p| p.name_any() != name);
        self.deleted.lock().unwrap().push(name.to_string());
        Ok(())
    }
}

/// [`ExclusiveAccess`] that only tracks whether access is held
///
/// Access is taken before the step runs and given back afterwards unless
/// the step asked to keep it.
#[derive(Debug, Default)]
pub struct MockExclusiveAccess {
    held: AtomicBool,
    drains: Mutex<Vec<bool>>,
    error: Mutex<Option<String>>,
}

impl MockExclusiveAccess {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    /// `should_drain` of every run, in order.
    pub fn runs(&self) -> Vec<bool> {
        self.drains.lock().unwrap().clone()
    }

    /// Makes acquiring access fail; the step never runs.
    pub fn fail(&self, message: impl Into<String>) {
        *self.error.lock().unwrap() = Some(message.into());
    }
}

#[async_trait::async_trait]
impl ExclusiveAccess for MockExclusiveAccess {
    async fn run_exclusive(
        &self,
        should_drain: bool,
        step: RemediationStep<'_>,
    ) -> Result<RemediationOutcome, ControllerError> {
        self.drains.lock().unwrap().push(should_drain);
        if let Some(message) = self.error.lock().unwrap().clone() {
            return Err(ControllerError::Coordination(message));
        }
        self.held.store(true, Ordering::SeqCst);
        let outcome = step.await;
        if outcome.releases_access() {
            self.held.store(false, Ordering::SeqCst);
        }
        Ok(outcome)
    }
}
