//! Reconciliation logic for the node's SriovFecNodeConfig.
//!
//! One pass compares the desired accelerator layout with the node and, when
//! a new generation asks for it, reprograms the hardware under exclusive
//! access to the node. Every pass except the placeholder creation and the
//! reboot-pending path ends with exactly one `Configured` condition write
//! describing its result.

use crate::drain::{ExclusiveAccess, RemediationOutcome};
use crate::error::ControllerError;
use crate::restarter::WorkloadRestarter;
use crate::status::StatusManager;
use crate::store::NodeConfigStore;
use crds::{Condition, ConditionStatus, ConfigurationReason, SriovFecNodeConfig, SriovFecNodeConfigSpec};
use sriov_agent::{HardwareConfigurator, InventoryReader};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Periodic resync interval.
pub const RESYNC_PERIOD: Duration = Duration::from_secs(60);

/// Leading text of the `Failed` message written when the inventory read fails.
///
/// Such a condition says nothing about the hardware, so it never settles a
/// generation.
pub const INVENTORY_FAILURE_MESSAGE: &str = "failed to obtain sriov inventory";

/// What the watch loop should do after a successful pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// Reconcile again after the given delay
    After(Duration),
    /// Nothing is scheduled by the pass; the next event or resync drives it
    OnEvent,
}

/// Capabilities the reconciler works with.
pub struct ReconcilerDeps {
    pub store: Arc<dyn NodeConfigStore>,
    pub inventory: Arc<dyn InventoryReader>,
    pub hardware: Arc<dyn HardwareConfigurator>,
    pub access: Arc<dyn ExclusiveAccess>,
    pub restarter: WorkloadRestarter,
    pub status: StatusManager,
}

/// Reconciles the SriovFecNodeConfig named after this node.
pub struct Reconciler {
    node_name: String,
    namespace: String,
    store: Arc<dyn NodeConfigStore>,
    inventory: Arc<dyn InventoryReader>,
    hardware: Arc<dyn HardwareConfigurator>,
    access: Arc<dyn ExclusiveAccess>,
    restarter: WorkloadRestarter,
    status: StatusManager,
}

impl Reconciler {
    pub fn new(node_name: impl Into<String>, namespace: impl Into<String>, deps: ReconcilerDeps) -> Self {
        Self {
            node_name: node_name.into(),
            namespace: namespace.into(),
            store: deps.store,
            inventory: deps.inventory,
            hardware: deps.hardware,
            access: deps.access,
            restarter: deps.restarter,
            status: deps.status,
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Creates the empty resource for this node unless one exists.
    ///
    /// Returns `true` if it was created by this call.
    pub async fn ensure_node_config(&self) -> Result<bool, ControllerError> {
        let placeholder = SriovFecNodeConfig::placeholder(&self.node_name, &self.namespace);
        let created = self.store.create(&placeholder).await?;
        if created {
            info!(node = %self.node_name, namespace = %self.namespace, "created empty SriovFecNodeConfig");
        } else {
            debug!(node = %self.node_name, "SriovFecNodeConfig already exists");
        }
        Ok(created)
    }

    /// Runs one reconciliation pass for the resource `name`.
    pub async fn reconcile(&self, name: &str) -> Result<Requeue, ControllerError> {
        info!(node = %name, "reconciling SriovFecNodeConfig");

        let Some(mut config) = self.store.get(name).await? else {
            info!(node = %name, "SriovFecNodeConfig not found - creating");
            self.ensure_node_config().await?;
            return Ok(Requeue::OnEvent);
        };
        let generation = config.generation();

        let inventory = match self.inventory.read_inventory().await {
            Ok(inventory) => inventory,
            Err(e) => {
                let err = ControllerError::Inventory(e);
                // The current generation was not acted upon; keep the
                // previous observedGeneration so it is still owed a pass
                let observed = config.configured_condition().map_or(0, |c| c.observed_generation);
                self.status
                    .set_status(
                        &mut config,
                        ConditionStatus::False,
                        ConfigurationReason::Failed,
                        &err.to_string(),
                        observed,
                    )
                    .await;
                return Err(err);
            }
        };

        if let Some(condition) = config.configured_condition().cloned() {
            if !inventory.matches(&config.stored_inventory()) {
                info!(node = %name, "inventory changed - refreshing status");
                self.status.write_condition(&mut config, condition).await;
                return Ok(Requeue::After(RESYNC_PERIOD));
            }

            if condition.observed_generation == generation {
                if is_settled(&condition) {
                    debug!(node = %name, generation, reason = %condition.reason, "generation already handled");
                    return Ok(Requeue::After(RESYNC_PERIOD));
                }
                info!(node = %name, generation, reason = %condition.reason, "resuming unfinished configuration");
            } else {
                self.status
                    .set_status(
                        &mut config,
                        ConditionStatus::False,
                        ConfigurationReason::InProgress,
                        "Configuration started",
                        generation,
                    )
                    .await;
            }
        }

        if config.spec.physical_functions.is_empty() {
            info!(node = %name, "nothing to do");
            self.status
                .set_status(
                    &mut config,
                    ConditionStatus::False,
                    ConfigurationReason::NotRequested,
                    "Inventory up to date",
                    generation,
                )
                .await;
            return Ok(Requeue::After(RESYNC_PERIOD));
        }

        let spec = config.spec.clone();
        let should_drain = !spec.drain_skip;
        let outcome = self
            .access
            .run_exclusive(should_drain, Box::pin(self.remediate(&spec)))
            .await;

        match outcome {
            Ok(RemediationOutcome::PendingRestart) => {
                info!(node = %name, "node reboot requested - configuration continues after restart");
                Ok(Requeue::OnEvent)
            }
            Err(e) => {
                error!(node = %name, error = %e, "exclusive access failed");
                self.status
                    .set_status(
                        &mut config,
                        ConditionStatus::False,
                        ConfigurationReason::Unknown,
                        &e.to_string(),
                        generation,
                    )
                    .await;
                Err(e)
            }
            Ok(RemediationOutcome::Failed(e)) => {
                error!(node = %name, error = %e, "configuration failed");
                self.status
                    .set_status(
                        &mut config,
                        ConditionStatus::False,
                        ConfigurationReason::Failed,
                        &e.to_string(),
                        generation,
                    )
                    .await;
                Err(e)
            }
            Ok(RemediationOutcome::Completed) => match self.store.get(name).await {
                Ok(Some(mut current)) => {
                    self.status
                        .set_status(
                            &mut current,
                            ConditionStatus::True,
                            ConfigurationReason::Succeeded,
                            "Configured successfully",
                            generation,
                        )
                        .await;
                    info!(node = %name, generation, "reconciled");
                    Ok(Requeue::After(RESYNC_PERIOD))
                }
                Ok(None) => {
                    warn!(node = %name, "SriovFecNodeConfig deleted during configuration");
                    Err(ControllerError::ResourceGone(name.to_string()))
                }
                Err(e) => {
                    error!(node = %name, error = %e, "failed to re-fetch SriovFecNodeConfig");
                    self.status
                        .set_status(
                            &mut config,
                            ConditionStatus::False,
                            ConfigurationReason::Unknown,
                            &e.to_string(),
                            generation,
                        )
                        .await;
                    Err(e)
                }
            },
        }
    }

    /// Hardware work run while holding exclusive access.
    async fn remediate(&self, spec: &SriovFecNodeConfigSpec) -> RemediationOutcome {
        let missing = match self.hardware.missing_kernel_params().await {
            Ok(missing) => missing,
            Err(e) => return RemediationOutcome::Failed(ControllerError::KernelParams(e)),
        };

        if missing {
            info!(node = %self.node_name, "missing kernel parameters - installing");
            if let Err(e) = self.hardware.install_kernel_params().await {
                return RemediationOutcome::Failed(ControllerError::KernelParams(e));
            }
            if let Err(e) = self.hardware.request_reboot().await {
                return RemediationOutcome::Failed(ControllerError::Reboot(e));
            }
            return RemediationOutcome::PendingRestart;
        }

        if let Err(e) = self.hardware.apply_config(spec).await {
            return RemediationOutcome::Failed(ControllerError::ApplyConfig(e));
        }
        info!(node = %self.node_name, pfs = spec.physical_functions.len(), "applied PF/VF configuration");

        match self.restarter.restart().await {
            Ok(restarted) => {
                debug!(node = %self.node_name, restarted, "device plugin restarted");
                RemediationOutcome::Completed
            }
            Err(e) => RemediationOutcome::Failed(e),
        }
    }
}

/// Whether `condition` finishes the work for its observedGeneration.
///
/// Reasons written by someone else count as settled.
fn is_settled(condition: &Condition) -> bool {
    match condition.configuration_reason() {
        Some(ConfigurationReason::Failed) => !condition.message.starts_with(INVENTORY_FAILURE_MESSAGE),
        Some(reason) => reason.is_settled(),
        None => true,
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("node_name", &self.node_name)
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for ReconcilerDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconcilerDeps").finish_non_exhaustive()
    }
}
