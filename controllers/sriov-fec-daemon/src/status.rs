//! Status condition manager.
//!
//! Owns every write to the SriovFecNodeConfig status subresource. Each write
//! carries a freshly read inventory and exactly one `Configured` condition.
//! Write failures are logged and counted, never returned: the next
//! reconciliation rewrites the status anyway.

use crate::metrics::Metrics;
use crate::store::NodeConfigStore;
use crds::{
    Condition, ConditionStatus, ConfigurationReason, InventorySnapshot, SriovFecNodeConfig,
    SriovFecNodeConfigStatus,
};
use kube::ResourceExt;
use sriov_agent::InventoryReader;
use std::sync::Arc;
use tracing::{debug, error};

/// Builds and persists the `Configured` condition.
pub struct StatusManager {
    store: Arc<dyn NodeConfigStore>,
    inventory: Arc<dyn InventoryReader>,
    metrics: Arc<Metrics>,
}

impl StatusManager {
    pub fn new(store: Arc<dyn NodeConfigStore>, inventory: Arc<dyn InventoryReader>, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            inventory,
            metrics,
        }
    }

    /// Sets the `Configured` condition on `config` and persists its status.
    ///
    /// `config.status` is updated in place so later writes in the same pass
    /// start from what was just written.
    pub async fn set_status(
        &self,
        config: &mut SriovFecNodeConfig,
        status: ConditionStatus,
        reason: ConfigurationReason,
        message: &str,
        observed_generation: i64,
    ) {
        let condition = Condition::configured(status, reason, message, observed_generation);
        self.write_condition(config, condition).await;
    }

    /// Upserts `condition` by type and persists the status.
    pub async fn write_condition(&self, config: &mut SriovFecNodeConfig, condition: Condition) {
        let name = config.name_any();
        let inventory = self.fresh_inventory(&condition).await;

        let mut conditions = config
            .status
            .as_ref()
            .map(SriovFecNodeConfigStatus::condition_set)
            .unwrap_or_default();
        let reason = condition.reason.clone();
        let message = condition.message.clone();
        conditions.upsert(condition);

        let status = SriovFecNodeConfigStatus {
            inventory,
            conditions: conditions.into_list(),
        };

        match self.store.patch_status(&name, &status).await {
            Ok(()) => debug!(node = %name, reason = %reason, message = %message, "status updated"),
            Err(e) => {
                self.metrics.status_write_failed();
                error!(
                    node = %name,
                    reason = %reason,
                    message = %message,
                    error = %e,
                    "failed to update SriovFecNodeConfig status"
                );
            }
        }
        config.status = Some(status);
    }

    async fn fresh_inventory(&self, condition: &Condition) -> InventorySnapshot {
        match self.inventory.read_inventory().await {
            Ok(inventory) => inventory,
            Err(e) => {
                error!(
                    reason = %condition.reason,
                    message = %condition.message,
                    error = %e,
                    "failed to obtain sriov inventory for the node"
                );
                InventorySnapshot::default()
            }
        }
    }
}

impl std::fmt::Debug for StatusManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusManager").finish_non_exhaustive()
    }
}
