//! Controller-specific error types.
//!
//! Every variant maps onto one [`ErrorClass`], which decides how the failure
//! is reported (condition reason, metrics label) and whether it is expected
//! to heal on its own.

use kube::Error as KubeError;
use sriov_agent::AgentError;
use thiserror::Error;

/// Errors that can occur in the SR-IOV FEC node daemon.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// API request failed outside of the kube client (e.g. a test store)
    #[error("API request failed: {0}")]
    Api(String),

    /// Accelerator inventory could not be read
    #[error("failed to obtain sriov inventory for the node: {0}")]
    Inventory(#[source] AgentError),

    /// Resource disappeared while it was being reconciled
    #[error("SriovFecNodeConfig {0} no longer exists")]
    ResourceGone(String),

    /// Checking or installing kernel parameters failed
    #[error("kernel parameters: {0}")]
    KernelParams(#[source] AgentError),

    /// Host refused the reboot request
    #[error("failed to request a node reboot: {0}")]
    Reboot(#[source] AgentError),

    /// Programming PFs/VFs failed
    #[error("failed applying new PF/VF configuration: {0}")]
    ApplyConfig(#[source] AgentError),

    /// Cordon, drain or uncordon failed
    #[error("drain helper: {0}")]
    Coordination(String),

    /// The device plugin has no pod on this node
    #[error("dependent workload missing: {0}")]
    DependentWorkloadMissing(String),

    /// Deleting a device plugin pod failed
    #[error("failed to delete pod {pod}: {source}")]
    PodDeletion {
        pod: String,
        #[source]
        source: Box<ControllerError>,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Metrics registry or probe server failure
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Failure taxonomy used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// API or inventory reads; heals through retry or resync
    TransientInfra,
    /// Kernel parameters or device programming; needs an operator
    ConfigurationFailure,
    /// Exclusive access (cordon/drain) could not be obtained or released
    CoordinationFailure,
    /// A workload this daemon depends on is absent
    UpstreamMissing,
}

impl ErrorClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TransientInfra => "transient_infra",
            Self::ConfigurationFailure => "configuration_failure",
            Self::CoordinationFailure => "coordination_failure",
            Self::UpstreamMissing => "upstream_missing",
        }
    }
}

impl ControllerError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Kube(_)
            | Self::Api(_)
            | Self::Inventory(_)
            | Self::ResourceGone(_)
            | Self::Watch(_)
            | Self::Metrics(_) => ErrorClass::TransientInfra,
            Self::KernelParams(_)
            | Self::Reboot(_)
            | Self::ApplyConfig(_)
            | Self::InvalidConfig(_)
            | Self::PodDeletion { .. } => ErrorClass::ConfigurationFailure,
            Self::Coordination(_) => ErrorClass::CoordinationFailure,
            Self::DependentWorkloadMissing(_) => ErrorClass::UpstreamMissing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent_error() -> AgentError {
        AgentError::DeviceNotFound("0000:af:00.0".to_string())
    }

    #[test]
    fn test_error_classes() {
        assert_eq!(ControllerError::Inventory(agent_error()).class(), ErrorClass::TransientInfra);
        assert_eq!(ControllerError::ApplyConfig(agent_error()).class(), ErrorClass::ConfigurationFailure);
        assert_eq!(ControllerError::KernelParams(agent_error()).class(), ErrorClass::ConfigurationFailure);
        assert_eq!(
            ControllerError::Coordination("cordon failed".to_string()).class(),
            ErrorClass::CoordinationFailure
        );
        assert_eq!(
            ControllerError::DependentWorkloadMissing("no pods".to_string()).class(),
            ErrorClass::UpstreamMissing
        );
    }

    #[test]
    fn test_pod_deletion_keeps_cause() {
        let err = ControllerError::PodDeletion {
            pod: "sriov-device-plugin-abcde".to_string(),
            source: Box::new(ControllerError::Api("connection reset".to_string())),
        };
        assert_eq!(
            err.to_string(),
            "failed to delete pod sriov-device-plugin-abcde: API request failed: connection reset"
        );
        assert_eq!(err.class(), ErrorClass::ConfigurationFailure);
    }
}
