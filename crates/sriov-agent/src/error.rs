//! Host agent errors

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while reading or programming accelerator hardware
#[derive(Debug, Error)]
pub enum AgentError {
    /// Filesystem error at a specific path
    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Discovery configuration is unusable
    #[error("Invalid discovery config: {0}")]
    DiscoveryConfig(String),

    /// A host command could not be spawned or exited non-zero
    #[error("Command `{command}` failed: {message}")]
    Command { command: String, message: String },

    /// Requested configuration is not valid for this node
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Referenced PCI device is not an accelerator on this node
    #[error("Device not found: {0}")]
    DeviceNotFound(String),
}

impl AgentError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
