//! Error types for packsync-kube

use thiserror::Error;

use crate::verify::VerifyError;

/// Result type for packsync-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors that can occur while managing and reconciling releases
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Release not found
    #[error("release '{name}' not found in namespace '{namespace}'")]
    ReleaseNotFound { name: String, namespace: String },

    /// Release already exists
    #[error("release '{name}' already exists in namespace '{namespace}'")]
    ReleaseAlreadyExists { name: String, namespace: String },

    /// Another operation is in progress
    #[error("another operation is in progress for release '{name}': {status}")]
    OperationInProgress { name: String, status: String },

    /// Hook execution failed
    #[error("hook '{hook_name}' failed during {phase}: {message}")]
    HookFailed {
        hook_name: String,
        phase: String,
        message: String,
    },

    /// One or more test hooks failed
    #[error("test hooks failed for release '{name}': {}", .hooks.join(", "))]
    TestFailed { name: String, hooks: Vec<String> },

    /// Rollback not possible
    #[error("cannot rollback release '{name}': {reason}")]
    RollbackNotPossible { name: String, reason: String },

    /// Storage error
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Pack or values error
    #[error("pack error: {0}")]
    Pack(String),

    /// Cluster apply/delete error reported by the executor
    #[error("cluster operation failed: {0}")]
    Cluster(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Timeout
    #[error("operation timed out after {0}")]
    Timeout(String),

    /// The surrounding context cancelled the operation
    #[error("operation cancelled")]
    Cancelled,

    /// The last release could not be read from storage
    #[error("failed to determine last release: {0}")]
    LastRelease(#[source] Box<KubeError>),

    /// The declared current release could not be verified against storage
    #[error("failed to verify release object against current: {0}")]
    VerifyObject(#[source] VerifyError),

    /// Verification of a deployed release failed for a reason other than drift
    #[error(transparent)]
    Verify(#[from] VerifyError),

    /// The stored release carries a lifecycle status outside the known set
    #[error("unknown release status: {0}")]
    UnknownReleaseStatus(String),
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for KubeError {
    fn from(e: serde_yaml::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<packsync_core::CoreError> for KubeError {
    fn from(e: packsync_core::CoreError) -> Self {
        KubeError::Pack(e.to_string())
    }
}

impl KubeError {
    /// Check if this is a missing release in storage
    pub fn is_release_not_found(&self) -> bool {
        matches!(self, KubeError::ReleaseNotFound { .. })
    }
}
