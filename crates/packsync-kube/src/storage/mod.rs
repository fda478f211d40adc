//! Storage drivers for persisting release history
//!
//! The storage backend is the source of truth for what was deployed. Drivers
//! only need to keep every revision of a release addressable by
//! `(namespace, name, version)`; the encoding is up to the driver. The
//! storage namespace is independent of the namespace a release deploys into.

mod failing;
mod memory;

pub use failing::FailingDriver;
pub use memory::{MemoryDriver, OperationCounts};

use async_trait::async_trait;

use crate::error::{KubeError, Result};
use crate::release::StoredRelease;

/// Storage driver trait for release persistence
///
/// Implementations must be Send + Sync for use across async tasks.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Get a specific release by name and version
    async fn get(&self, namespace: &str, name: &str, version: u32) -> Result<StoredRelease>;

    /// Get the highest revision of a release
    ///
    /// Returns [`KubeError::ReleaseNotFound`] when no revision exists.
    async fn last_release(&self, namespace: &str, name: &str) -> Result<StoredRelease>;

    /// All revisions of a release, highest version first
    ///
    /// An unknown release yields an empty history.
    async fn history(&self, namespace: &str, name: &str) -> Result<Vec<StoredRelease>>;

    /// Create a new revision under `namespace`; fails if the version already exists
    async fn create(&self, namespace: &str, release: &StoredRelease) -> Result<()>;

    /// Update an existing revision under `namespace`
    async fn update(&self, namespace: &str, release: &StoredRelease) -> Result<()>;

    /// Delete a specific revision
    async fn delete(&self, namespace: &str, name: &str, version: u32) -> Result<StoredRelease>;

    /// Delete all revisions of a release
    async fn delete_all(&self, namespace: &str, name: &str) -> Result<Vec<StoredRelease>>;

    /// Check if a release exists
    async fn exists(&self, namespace: &str, name: &str) -> Result<bool> {
        match self.last_release(namespace, name).await {
            Ok(_) => Ok(true),
            Err(KubeError::ReleaseNotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
