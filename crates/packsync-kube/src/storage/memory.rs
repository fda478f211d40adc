//! In-memory storage driver
//!
//! Keeps releases in process memory. Used by tests and by embedders that
//! persist history elsewhere.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

use super::StorageDriver;
use crate::error::{KubeError, Result};
use crate::release::StoredRelease;

type Store = HashMap<String, HashMap<String, BTreeMap<u32, StoredRelease>>>;

/// In-memory storage driver
#[derive(Clone, Default)]
pub struct MemoryDriver {
    /// Storage: namespace -> name -> version -> release
    store: Arc<RwLock<Store>>,
    /// Track operation counts for assertions
    operations: Arc<Counters>,
}

#[derive(Default)]
struct Counters {
    gets: AtomicUsize,
    lists: AtomicUsize,
    creates: AtomicUsize,
    updates: AtomicUsize,
    deletes: AtomicUsize,
}

/// Counts of operations performed
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OperationCounts {
    pub gets: usize,
    pub lists: usize,
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
}

fn not_found(namespace: &str, name: &str) -> KubeError {
    KubeError::ReleaseNotFound {
        name: name.to_string(),
        namespace: namespace.to_string(),
    }
}

impl MemoryDriver {
    /// Create a new empty driver
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with pre-populated releases, stored under their own namespace
    pub fn with_releases(releases: impl IntoIterator<Item = StoredRelease>) -> Self {
        let mut store = Store::new();
        for release in releases {
            store
                .entry(release.namespace.clone())
                .or_default()
                .entry(release.name.clone())
                .or_default()
                .insert(release.version, release);
        }
        Self {
            store: Arc::new(RwLock::new(store)),
            operations: Arc::default(),
        }
    }

    /// Get operation counts for assertions
    pub fn operation_counts(&self) -> OperationCounts {
        let ops = &self.operations;
        OperationCounts {
            gets: ops.gets.load(Ordering::Relaxed),
            lists: ops.lists.load(Ordering::Relaxed),
            creates: ops.creates.load(Ordering::Relaxed),
            updates: ops.updates.load(Ordering::Relaxed),
            deletes: ops.deletes.load(Ordering::Relaxed),
        }
    }

    /// Count total revisions held
    pub async fn release_count(&self) -> usize {
        let store = self.store.read().await;
        store
            .values()
            .flat_map(|ns| ns.values())
            .map(|versions| versions.len())
            .sum()
    }
}

#[async_trait]
impl StorageDriver for MemoryDriver {
    async fn get(&self, namespace: &str, name: &str, version: u32) -> Result<StoredRelease> {
        self.operations.gets.fetch_add(1, Ordering::Relaxed);

        let store = self.store.read().await;
        store
            .get(namespace)
            .and_then(|ns| ns.get(name))
            .and_then(|versions| versions.get(&version))
            .cloned()
            .ok_or_else(|| not_found(namespace, name))
    }

    async fn last_release(&self, namespace: &str, name: &str) -> Result<StoredRelease> {
        self.operations.gets.fetch_add(1, Ordering::Relaxed);

        let store = self.store.read().await;
        store
            .get(namespace)
            .and_then(|ns| ns.get(name))
            .and_then(|versions| versions.values().next_back())
            .cloned()
            .ok_or_else(|| not_found(namespace, name))
    }

    async fn history(&self, namespace: &str, name: &str) -> Result<Vec<StoredRelease>> {
        self.operations.lists.fetch_add(1, Ordering::Relaxed);

        let store = self.store.read().await;
        Ok(store
            .get(namespace)
            .and_then(|ns| ns.get(name))
            .map(|versions| versions.values().rev().cloned().collect())
            .unwrap_or_default())
    }

    async fn create(&self, namespace: &str, release: &StoredRelease) -> Result<()> {
        self.operations.creates.fetch_add(1, Ordering::Relaxed);

        let mut store = self.store.write().await;
        let versions = store
            .entry(namespace.to_string())
            .or_default()
            .entry(release.name.clone())
            .or_default();

        if versions.contains_key(&release.version) {
            return Err(KubeError::ReleaseAlreadyExists {
                name: release.name.clone(),
                namespace: namespace.to_string(),
            });
        }

        versions.insert(release.version, release.clone());
        Ok(())
    }

    async fn update(&self, namespace: &str, release: &StoredRelease) -> Result<()> {
        self.operations.updates.fetch_add(1, Ordering::Relaxed);

        let mut store = self.store.write().await;
        let slot = store
            .get_mut(namespace)
            .and_then(|ns| ns.get_mut(&release.name))
            .and_then(|versions| versions.get_mut(&release.version))
            .ok_or_else(|| not_found(namespace, &release.name))?;

        *slot = release.clone();
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str, version: u32) -> Result<StoredRelease> {
        self.operations.deletes.fetch_add(1, Ordering::Relaxed);

        let mut store = self.store.write().await;
        store
            .get_mut(namespace)
            .and_then(|ns| ns.get_mut(name))
            .and_then(|versions| versions.remove(&version))
            .ok_or_else(|| not_found(namespace, name))
    }

    async fn delete_all(&self, namespace: &str, name: &str) -> Result<Vec<StoredRelease>> {
        self.operations.deletes.fetch_add(1, Ordering::Relaxed);

        let mut store = self.store.write().await;
        let releases: Vec<StoredRelease> = store
            .get_mut(namespace)
            .and_then(|ns| ns.remove(name))
            .map(|versions| versions.into_values().collect())
            .unwrap_or_default();

        if releases.is_empty() {
            return Err(not_found(namespace, name));
        }

        Ok(releases)
    }
}
