//! Storage driver wrapper that fails selected writes

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::StorageDriver;
use crate::error::{KubeError, Result};
use crate::release::StoredRelease;

type ErrorFn = Box<dyn Fn() -> KubeError + Send + Sync>;

/// Wraps another driver and fails `create` and/or `update` with injected errors
///
/// Reads and deletes pass through to the inner driver.
pub struct FailingDriver<D> {
    inner: D,
    create_err: Option<ErrorFn>,
    update_err: Option<ErrorFn>,
    /// Updates still to fail; `usize::MAX` fails them all
    updates_to_fail: AtomicUsize,
}

impl<D: StorageDriver> FailingDriver<D> {
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            create_err: None,
            update_err: None,
            updates_to_fail: AtomicUsize::new(0),
        }
    }

    /// Fail every `create` with the error built by `err`
    pub fn fail_create(mut self, err: impl Fn() -> KubeError + Send + Sync + 'static) -> Self {
        self.create_err = Some(Box::new(err));
        self
    }

    /// Fail every `update` with the error built by `err`
    pub fn fail_update(mut self, err: impl Fn() -> KubeError + Send + Sync + 'static) -> Self {
        self.update_err = Some(Box::new(err));
        self.updates_to_fail = AtomicUsize::new(usize::MAX);
        self
    }

    /// Fail only the next `update`; later ones reach the inner driver
    pub fn fail_update_once(mut self, err: impl Fn() -> KubeError + Send + Sync + 'static) -> Self {
        self.update_err = Some(Box::new(err));
        self.updates_to_fail = AtomicUsize::new(1);
        self
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    fn take_update_failure(&self) -> bool {
        self.updates_to_fail
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                0 => None,
                usize::MAX => Some(usize::MAX),
                n => Some(n - 1),
            })
            .is_ok()
    }
}

#[async_trait]
impl<D: StorageDriver> StorageDriver for FailingDriver<D> {
    async fn get(&self, namespace: &str, name: &str, version: u32) -> Result<StoredRelease> {
        self.inner.get(namespace, name, version).await
    }

    async fn last_release(&self, namespace: &str, name: &str) -> Result<StoredRelease> {
        self.inner.last_release(namespace, name).await
    }

    async fn history(&self, namespace: &str, name: &str) -> Result<Vec<StoredRelease>> {
        self.inner.history(namespace, name).await
    }

    async fn create(&self, namespace: &str, release: &StoredRelease) -> Result<()> {
        match &self.create_err {
            Some(err) => Err(err()),
            None => self.inner.create(namespace, release).await,
        }
    }

    async fn update(&self, namespace: &str, release: &StoredRelease) -> Result<()> {
        match &self.update_err {
            Some(err) if self.take_update_failure() => Err(err()),
            _ => self.inner.update(namespace, release).await,
        }
    }

    async fn delete(&self, namespace: &str, name: &str, version: u32) -> Result<StoredRelease> {
        self.inner.delete(namespace, name, version).await
    }

    async fn delete_all(&self, namespace: &str, name: &str) -> Result<Vec<StoredRelease>> {
        self.inner.delete_all(namespace, name).await
    }
}
