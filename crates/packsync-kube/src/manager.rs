//! Release manager: install, upgrade, rollback, uninstall and test workflows
//!
//! Every mutating workflow follows the same shape: write a pending revision
//! to storage, run hooks and touch the cluster through the
//! [`ClusterExecutor`], then record the outcome on the revision. The action
//! timeout bounds the hook and cluster steps as a whole. Any failure after
//! the pending revision is written marks it failed, and the error is then
//! returned unchanged.

use async_trait::async_trait;
use chrono::Duration;
use packsync_core::{RenderedPack, Values};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

use crate::actions::{
    InstallOptions, RollbackOptions, TestOptions, UninstallOptions, UpgradeOptions,
    effective_timeout,
};
use crate::error::{KubeError, Result};
use crate::events::{Event, EventSink, Severity, TracingEventSink};
use crate::hooks::{Hook, HookEvent, HookExecutor, split_manifest};
use crate::release::{DEFAULT_OPERATION_TIMEOUT, LifecycleState, StoredRelease};
use crate::storage::StorageDriver;

/// Applies manifests and runs hook workloads in the cluster
#[async_trait]
pub trait ClusterExecutor: Send + Sync {
    /// Create or update every resource of a manifest
    async fn apply(&self, namespace: &str, manifest: &str) -> Result<()>;

    /// Delete every resource of a manifest
    async fn delete(&self, namespace: &str, manifest: &str) -> Result<()>;

    /// Run one hook under `resource_name` and wait for it to finish
    async fn run_hook(&self, namespace: &str, resource_name: &str, hook: &Hook) -> Result<()>;
}

/// High-level release operations over a storage driver and a cluster executor
pub struct ReleaseManager {
    storage: Arc<dyn StorageDriver>,
    executor: Arc<dyn ClusterExecutor>,
    events: Arc<dyn EventSink>,
}

impl ReleaseManager {
    pub fn new(storage: Arc<dyn StorageDriver>, executor: Arc<dyn ClusterExecutor>) -> Self {
        Self {
            storage,
            executor,
            events: Arc::new(TracingEventSink),
        }
    }

    /// Report bookkeeping failures to `events` instead of the log
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Get the storage driver
    pub fn storage(&self) -> &Arc<dyn StorageDriver> {
        &self.storage
    }

    // ========== Install ==========

    /// Install a pack as a new release
    ///
    /// A release whose last revision is uninstalled (history kept) is
    /// installed again as the next revision.
    pub async fn install(
        &self,
        pack: &RenderedPack,
        values: Values,
        options: &InstallOptions,
    ) -> Result<StoredRelease> {
        let existing = match self
            .storage
            .last_release(&options.storage_namespace, &options.name)
            .await
        {
            Ok(r) => Some(r),
            Err(KubeError::ReleaseNotFound { .. }) => None,
            Err(e) => return Err(e),
        };

        if let Some(existing) = &existing
            && !matches!(
                existing.state,
                LifecycleState::Uninstalled | LifecycleState::Superseded
            )
        {
            return Err(KubeError::ReleaseAlreadyExists {
                name: options.name.clone(),
                namespace: options.namespace.clone(),
            });
        }

        let timeout = effective_timeout(options.timeout);
        let (hooks, manifest) = split_manifest(&pack.manifest);
        let mut release = StoredRelease::for_install(
            options.name.clone(),
            options.namespace.clone(),
            pack.metadata.clone(),
            values,
            manifest,
        )
        .with_pending_timeout(timeout);
        if let Some(existing) = &existing {
            release.version = existing.version + 1;
            release.first_deployed = existing.first_deployed;
        }
        release.hooks = hooks;
        release.labels.extend(options.labels.clone());
        if options.description.is_some() {
            release.description = options.description.clone();
        }

        tracing::info!(
            release = %release.name,
            namespace = %release.namespace,
            version = release.version,
            pack = %release.pack.name,
            "installing release"
        );

        self.storage.create(&options.storage_namespace, &release).await?;
        self.deploy(
            &options.storage_namespace,
            &mut release,
            HookEvent::PreInstall,
            HookEvent::PostInstall,
            options.disable_hooks,
            timeout,
        )
        .await?;

        Ok(release)
    }

    // ========== Upgrade ==========

    /// Upgrade an existing release to a new pack and values
    pub async fn upgrade(
        &self,
        pack: &RenderedPack,
        values: Values,
        options: &UpgradeOptions,
    ) -> Result<StoredRelease> {
        let existing = self
            .storage
            .last_release(&options.storage_namespace, &options.name)
            .await?;
        ensure_not_pending(&existing)?;

        let timeout = effective_timeout(options.timeout);
        let (hooks, manifest) = split_manifest(&pack.manifest);
        let mut release =
            StoredRelease::for_upgrade(&existing, pack.metadata.clone(), values, manifest)
                .with_pending_timeout(timeout);
        release.hooks = hooks;
        release.labels.extend(options.labels.clone());
        if options.description.is_some() {
            release.description = options.description.clone();
        }

        tracing::info!(
            release = %release.name,
            namespace = %release.namespace,
            from = existing.version,
            to = release.version,
            "upgrading release"
        );

        self.storage.create(&options.storage_namespace, &release).await?;

        let mut prev = existing;
        prev.mark_superseded();
        if let Err(e) = self.storage.update(&options.storage_namespace, &prev).await {
            return Err(self
                .fail_pending(&options.storage_namespace, &mut release, e)
                .await);
        }

        self.deploy(
            &options.storage_namespace,
            &mut release,
            HookEvent::PreUpgrade,
            HookEvent::PostUpgrade,
            options.disable_hooks,
            timeout,
        )
        .await?;

        if let Some(max_history) = options.max_history {
            self.cleanup_history(&options.storage_namespace, &release.name, max_history)
                .await?;
        }

        Ok(release)
    }

    // ========== Rollback ==========

    /// Roll back to an earlier revision by deploying its content as a new revision
    pub async fn rollback(&self, options: &RollbackOptions) -> Result<StoredRelease> {
        let history = self
            .storage
            .history(&options.storage_namespace, &options.name)
            .await?;

        let current = history.first().ok_or_else(|| KubeError::ReleaseNotFound {
            name: options.name.clone(),
            namespace: options.namespace.clone(),
        })?;
        ensure_not_pending(current)?;

        let target_version = if options.revision == 0 {
            history
                .get(1)
                .map(|r| r.version)
                .ok_or_else(|| KubeError::RollbackNotPossible {
                    name: options.name.clone(),
                    reason: "no previous revision available".to_string(),
                })?
        } else {
            options.revision
        };

        let target = history
            .iter()
            .find(|r| r.version == target_version)
            .ok_or_else(|| KubeError::RollbackNotPossible {
                name: options.name.clone(),
                reason: format!("revision {} not found", target_version),
            })?;

        let timeout = effective_timeout(options.timeout);
        let mut release = StoredRelease::for_rollback(current, target).with_pending_timeout(timeout);

        tracing::info!(
            release = %release.name,
            namespace = %release.namespace,
            target = target_version,
            version = release.version,
            "rolling back release"
        );

        self.storage.create(&options.storage_namespace, &release).await?;

        let mut prev = current.clone();
        prev.mark_superseded();
        if let Err(e) = self.storage.update(&options.storage_namespace, &prev).await {
            return Err(self
                .fail_pending(&options.storage_namespace, &mut release, e)
                .await);
        }

        self.deploy(
            &options.storage_namespace,
            &mut release,
            HookEvent::PreRollback,
            HookEvent::PostRollback,
            options.disable_hooks,
            timeout,
        )
        .await?;

        Ok(release)
    }

    // ========== Uninstall ==========

    /// Uninstall a release
    pub async fn uninstall(&self, options: &UninstallOptions) -> Result<StoredRelease> {
        let mut release = self
            .storage
            .last_release(&options.storage_namespace, &options.name)
            .await?;

        if release.state == LifecycleState::Uninstalled {
            return Err(KubeError::ReleaseNotFound {
                name: options.name.clone(),
                namespace: options.namespace.clone(),
            });
        }

        let timeout = effective_timeout(options.timeout);
        release.mark_pending_uninstall(timeout);
        self.storage.update(&options.storage_namespace, &release).await?;

        tracing::info!(
            release = %release.name,
            namespace = %release.namespace,
            version = release.version,
            keep_history = options.keep_history,
            "uninstalling release"
        );

        let deadline = Deadline::after(timeout);
        let steps = self.uninstall_steps(&mut release, options.disable_hooks, deadline);
        if let Err(e) = deadline.bound(steps).await {
            return Err(self
                .fail_pending(&options.storage_namespace, &mut release, e)
                .await);
        }

        release.mark_uninstalled();
        if let Err(e) = self.storage.update(&options.storage_namespace, &release).await {
            return Err(self
                .fail_pending(&options.storage_namespace, &mut release, e)
                .await);
        }

        if !options.keep_history {
            self.storage
                .delete_all(&options.storage_namespace, &options.name)
                .await?;
        }

        Ok(release)
    }

    // ========== Test ==========

    /// Run the test hooks of the last release and record their executions
    ///
    /// Returns the updated release and the names of the failed test hooks.
    pub async fn run_tests(&self, options: &TestOptions) -> Result<(StoredRelease, Vec<String>)> {
        let mut release = self
            .storage
            .last_release(&options.storage_namespace, &options.name)
            .await?;
        ensure_not_pending(&release)?;

        let mut executor = HookExecutor::new(
            self.executor.clone(),
            &release.namespace,
            &release.name,
            release.version,
            to_std(effective_timeout(options.timeout)),
        );
        let failed = executor.execute_tests(&mut release.hooks).await;
        release.updated_at = chrono::Utc::now();
        self.storage.update(&options.storage_namespace, &release).await?;

        tracing::info!(
            release = %release.name,
            version = release.version,
            ran = executor.results.len(),
            failed = failed.len(),
            "ran test hooks"
        );

        Ok((release, failed))
    }

    /// Run the test hooks and fail if any of them failed
    pub async fn test(&self, options: &TestOptions) -> Result<StoredRelease> {
        let (release, failed) = self.run_tests(options).await?;
        if !failed.is_empty() {
            return Err(KubeError::TestFailed {
                name: release.name,
                hooks: failed,
            });
        }
        Ok(release)
    }

    // ========== Query Operations ==========

    /// Get release history, highest revision first
    pub async fn history(&self, namespace: &str, name: &str) -> Result<Vec<StoredRelease>> {
        self.storage.history(namespace, name).await
    }

    /// Get the last revision of a release
    pub async fn status(&self, namespace: &str, name: &str) -> Result<StoredRelease> {
        self.storage.last_release(namespace, name).await
    }

    // ========== Internal Helpers ==========

    /// Hooks and apply for a pending revision, then record the outcome
    async fn deploy(
        &self,
        storage_namespace: &str,
        release: &mut StoredRelease,
        pre: HookEvent,
        post: HookEvent,
        disable_hooks: bool,
        timeout: Duration,
    ) -> Result<()> {
        let deadline = Deadline::after(timeout);
        let steps = self.deploy_steps(release, pre, post, disable_hooks, deadline);
        if let Err(e) = deadline.bound(steps).await {
            return Err(self.fail_pending(storage_namespace, release, e).await);
        }

        release.mark_deployed();
        if let Err(e) = self.storage.update(storage_namespace, release).await {
            return Err(self.fail_pending(storage_namespace, release, e).await);
        }
        tracing::info!(release = %release.name, version = release.version, "release deployed");
        Ok(())
    }

    /// Mark a pending revision failed and hand `err` back
    ///
    /// Storing the failed revision is best effort. When it does not stick the
    /// revision stays pending in storage, and a warning event says so.
    async fn fail_pending(
        &self,
        storage_namespace: &str,
        release: &mut StoredRelease,
        err: KubeError,
    ) -> KubeError {
        tracing::warn!(release = %release.name, version = release.version, error = %err, "release failed");
        release.mark_failed(err.to_string());

        if let Err(e) = self.storage.update(storage_namespace, release).await {
            self.events.emit(&Event::new(
                Severity::Warning,
                "FailedRevisionUnrecorded",
                format!(
                    "failed to mark revision {} failed: {}",
                    release.version, e
                ),
                format!("{}/{}", storage_namespace, release.name),
            ));
        }
        err
    }

    async fn deploy_steps(
        &self,
        release: &mut StoredRelease,
        pre: HookEvent,
        post: HookEvent,
        disable_hooks: bool,
        deadline: Deadline,
    ) -> Result<()> {
        let mut hooks = self.hook_executor(release, deadline);

        if !disable_hooks {
            hooks.execute_event(&mut release.hooks, pre).await?;
        }

        self.executor
            .apply(&release.namespace, &release.manifest)
            .await?;

        if !disable_hooks {
            hooks.execute_event(&mut release.hooks, post).await?;
        }

        Ok(())
    }

    async fn uninstall_steps(
        &self,
        release: &mut StoredRelease,
        disable_hooks: bool,
        deadline: Deadline,
    ) -> Result<()> {
        let mut hooks = self.hook_executor(release, deadline);

        if !disable_hooks {
            hooks
                .execute_event(&mut release.hooks, HookEvent::PreDelete)
                .await?;
        }

        self.executor
            .delete(&release.namespace, &release.manifest)
            .await?;

        if !disable_hooks {
            hooks
                .execute_event(&mut release.hooks, HookEvent::PostDelete)
                .await?;
        }

        Ok(())
    }

    /// Hook executor whose hooks all end by the time the action does
    fn hook_executor(&self, release: &StoredRelease, deadline: Deadline) -> HookExecutor {
        HookExecutor::new(
            self.executor.clone(),
            &release.namespace,
            &release.name,
            release.version,
            deadline.limit,
        )
        .with_deadline(deadline.at)
    }

    /// Delete revisions beyond `max_history` (0 keeps everything)
    async fn cleanup_history(&self, namespace: &str, name: &str, max_history: u32) -> Result<()> {
        if max_history == 0 {
            return Ok(());
        }

        let history = self.storage.history(namespace, name).await?;
        for old in history.iter().skip(max_history as usize) {
            tracing::debug!(release = %name, version = old.version, "pruning revision");
            self.storage.delete(namespace, name, old.version).await?;
        }

        Ok(())
    }
}

fn ensure_not_pending(release: &StoredRelease) -> Result<()> {
    if release.state.is_pending() {
        return Err(KubeError::OperationInProgress {
            name: release.name.clone(),
            status: release.state.to_string(),
        });
    }
    Ok(())
}

/// End of an action's time budget
///
/// Hooks share the same instant, so a hook that is still running when the
/// budget runs out reports its own failure.
#[derive(Debug, Clone, Copy)]
struct Deadline {
    limit: std::time::Duration,
    at: Instant,
}

impl Deadline {
    fn after(timeout: Duration) -> Self {
        let limit = to_std(timeout);
        Self {
            limit,
            at: Instant::now() + limit,
        }
    }

    /// Run `steps`, failing with [`KubeError::Timeout`] past the deadline
    async fn bound<F>(self, steps: F) -> Result<()>
    where
        F: std::future::Future<Output = Result<()>>,
    {
        match tokio::time::timeout_at(self.at, steps).await {
            Ok(outcome) => outcome,
            Err(_) => Err(KubeError::Timeout(format!("{:?}", self.limit))),
        }
    }
}

fn to_std(timeout: Duration) -> std::time::Duration {
    timeout
        .to_std()
        .or_else(|_| DEFAULT_OPERATION_TIMEOUT.to_std())
        .unwrap_or(std::time::Duration::from_secs(300))
}

/// In-process cluster executor that records calls instead of contacting a cluster
///
/// Hooks and applies can be configured to fail or to never finish.
#[derive(Default)]
pub struct MockExecutor {
    failing_hooks: HashSet<String>,
    hanging_hooks: HashSet<String>,
    apply_error: Option<String>,
    hang_apply: bool,
    hook_runs: Arc<Mutex<Vec<String>>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the hook named `name` fail
    pub fn fail_hook(mut self, name: impl Into<String>) -> Self {
        self.failing_hooks.insert(name.into());
        self
    }

    /// Make the hook named `name` never complete
    pub fn hang_hook(mut self, name: impl Into<String>) -> Self {
        self.hanging_hooks.insert(name.into());
        self
    }

    /// Make every apply fail with `message`
    pub fn fail_apply(mut self, message: impl Into<String>) -> Self {
        self.apply_error = Some(message.into());
        self
    }

    /// Make every apply never complete
    pub fn hang_apply(mut self) -> Self {
        self.hang_apply = true;
        self
    }

    /// Resource names of the hooks run so far
    pub fn hook_runs(&self) -> Arc<Mutex<Vec<String>>> {
        self.hook_runs.clone()
    }
}

#[async_trait]
impl ClusterExecutor for MockExecutor {
    async fn apply(&self, _namespace: &str, _manifest: &str) -> Result<()> {
        if self.hang_apply {
            std::future::pending::<()>().await;
        }
        if let Some(message) = &self.apply_error {
            return Err(KubeError::Cluster(message.clone()));
        }
        Ok(())
    }

    async fn delete(&self, _namespace: &str, _manifest: &str) -> Result<()> {
        Ok(())
    }

    async fn run_hook(&self, _namespace: &str, resource_name: &str, hook: &Hook) -> Result<()> {
        if let Ok(mut runs) = self.hook_runs.lock() {
            runs.push(resource_name.to_string());
        }
        if self.hanging_hooks.contains(&hook.name) {
            std::future::pending::<()>().await;
        }
        if self.failing_hooks.contains(&hook.name) {
            return Err(KubeError::Cluster(format!("{} exited with code 1", resource_name)));
        }
        Ok(())
    }
}
