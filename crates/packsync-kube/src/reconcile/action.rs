//! Shared contract of the action reconcilers
//!
//! Every action kind runs one mutating [`ReleaseManager`] call and then goes
//! through the same bookkeeping, whatever the outcome:
//!
//! 1. re-read the release history from storage,
//! 2. move the `current`/`previous` snapshots to what storage now holds,
//! 3. write the kind's condition,
//! 4. bump the failure counters on error,
//! 5. emit an event and hand back the action's error.
//!
//! Storage is the only source for the snapshots, so a write that failed
//! half-way is still reflected in the status.

use async_trait::async_trait;
use futures::future::{AbortRegistration, Abortable};
use std::sync::Arc;

use crate::error::{KubeError, Result};
use crate::events::{Event, EventSink, Severity};
use crate::manager::ReleaseManager;
use crate::object::{
    AttemptedAction, PackReleaseStatus, RELEASED_CONDITION, REMEDIATED_CONDITION,
    TEST_SUCCESS_CONDITION,
};
use crate::observe::ReleaseInfo;
use crate::release::{DEFAULT_OPERATION_TIMEOUT, StoredRelease};

use super::Request;

/// Collaborators shared by every action
#[derive(Clone)]
pub struct ActionContext {
    pub manager: Arc<ReleaseManager>,
    pub events: Arc<dyn EventSink>,
}

impl ActionContext {
    pub fn new(manager: Arc<ReleaseManager>, events: Arc<dyn EventSink>) -> Self {
        Self { manager, events }
    }
}

/// The kinds of release actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Install,
    Upgrade,
    Test,
    Rollback,
    Uninstall,
}

impl ActionKind {
    /// Condition type this kind reports on
    pub fn condition_type(&self) -> &'static str {
        match self {
            ActionKind::Install | ActionKind::Upgrade => RELEASED_CONDITION,
            ActionKind::Test => TEST_SUCCESS_CONDITION,
            ActionKind::Rollback | ActionKind::Uninstall => REMEDIATED_CONDITION,
        }
    }

    pub fn success_reason(&self) -> String {
        format!("{}Succeeded", self)
    }

    pub fn failure_reason(&self) -> String {
        format!("{}Failed", self)
    }

    pub fn success_message(&self) -> String {
        format!("{} complete", self)
    }

    /// Recorded as the last attempted action (install and upgrade only)
    pub fn attempted_action(&self) -> Option<AttemptedAction> {
        match self {
            ActionKind::Install => Some(AttemptedAction::Install),
            ActionKind::Upgrade => Some(AttemptedAction::Upgrade),
            _ => None,
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActionKind::Install => "Install",
            ActionKind::Upgrade => "Upgrade",
            ActionKind::Test => "Test",
            ActionKind::Rollback => "Rollback",
            ActionKind::Uninstall => "Uninstall",
        };
        f.write_str(s)
    }
}

/// One kind of release action
#[async_trait]
pub trait ReleaseAction: Send + Sync {
    fn kind(&self) -> ActionKind;

    fn context(&self) -> &ActionContext;

    /// Perform the mutating manager call
    async fn run(&self, req: &Request) -> Result<StoredRelease>;

    /// Check post-conditions of a successful run
    fn verify(&self, _req: &Request, _release: &StoredRelease) -> Result<()> {
        Ok(())
    }

    /// Move the status snapshots to what storage holds after the attempt
    ///
    /// `history` is sorted highest revision first.
    fn record(
        &self,
        status: &mut PackReleaseStatus,
        history: &[StoredRelease],
        _outcome: &Result<StoredRelease>,
    ) -> Result<()> {
        record_pointers(status, history)
    }
}

/// Drives a [`ReleaseAction`] and records its outcome on the request's object
#[async_trait]
pub trait ActionReconciler: Send + Sync {
    /// Run the action and record the outcome; returns the action's error unchanged
    async fn reconcile(&self, req: &mut Request) -> Result<()>;

    /// Like [`reconcile`](Self::reconcile), but the action can be aborted
    ///
    /// An aborted action fails with [`KubeError::Cancelled`]; the outcome is
    /// still recorded.
    async fn reconcile_abortable(
        &self,
        req: &mut Request,
        registration: AbortRegistration,
    ) -> Result<()>;
}

#[async_trait]
impl<A: ReleaseAction> ActionReconciler for A {
    async fn reconcile(&self, req: &mut Request) -> Result<()> {
        mark_attempt(self, req);
        let outcome = run_and_verify(self, req).await;
        finish(self, req, outcome).await
    }

    async fn reconcile_abortable(
        &self,
        req: &mut Request,
        registration: AbortRegistration,
    ) -> Result<()> {
        mark_attempt(self, req);
        let outcome = match Abortable::new(run_and_verify(self, req), registration).await {
            Ok(outcome) => outcome,
            Err(_aborted) => Err(KubeError::Cancelled),
        };
        finish(self, req, outcome).await
    }
}

fn mark_attempt<A: ReleaseAction + ?Sized>(action: &A, req: &mut Request) {
    if let Some(attempted) = action.kind().attempted_action() {
        req.object.status_mut().last_attempted_action = Some(attempted);
    }
}

async fn run_and_verify<A: ReleaseAction + ?Sized>(
    action: &A,
    req: &Request,
) -> Result<StoredRelease> {
    let release = action.run(req).await?;
    action.verify(req, &release)?;
    Ok(release)
}

async fn finish<A: ReleaseAction + ?Sized>(
    action: &A,
    req: &mut Request,
    outcome: Result<StoredRelease>,
) -> Result<()> {
    let kind = action.kind();
    let ctx = action.context();
    let storage_namespace = req.object.storage_namespace();
    let release_name = req.object.release_name();
    let release_ref = format!("{}/{}", storage_namespace, release_name);
    let generation = req.object.metadata.generation;
    let remediation = req.object.active_remediation();

    let history = ctx
        .manager
        .storage()
        .history(&storage_namespace, &release_name)
        .await;

    let status = req.object.status_mut();
    let recorded = history.and_then(|history| action.record(status, &history, &outcome));
    if let Err(e) = recorded {
        ctx.events.emit(&Event::new(
            Severity::Warning,
            "HistoryUnavailable",
            format!("failed to record release history: {}", e),
            release_ref.clone(),
        ));
    }

    match &outcome {
        Ok(release) => {
            let message = kind.success_message();
            status.set_condition(
                kind.condition_type(),
                true,
                &kind.success_reason(),
                &message,
                generation,
            );
            ctx.events.emit(&Event::new(
                Severity::Normal,
                kind.success_reason(),
                format!("{} for {}.v{}", message, release.name, release.version),
                release_ref,
            ));
        }
        Err(e) => {
            let message = e.to_string();
            status.set_condition(
                kind.condition_type(),
                false,
                &kind.failure_reason(),
                &message,
                generation,
            );

            status.failures += 1;
            match kind {
                ActionKind::Install => status.install_failures += 1,
                ActionKind::Upgrade => status.upgrade_failures += 1,
                ActionKind::Test => remediation.increment_failure_count(status),
                ActionKind::Rollback | ActionKind::Uninstall => {}
            }

            ctx.events.emit(&Event::new(
                Severity::Warning,
                kind.failure_reason(),
                message,
                release_ref,
            ));
        }
    }

    outcome.map(|_| ())
}

/// Default snapshot rule
///
/// With latest revision `L`: nothing changes when storage is empty; a
/// `current` that already points at `L` is refreshed; otherwise `current`
/// becomes `L` and, if there was a `current` before, `previous` becomes the
/// revision right below `L`.
pub fn record_pointers(status: &mut PackReleaseStatus, history: &[StoredRelease]) -> Result<()> {
    let Some(latest) = history.first() else {
        return Ok(());
    };
    let latest_info = ReleaseInfo::from_release(latest)?;

    match status.current.take() {
        Some(cur) if cur.targets(&latest.name, &latest.namespace, latest.version) => {
            status.current = Some(refresh(&cur, latest_info));
        }
        Some(_) => {
            status.previous = history
                .get(1)
                .map(ReleaseInfo::from_release)
                .transpose()?;
            status.current = Some(latest_info);
        }
        None => status.current = Some(latest_info),
    }

    Ok(())
}

/// New snapshot of the same revision, keeping test results the new one lacks
pub(crate) fn refresh(cur: &ReleaseInfo, mut latest: ReleaseInfo) -> ReleaseInfo {
    if latest.test_hooks.is_none() {
        latest.test_hooks = cur.test_hooks.clone();
    }
    latest
}

/// Declared timeout as a chrono duration
pub(crate) fn action_timeout(req: &Request) -> chrono::Duration {
    chrono::Duration::from_std(req.object.timeout()).unwrap_or(DEFAULT_OPERATION_TIMEOUT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use packsync_core::{PackMetadata, Values};

    fn revision(version: u32) -> StoredRelease {
        let mut rls = StoredRelease::for_install(
            "web".into(),
            "apps".into(),
            PackMetadata::new("webapp", semver::Version::new(1, 0, 0)),
            Values::new(),
            String::new(),
        );
        rls.version = version;
        rls.mark_deployed();
        rls
    }

    #[test]
    fn test_kind_strings() {
        assert_eq!(ActionKind::Upgrade.success_reason(), "UpgradeSucceeded");
        assert_eq!(ActionKind::Rollback.failure_reason(), "RollbackFailed");
        assert_eq!(ActionKind::Test.success_message(), "Test complete");
        assert_eq!(ActionKind::Uninstall.condition_type(), REMEDIATED_CONDITION);
        assert_eq!(ActionKind::Test.attempted_action(), None);
    }

    #[test]
    fn test_record_pointers_empty_history() {
        let mut status = PackReleaseStatus::default();
        record_pointers(&mut status, &[]).unwrap();
        assert_eq!(status, PackReleaseStatus::default());
    }

    #[test]
    fn test_record_pointers_without_current() {
        let mut status = PackReleaseStatus::default();
        record_pointers(&mut status, &[revision(2), revision(1)]).unwrap();

        assert_eq!(status.current.as_ref().map(|c| c.version), Some(2));
        assert!(status.previous.is_none());
    }

    #[test]
    fn test_record_pointers_shift() {
        let mut status = PackReleaseStatus {
            current: Some(ReleaseInfo::from_release(&revision(1)).unwrap()),
            ..Default::default()
        };
        record_pointers(&mut status, &[revision(3), revision(2), revision(1)]).unwrap();

        assert_eq!(status.current.as_ref().map(|c| c.version), Some(3));
        assert_eq!(status.previous.as_ref().map(|c| c.version), Some(2));
    }

    #[test]
    fn test_record_pointers_refresh_keeps_tests() {
        let v1 = revision(1);
        let mut tested = ReleaseInfo::from_release(&v1).unwrap();
        tested.test_hooks = Some(Default::default());
        let mut status = PackReleaseStatus {
            current: Some(tested),
            ..Default::default()
        };

        let mut failed = v1.clone();
        failed.mark_failed("boom".into());
        record_pointers(&mut status, &[failed]).unwrap();

        let current = status.current.unwrap();
        assert_eq!(current.status, "failed");
        assert!(current.has_been_tested());
        assert!(status.previous.is_none());
    }
}
