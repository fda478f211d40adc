//! Integration tests for the release action reconcilers and the dispatcher

use std::sync::Arc;
use std::time::Duration;

use futures::future::AbortHandle;
use packsync_core::{PackMetadata, RenderedPack, Values};
use packsync_kube::object::{
    PackRelease, PackReleaseSpec, TestSpec, UninstallSpec, UpgradeRemediation, UpgradeSpec,
};
use packsync_kube::reconcile::{
    ActionContext, ActionReconciler, Dispatcher, InstallAction, NextAction, ReleaseStatus,
    Request, TestAction, UninstallAction, UpgradeAction, determine_release_state,
};
use packsync_kube::{
    FailingDriver, KubeError, LifecycleState, MemoryDriver, MockExecutor, RecordingEventSink,
    ReleaseInfo, ReleaseManager, Severity, StorageDriver, StoredRelease,
};

const APP_MANIFEST: &str = "apiVersion: v1
kind: ConfigMap
metadata:
  name: web";

const MIGRATION_HOOK: &str = "apiVersion: batch/v1
kind: Job
metadata:
  name: migrate
  annotations:
    packsync.io/hook: post-upgrade";

const SMOKE_TEST: &str = "apiVersion: v1
kind: Pod
metadata:
  name: smoke
  annotations:
    packsync.io/hook: test";

fn pack(manifest: &str) -> RenderedPack {
    RenderedPack::new(
        PackMetadata::new("webapp", semver::Version::new(1, 0, 0)),
        manifest,
    )
}

fn request(spec: PackReleaseSpec, manifest: &str, values: &str) -> Request {
    let mut obj = PackRelease::new("web", spec);
    obj.metadata.namespace = Some("apps".into());
    obj.metadata.generation = Some(3);
    Request::new(obj, pack(manifest), Values::from_yaml(values).unwrap())
}

fn with_hook(hook: &str) -> String {
    format!("{}\n---\n{}", APP_MANIFEST, hook)
}

fn deployed(version: u32) -> StoredRelease {
    let mut rls = StoredRelease::for_install(
        "web".into(),
        "apps".into(),
        pack(APP_MANIFEST).metadata,
        Values::from_yaml("replicas: 1").unwrap(),
        APP_MANIFEST.to_string(),
    );
    rls.version = version;
    rls.mark_deployed();
    rls
}

struct Harness {
    ctx: ActionContext,
    events: Arc<RecordingEventSink>,
}

fn harness(storage: impl StorageDriver + 'static, executor: MockExecutor) -> Harness {
    let events = Arc::new(RecordingEventSink::new());
    let manager =
        ReleaseManager::new(Arc::new(storage), Arc::new(executor)).with_events(events.clone());
    Harness {
        ctx: ActionContext::new(Arc::new(manager), events.clone()),
        events,
    }
}

fn set_current(req: &mut Request, rls: &StoredRelease) {
    req.object.status_mut().current = Some(ReleaseInfo::from_release(rls).unwrap());
}

fn current_version(req: &Request) -> Option<u32> {
    req.object.current().map(|c| c.version)
}

fn previous_version(req: &Request) -> Option<u32> {
    req.object.previous().map(|c| c.version)
}

mod upgrade {
    use super::*;

    #[tokio::test]
    async fn test_upgrade_success() {
        let h = harness(MemoryDriver::with_releases([deployed(1)]), MockExecutor::new());
        let mut req = request(PackReleaseSpec::default(), APP_MANIFEST, "replicas: 3");
        set_current(&mut req, &deployed(1));

        UpgradeAction::new(h.ctx.clone()).reconcile(&mut req).await.unwrap();

        assert_eq!(current_version(&req), Some(2));
        assert_eq!(previous_version(&req), Some(1));

        let status = req.object.status.as_ref().unwrap();
        assert_eq!(status.failures, 0);
        assert_eq!(status.upgrade_failures, 0);

        let released = status.condition("Released").unwrap();
        assert_eq!(released.status, "True");
        assert_eq!(released.reason, "UpgradeSucceeded");
        assert_eq!(released.message, "Upgrade complete");
        assert_eq!(released.observed_generation, Some(3));

        assert_eq!(h.events.with_reason("UpgradeSucceeded").len(), 1);
    }

    #[tokio::test]
    async fn test_upgrade_hook_timeout() {
        let spec = PackReleaseSpec {
            timeout: Some(Duration::from_millis(100)),
            ..Default::default()
        };
        let h = harness(
            MemoryDriver::with_releases([deployed(1)]),
            MockExecutor::new().hang_hook("migrate"),
        );
        let mut req = request(spec, &with_hook(MIGRATION_HOOK), "replicas: 3");
        set_current(&mut req, &deployed(1));

        let err = UpgradeAction::new(h.ctx.clone())
            .reconcile(&mut req)
            .await
            .unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"hook 'migrate' failed during post-upgrade: operation timed out after 100ms");

        assert_eq!(current_version(&req), Some(2));
        assert_eq!(previous_version(&req), Some(1));
        assert_eq!(req.object.current().unwrap().status, "failed");

        let status = req.object.status.as_ref().unwrap();
        assert_eq!(status.failures, 1);
        assert_eq!(status.upgrade_failures, 1);
        assert_eq!(status.install_failures, 0);

        let released = status.condition("Released").unwrap();
        assert_eq!(released.status, "False");
        assert_eq!(released.reason, "UpgradeFailed");
        assert_eq!(released.message, err.to_string());

        let warnings = h.events.with_reason("UpgradeFailed");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].severity, Severity::Warning);
    }

    fn conflict() -> KubeError {
        KubeError::ReleaseAlreadyExists {
            name: "web".into(),
            namespace: "apps".into(),
        }
    }

    fn etcd_unavailable() -> KubeError {
        KubeError::Storage("etcd unavailable".into())
    }

    #[tokio::test]
    async fn test_upgrade_create_failure_keeps_current() {
        let storage =
            FailingDriver::new(MemoryDriver::with_releases([deployed(1)])).fail_create(conflict);
        let h = harness(storage, MockExecutor::new());
        let mut req = request(PackReleaseSpec::default(), APP_MANIFEST, "replicas: 3");
        set_current(&mut req, &deployed(1));

        let err = UpgradeAction::new(h.ctx.clone())
            .reconcile(&mut req)
            .await
            .unwrap_err();

        assert_eq!(current_version(&req), Some(1));
        assert_eq!(previous_version(&req), None);

        let status = req.object.status.as_ref().unwrap();
        assert_eq!(status.failures, 1);
        assert_eq!(status.upgrade_failures, 1);
        let released = status.condition("Released").unwrap();
        assert_eq!(released.status, "False");
        assert_eq!(released.reason, "UpgradeFailed");
        assert_eq!(released.message, conflict().to_string());
        assert!(matches!(err, KubeError::ReleaseAlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_upgrade_update_failure_records_pending_revision() {
        let storage = FailingDriver::new(MemoryDriver::with_releases([deployed(1)]))
            .fail_update(etcd_unavailable);
        let h = harness(storage, MockExecutor::new());
        let mut req = request(PackReleaseSpec::default(), APP_MANIFEST, "replicas: 3");
        set_current(&mut req, &deployed(1));

        let err = UpgradeAction::new(h.ctx.clone())
            .reconcile(&mut req)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), etcd_unavailable().to_string());

        assert_eq!(current_version(&req), Some(2));
        assert_eq!(previous_version(&req), Some(1));
        assert_eq!(req.object.current().unwrap().status, "pending-upgrade");

        let status = req.object.status.as_ref().unwrap();
        assert_eq!(status.failures, 1);
        assert_eq!(status.upgrade_failures, 1);

        let released = status.condition("Released").unwrap();
        assert_eq!(released.status, "False");
        assert_eq!(released.reason, "UpgradeFailed");
        assert_eq!(released.message, etcd_unavailable().to_string());

        assert_eq!(h.events.with_reason("FailedRevisionUnrecorded").len(), 1);
    }

    #[tokio::test]
    async fn test_upgrade_transient_update_failure_marks_revision_failed() {
        let storage = FailingDriver::new(MemoryDriver::with_releases([deployed(1)]))
            .fail_update_once(etcd_unavailable);
        let h = harness(storage, MockExecutor::new());
        let mut req = request(PackReleaseSpec::default(), APP_MANIFEST, "replicas: 3");
        set_current(&mut req, &deployed(1));

        let err = UpgradeAction::new(h.ctx.clone())
            .reconcile(&mut req)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), etcd_unavailable().to_string());

        assert_eq!(current_version(&req), Some(2));
        assert_eq!(req.object.current().unwrap().status, "failed");
        assert!(h.events.with_reason("FailedRevisionUnrecorded").is_empty());

        let state = determine_release_state(
            h.ctx.manager.storage().as_ref(),
            &req,
            h.events.as_ref(),
        )
        .await
        .unwrap();
        assert_eq!(state.status, ReleaseStatus::Failed);
    }

    #[tokio::test]
    async fn test_upgrade_hanging_apply_times_out() {
        let spec = PackReleaseSpec {
            timeout: Some(Duration::from_millis(100)),
            ..Default::default()
        };
        let h = harness(
            MemoryDriver::with_releases([deployed(1)]),
            MockExecutor::new().hang_apply(),
        );
        let mut req = request(spec, APP_MANIFEST, "replicas: 3");
        set_current(&mut req, &deployed(1));

        let err = tokio::time::timeout(
            Duration::from_secs(3),
            UpgradeAction::new(h.ctx.clone()).reconcile(&mut req),
        )
        .await
        .expect("upgrade should end within its own timeout")
        .unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"operation timed out after 100ms");

        assert_eq!(current_version(&req), Some(2));
        assert_eq!(req.object.current().unwrap().status, "failed");

        let status = req.object.status.as_ref().unwrap();
        assert_eq!(status.failures, 1);
        assert_eq!(status.upgrade_failures, 1);

        let released = status.condition("Released").unwrap();
        assert_eq!(released.status, "False");
        assert_eq!(released.message, err.to_string());
    }

    #[tokio::test]
    async fn test_upgrade_without_current() {
        let h = harness(MemoryDriver::with_releases([deployed(1)]), MockExecutor::new());
        let mut req = request(PackReleaseSpec::default(), APP_MANIFEST, "replicas: 3");

        UpgradeAction::new(h.ctx.clone()).reconcile(&mut req).await.unwrap();

        assert_eq!(current_version(&req), Some(2));
        assert_eq!(previous_version(&req), None);
    }

    #[tokio::test]
    async fn test_upgrade_with_stale_current() {
        let mut v1 = deployed(1);
        v1.mark_superseded();
        let h = harness(
            MemoryDriver::with_releases([v1.clone(), deployed(2)]),
            MockExecutor::new(),
        );
        let mut req = request(PackReleaseSpec::default(), APP_MANIFEST, "replicas: 3");
        set_current(&mut req, &v1);

        UpgradeAction::new(h.ctx.clone()).reconcile(&mut req).await.unwrap();

        assert_eq!(current_version(&req), Some(3));
        assert_eq!(previous_version(&req), Some(2));
    }

    #[tokio::test]
    async fn test_aborted_upgrade_is_recorded() {
        let h = harness(
            MemoryDriver::with_releases([deployed(1)]),
            MockExecutor::new().hang_hook("migrate"),
        );
        let mut req = request(
            PackReleaseSpec::default(),
            &with_hook(MIGRATION_HOOK),
            "replicas: 3",
        );
        set_current(&mut req, &deployed(1));

        let (handle, registration) = AbortHandle::new_pair();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.abort();
        });

        let err = UpgradeAction::new(h.ctx.clone())
            .reconcile_abortable(&mut req, registration)
            .await
            .unwrap_err();
        assert!(matches!(err, KubeError::Cancelled));

        assert_eq!(current_version(&req), Some(2));
        assert_eq!(previous_version(&req), Some(1));
        assert_eq!(req.object.status.as_ref().unwrap().upgrade_failures, 1);

        let state = determine_release_state(
            h.ctx.manager.storage().as_ref(),
            &req,
            h.events.as_ref(),
        )
        .await
        .unwrap();
        assert_eq!(state.status, ReleaseStatus::Locked);
    }
}

mod install_and_test {
    use super::*;

    #[tokio::test]
    async fn test_install_is_in_sync() {
        let h = harness(MemoryDriver::new(), MockExecutor::new());
        let mut req = request(PackReleaseSpec::default(), APP_MANIFEST, "replicas: 1");

        InstallAction::new(h.ctx.clone()).reconcile(&mut req).await.unwrap();

        assert_eq!(current_version(&req), Some(1));
        let storage = h.ctx.manager.storage().as_ref();
        let state = determine_release_state(storage, &req, h.events.as_ref())
            .await
            .unwrap();
        assert_eq!(state.status, ReleaseStatus::InSync);

        req.object.spec.test = Some(TestSpec {
            enable: true,
            ignore_failures: false,
        });
        let state = determine_release_state(storage, &req, h.events.as_ref())
            .await
            .unwrap();
        assert_eq!(state.status, ReleaseStatus::Untested);
    }

    #[tokio::test]
    async fn test_install_into_storage_namespace() {
        let memory = MemoryDriver::new();
        let h = harness(memory.clone(), MockExecutor::new());
        let spec = PackReleaseSpec {
            storage_namespace: Some("packsync-system".into()),
            ..Default::default()
        };
        let mut req = request(spec, APP_MANIFEST, "replicas: 1");

        InstallAction::new(h.ctx.clone()).reconcile(&mut req).await.unwrap();

        let history = memory.history("packsync-system", "web").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].namespace, "apps");
        assert!(memory.history("apps", "web").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tested_release_is_in_sync() {
        let spec = PackReleaseSpec {
            test: Some(TestSpec {
                enable: true,
                ignore_failures: false,
            }),
            ..Default::default()
        };
        let h = harness(MemoryDriver::new(), MockExecutor::new());
        let mut req = request(spec, &with_hook(SMOKE_TEST), "replicas: 1");

        InstallAction::new(h.ctx.clone()).reconcile(&mut req).await.unwrap();
        TestAction::new(h.ctx.clone()).reconcile(&mut req).await.unwrap();

        let current = req.object.current().unwrap();
        assert!(current.has_been_tested());
        assert_eq!(current.test_hooks.as_ref().map(|t| t.len()), Some(1));

        let state = determine_release_state(
            h.ctx.manager.storage().as_ref(),
            &req,
            h.events.as_ref(),
        )
        .await
        .unwrap();
        assert_eq!(state.status, ReleaseStatus::InSync);

        let status = req.object.status.as_ref().unwrap();
        assert_eq!(status.condition("TestSuccess").unwrap().reason, "TestSucceeded");
    }

    #[tokio::test]
    async fn test_failed_test_marks_release_failed() {
        let spec = PackReleaseSpec {
            test: Some(TestSpec {
                enable: true,
                ignore_failures: false,
            }),
            ..Default::default()
        };
        let h = harness(MemoryDriver::new(), MockExecutor::new().fail_hook("smoke"));
        let mut req = request(spec, &with_hook(SMOKE_TEST), "replicas: 1");

        InstallAction::new(h.ctx.clone()).reconcile(&mut req).await.unwrap();
        let err = TestAction::new(h.ctx.clone())
            .reconcile(&mut req)
            .await
            .unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"test hooks failed for release 'web': smoke");

        let status = req.object.status.as_ref().unwrap();
        assert_eq!(status.failures, 1);
        assert_eq!(status.install_failures, 1);
        assert_eq!(status.condition("TestSuccess").unwrap().status, "False");

        let state = determine_release_state(
            h.ctx.manager.storage().as_ref(),
            &req,
            h.events.as_ref(),
        )
        .await
        .unwrap();
        assert_eq!(state.status, ReleaseStatus::Failed);
        assert_eq!(state.reason, "has failed test");
    }

    #[tokio::test]
    async fn test_ignored_test_failures() {
        let spec = PackReleaseSpec {
            test: Some(TestSpec {
                enable: true,
                ignore_failures: true,
            }),
            ..Default::default()
        };
        let h = harness(MemoryDriver::new(), MockExecutor::new().fail_hook("smoke"));
        let mut req = request(spec, &with_hook(SMOKE_TEST), "replicas: 1");

        InstallAction::new(h.ctx.clone()).reconcile(&mut req).await.unwrap();
        TestAction::new(h.ctx.clone()).reconcile(&mut req).await.unwrap();

        let status = req.object.status.as_ref().unwrap();
        assert_eq!(status.failures, 0);
    }
}

mod uninstall {
    use super::*;

    #[tokio::test]
    async fn test_uninstall_deletes_history() {
        let memory = MemoryDriver::with_releases([deployed(1)]);
        let h = harness(memory.clone(), MockExecutor::new());
        let mut req = request(PackReleaseSpec::default(), APP_MANIFEST, "replicas: 1");
        set_current(&mut req, &deployed(1));

        UninstallAction::new(h.ctx.clone()).reconcile(&mut req).await.unwrap();

        let current = req.object.current().unwrap();
        assert_eq!(current.status, "uninstalled");
        assert!(current.deleted.is_some());
        assert!(memory.history("apps", "web").await.unwrap().is_empty());

        let remediated = req.object.status.as_ref().unwrap().condition("Remediated").unwrap();
        assert_eq!(remediated.reason, "UninstallSucceeded");
    }

    #[tokio::test]
    async fn test_uninstall_keeps_history() {
        let spec = PackReleaseSpec {
            uninstall: Some(UninstallSpec {
                keep_history: true,
                ..Default::default()
            }),
            ..Default::default()
        };
        let h = harness(MemoryDriver::with_releases([deployed(1)]), MockExecutor::new());
        let mut req = request(spec, APP_MANIFEST, "replicas: 1");
        set_current(&mut req, &deployed(1));

        UninstallAction::new(h.ctx.clone()).reconcile(&mut req).await.unwrap();

        assert_eq!(current_version(&req), Some(1));
        assert_eq!(req.object.current().unwrap().status, "uninstalled");

        let state = determine_release_state(
            h.ctx.manager.storage().as_ref(),
            &req,
            h.events.as_ref(),
        )
        .await
        .unwrap();
        assert_eq!(state.status, ReleaseStatus::Absent);
    }
}

mod dispatch {
    use super::*;

    #[tokio::test]
    async fn test_install_then_done() {
        let h = harness(MemoryDriver::new(), MockExecutor::new());
        let dispatcher = Dispatcher::new(h.ctx.clone());
        let mut req = request(PackReleaseSpec::default(), APP_MANIFEST, "replicas: 1");

        assert_eq!(dispatcher.reconcile(&mut req).await.unwrap(), NextAction::Install);
        assert_eq!(dispatcher.reconcile(&mut req).await.unwrap(), NextAction::Done);

        req.values = Values::from_yaml("replicas: 2").unwrap();
        assert_eq!(dispatcher.reconcile(&mut req).await.unwrap(), NextAction::Upgrade);
        assert_eq!(dispatcher.reconcile(&mut req).await.unwrap(), NextAction::Done);
        assert_eq!(current_version(&req), Some(2));
        assert_eq!(previous_version(&req), Some(1));
    }

    #[tokio::test]
    async fn test_failed_upgrade_is_rolled_back() {
        let spec = PackReleaseSpec {
            upgrade: Some(UpgradeSpec {
                remediation: Some(UpgradeRemediation {
                    retries: 1,
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        let h = harness(MemoryDriver::new(), MockExecutor::new().fail_hook("migrate"));
        let dispatcher = Dispatcher::new(h.ctx.clone());
        let mut req = request(spec, APP_MANIFEST, "replicas: 1");

        assert_eq!(dispatcher.reconcile(&mut req).await.unwrap(), NextAction::Install);

        req.pack = pack(&with_hook(MIGRATION_HOOK));
        req.values = Values::from_yaml("replicas: 2").unwrap();
        dispatcher.reconcile(&mut req).await.unwrap_err();
        assert_eq!(current_version(&req), Some(2));
        assert_eq!(previous_version(&req), Some(1));

        assert_eq!(dispatcher.reconcile(&mut req).await.unwrap(), NextAction::Rollback);
        let current = req.object.current().unwrap();
        assert_eq!(current.version, 3);
        assert_eq!(current.status, "deployed");
        assert_eq!(previous_version(&req), Some(1));
        assert_eq!(
            req.object.status.as_ref().unwrap().condition("Remediated").unwrap().reason,
            "RollbackSucceeded"
        );
    }

    #[tokio::test]
    async fn test_unknown_state_aborts() {
        let mut rls = deployed(1);
        rls.state = LifecycleState::Unknown;
        let h = harness(MemoryDriver::with_releases([rls.clone()]), MockExecutor::new());
        let dispatcher = Dispatcher::new(h.ctx.clone());
        let mut req = request(PackReleaseSpec::default(), APP_MANIFEST, "replicas: 1");
        set_current(&mut req, &rls);

        let err = dispatcher.reconcile(&mut req).await.unwrap_err();
        assert!(matches!(err, KubeError::UnknownReleaseStatus(_)));
        assert_eq!(current_version(&req), Some(1));
        assert!(req.object.status.as_ref().unwrap().conditions.is_empty());
    }
}
